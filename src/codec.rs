use bytes::BytesMut;
use compression_codecs::{EncodeV2, deflate::DeflateEncoder, gzip::GzipEncoder};
use compression_core::Level;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::fmt;
use std::io;

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// Supported content encodings.
///
/// The derived ordering ranks `Gzip` above `Deflate`: when a client accepts
/// both, gzip is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Encoding {
    /// Raw DEFLATE compression (RFC 1951).
    Deflate,
    /// Gzip compression (RFC 1952).
    Gzip,
}

impl Encoding {
    /// Returns the Content-Encoding header value for this encoding.
    pub fn content_encoding(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }

    /// Creates a new encoder for this encoding at the given level.
    fn encoder(&self, level: CompressionLevel) -> Box<dyn EncodeV2 + Send> {
        let level: Level = level.into();
        match self {
            Encoding::Gzip => Box::new(GzipEncoder::new(level.into())),
            Encoding::Deflate => Box::new(DeflateEncoder::new(level.into())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.content_encoding())
    }
}

/// Compression level used for every response of a middleware instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Fastest compression, largest output.
    Fastest,
    /// Best compression, slowest.
    Best,
    /// The codec's default trade-off between speed and size.
    #[default]
    Default,
    /// An explicit level from 0 (store) to 9 (best). Larger values are clamped to 9.
    Precise(u32),
}

impl From<CompressionLevel> for Level {
    fn from(level: CompressionLevel) -> Self {
        match level {
            CompressionLevel::Fastest => Level::Fastest,
            CompressionLevel::Best => Level::Best,
            CompressionLevel::Default => Level::Default,
            CompressionLevel::Precise(n) => Level::Precise(n.min(9) as i32),
        }
    }
}

/// An incremental encoder that appends its output to a caller-supplied buffer.
///
/// Shared by the response writer and the body adapter; each owns exactly one
/// and finishes it once.
pub(crate) struct Compressor {
    encoding: Encoding,
    encoder: Box<dyn EncodeV2 + Send>,
    output_buffer: Vec<u8>,
}

impl Compressor {
    pub(crate) fn new(encoding: Encoding, level: CompressionLevel) -> Self {
        Self {
            encoding,
            encoder: encoding.encoder(level),
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
        }
    }

    pub(crate) fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Feeds `input` to the encoder, appending whatever it emits to `out`.
    pub(crate) fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> io::Result<()> {
        if input.is_empty() {
            return Ok(());
        }

        let mut input_buf = PartialBuffer::new(input);

        // Keep encoding until all input is consumed
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

            self.encoder
                .encode(&mut input_buf, &mut output)
                .map_err(io::Error::other)?;

            let written = output.written_len();
            out.extend_from_slice(&self.output_buffer[..written]);

            if input_buf.written_len() >= input.len() {
                return Ok(());
            }

            // No progress on either side; the encoder will not take more.
            if written == 0 && input_buf.written_len() == 0 {
                return Err(io::Error::other("encoder made no progress"));
            }
        }
    }

    /// Sync-flushes the encoder so everything written so far can be decoded.
    pub(crate) fn flush(&mut self, out: &mut BytesMut) -> io::Result<()> {
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = self.encoder.flush(&mut output).map_err(io::Error::other)?;

            let written = output.written_len();
            out.extend_from_slice(&self.output_buffer[..written]);
            if done {
                return Ok(());
            }
        }
    }

    /// Finishes the stream, appending the trailing bytes (e.g. the gzip footer).
    pub(crate) fn finish(&mut self, out: &mut BytesMut) -> io::Result<()> {
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = self.encoder.finish(&mut output).map_err(io::Error::other)?;

            let written = output.written_len();
            out.extend_from_slice(&self.output_buffer[..written]);
            if done {
                return Ok(());
            }
        }
    }
}

impl fmt::Debug for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compressor")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::{DeflateDecoder, GzDecoder};
    use std::io::Read;

    fn compress(encoding: Encoding, level: CompressionLevel, chunks: &[&[u8]]) -> Vec<u8> {
        let mut compressor = Compressor::new(encoding, level);
        let mut out = BytesMut::new();
        for chunk in chunks {
            compressor.encode(chunk, &mut out).unwrap();
        }
        compressor.finish(&mut out).unwrap();
        out.to_vec()
    }

    #[test]
    fn test_content_encoding() {
        assert_eq!(Encoding::Gzip.content_encoding(), "gzip");
        assert_eq!(Encoding::Deflate.content_encoding(), "deflate");
        assert_eq!(Encoding::Gzip.to_string(), "gzip");
    }

    #[test]
    fn test_gzip_preferred_by_ordering() {
        assert!(Encoding::Gzip > Encoding::Deflate);
        assert_eq!(
            [Encoding::Deflate, Encoding::Gzip].into_iter().max(),
            Some(Encoding::Gzip)
        );
    }

    #[test]
    fn test_precise_level_is_clamped() {
        assert!(matches!(
            Level::from(CompressionLevel::Precise(42)),
            Level::Precise(9)
        ));
        assert!(matches!(Level::from(CompressionLevel::Precise(1)), Level::Precise(1)));
        assert!(matches!(Level::from(CompressionLevel::default()), Level::Default));
    }

    #[test]
    fn test_gzip_multiple_chunks_decode() {
        let data = compress(
            Encoding::Gzip,
            CompressionLevel::Default,
            &[b"hello ", b"compressed ", b"world"],
        );
        assert_eq!(&data[..2], &[0x1f, 0x8b]);

        let mut decoded = String::new();
        GzDecoder::new(&data[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "hello compressed world");
    }

    #[test]
    fn test_deflate_round_trip() {
        let input = "Gorilla!\n".repeat(1024);
        let data = compress(
            Encoding::Deflate,
            CompressionLevel::Best,
            &[input.as_bytes()],
        );
        assert!(data.len() < input.len());

        let mut decoded = String::new();
        DeflateDecoder::new(&data[..])
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_input_larger_than_output_buffer() {
        // Incompressible-ish input bigger than the internal buffer.
        let input: Vec<u8> = (0..64 * 1024u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect();
        let data = compress(Encoding::Gzip, CompressionLevel::Fastest, &[&input]);

        let mut decoded = Vec::new();
        GzDecoder::new(&data[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_flush_makes_prefix_decodable() {
        let mut compressor = Compressor::new(Encoding::Deflate, CompressionLevel::Default);
        let mut out = BytesMut::new();
        compressor.encode(b"event: ping\n\n", &mut out).unwrap();
        compressor.flush(&mut out).unwrap();
        assert!(!out.is_empty());

        // The stream is unfinished, but everything before the flush point decodes.
        let mut decompress = flate2::Decompress::new(false);
        let mut decoded = Vec::with_capacity(64);
        decompress
            .decompress_vec(&out, &mut decoded, flate2::FlushDecompress::Sync)
            .unwrap();
        assert_eq!(decoded, b"event: ping\n\n");
    }

    #[test]
    fn test_empty_stream_is_valid() {
        for encoding in [Encoding::Gzip, Encoding::Deflate] {
            let data = compress(encoding, CompressionLevel::Default, &[]);
            assert!(!data.is_empty());

            let mut decoded = Vec::new();
            match encoding {
                Encoding::Gzip => GzDecoder::new(&data[..]).read_to_end(&mut decoded),
                Encoding::Deflate => DeflateDecoder::new(&data[..]).read_to_end(&mut decoded),
            }
            .unwrap();
            assert!(decoded.is_empty());
        }
    }
}
