//! The response-writer capability set and the compressing decorator.

use crate::codec::{Compressor, Encoding};
use crate::config::CompressionConfig;
use crate::policy::{prepare_compressed_headers, skip_reason, status_allows_body};
use bytes::BytesMut;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::io::{self, Write};
use std::mem;
use tracing::{debug, trace, warn};

/// A sink for an HTTP response: a header store, a status line written at
/// most once, and a body written through [`io::Write`].
///
/// Writing body bytes before [`write_head`](ResponseWriter::write_head)
/// implies a `200 OK` status.
pub trait ResponseWriter: Write {
    /// The headers staged for the response.
    fn headers(&self) -> &HeaderMap;

    /// Mutable access to the staged headers.
    ///
    /// Changes made after the head has been written have no effect on the
    /// response.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Sends the status line and the staged headers.
    fn write_head(&mut self, status: StatusCode) -> io::Result<()>;
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for &mut W {
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        (**self).write_head(status)
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for Box<W> {
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        (**self).headers_mut()
    }

    fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        (**self).write_head(status)
    }
}

/// Whether the response is being compressed, decided once per response.
#[derive(Debug)]
enum State {
    /// Nothing has been written yet; headers may still change the outcome.
    Undecided,
    /// Bytes go to the underlying writer unchanged.
    Passthrough,
    /// Bytes go through the encoder first.
    Compressing(Compressor),
    /// The stream has been finished.
    Closed,
    /// Sending the head failed; nothing more reaches the underlying writer.
    Failed,
}

/// A [`ResponseWriter`] that compresses the body it is given.
///
/// The decision is taken on the first write, explicit head, flush or close:
/// at that point the staged headers are inspected and, if the response
/// qualifies, rewritten for the chosen encoding. The decision is final for
/// the rest of the response.
///
/// The writer must be closed to emit the encoder's trailing bytes. Call
/// [`finish`](CompressWriter::finish) to observe errors; dropping the writer
/// finishes it as well.
pub struct CompressWriter<W: ResponseWriter> {
    inner: W,
    encoding: Option<Encoding>,
    config: CompressionConfig,
    state: State,
    scratch: BytesMut,
}

impl<W: ResponseWriter> CompressWriter<W> {
    /// Wraps `inner`, compressing with `encoding` if it is `Some` and the
    /// response qualifies under `config`.
    pub fn new(inner: W, encoding: Option<Encoding>, config: CompressionConfig) -> Self {
        Self {
            inner,
            encoding,
            config,
            state: State::Undecided,
            scratch: BytesMut::new(),
        }
    }

    /// Returns a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Returns `true` once the compress/passthrough decision has been taken.
    pub fn is_decided(&self) -> bool {
        !matches!(self.state, State::Undecided)
    }

    /// Returns the encoding applied to the body, if compression is active.
    pub fn active_encoding(&self) -> Option<Encoding> {
        match &self.state {
            State::Compressing(compressor) => Some(compressor.encoding()),
            _ => None,
        }
    }

    /// Finishes the response, writing any trailing encoder bytes.
    ///
    /// If nothing was written the decision is taken now, so an eligible empty
    /// response still becomes a valid (empty) compressed stream.
    pub fn finish(mut self) -> io::Result<()> {
        self.close()
    }

    fn decide(&mut self, status: StatusCode) {
        let Some(encoding) = self.encoding else {
            trace!("no acceptable encoding, passing response through");
            self.state = State::Passthrough;
            return;
        };

        let reason = if status_allows_body(status) {
            skip_reason(self.inner.headers(), &self.config)
        } else {
            Some("status without body")
        };
        if let Some(reason) = reason {
            debug!(%encoding, reason, "skipping response compression");
            self.state = State::Passthrough;
            return;
        }

        prepare_compressed_headers(self.inner.headers_mut(), encoding);
        debug!(%encoding, "compressing response");
        self.state = State::Compressing(Compressor::new(encoding, self.config.compression_level()));
    }

    /// Takes the decision and sends the head, unless that already happened.
    fn commit(&mut self, status: StatusCode) -> io::Result<()> {
        if self.is_decided() {
            return Ok(());
        }
        self.decide(status);
        if let Err(error) = self.inner.write_head(status) {
            self.state = State::Failed;
            return Err(error);
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if matches!(self.state, State::Failed) {
            return Err(head_failed());
        }
        self.commit(StatusCode::OK)?;

        match mem::replace(&mut self.state, State::Closed) {
            State::Compressing(mut compressor) => {
                self.scratch.clear();
                compressor.finish(&mut self.scratch)?;
                trace!(
                    encoding = %compressor.encoding(),
                    trailer_len = self.scratch.len(),
                    "finished compressed response"
                );
                self.inner.write_all(&self.scratch)
            }
            _ => Ok(()),
        }
    }
}

fn closed() -> io::Error {
    io::Error::other("response writer already closed")
}

fn head_failed() -> io::Error {
    io::Error::other("response head was not written")
}

impl<W: ResponseWriter> Write for CompressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.commit(StatusCode::OK)?;

        match &mut self.state {
            State::Compressing(compressor) => {
                self.scratch.clear();
                compressor.encode(buf, &mut self.scratch)?;
                if !self.scratch.is_empty() {
                    self.inner.write_all(&self.scratch)?;
                }
                Ok(buf.len())
            }
            State::Passthrough => self.inner.write(buf),
            State::Failed => Err(head_failed()),
            // `commit` never leaves the state undecided.
            State::Undecided | State::Closed => Err(closed()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit(StatusCode::OK)?;

        match &mut self.state {
            State::Compressing(compressor) => {
                self.scratch.clear();
                compressor.flush(&mut self.scratch)?;
                self.inner.write_all(&self.scratch)?;
                self.inner.flush()
            }
            State::Passthrough => self.inner.flush(),
            State::Failed => Err(head_failed()),
            State::Undecided | State::Closed => Err(closed()),
        }
    }
}

impl<W: ResponseWriter> ResponseWriter for CompressWriter<W> {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        match self.state {
            State::Undecided => self.commit(status),
            State::Closed => Err(closed()),
            State::Failed => Err(head_failed()),
            // Repeated heads are the underlying writer's business.
            State::Passthrough | State::Compressing(_) => self.inner.write_head(status),
        }
    }
}

impl<W: ResponseWriter> Drop for CompressWriter<W> {
    fn drop(&mut self) {
        if matches!(self.state, State::Closed | State::Failed) {
            return;
        }
        if let Err(error) = self.close() {
            warn!(%error, "failed to finish response on drop");
        }
    }
}

impl<W: ResponseWriter> fmt::Debug for CompressWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressWriter")
            .field("encoding", &self.encoding)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ContentTypePolicy;
    use crate::recorder::ResponseRecorder;
    use flate2::read::{DeflateDecoder, GzDecoder};
    use http::header::{self, HeaderValue};
    use std::io::Read;

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut decoded = Vec::new();
        GzDecoder::new(data).read_to_end(&mut decoded).unwrap();
        decoded
    }

    fn writer(
        recorder: &mut ResponseRecorder,
        encoding: Option<Encoding>,
    ) -> CompressWriter<&mut ResponseRecorder> {
        CompressWriter::new(recorder, encoding, CompressionConfig::default())
    }

    #[test]
    fn test_header_mutation_before_write_passes_through() {
        let mut recorder = ResponseRecorder::new();
        let mut w = writer(&mut recorder, Some(Encoding::Gzip));

        w.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        assert!(!w.is_decided());
        let headers = w.get_ref().headers();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/html");
        assert!(headers.get(header::CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_first_write_decides_and_compresses() {
        let mut recorder = ResponseRecorder::new();
        let mut w = writer(&mut recorder, Some(Encoding::Gzip));
        w.headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("11"));

        w.write_all(b"hello world").unwrap();
        assert_eq!(w.active_encoding(), Some(Encoding::Gzip));
        w.finish().unwrap();

        let response = recorder.into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert_eq!(
            response.headers().get(header::VARY).unwrap(),
            "Accept-Encoding"
        );
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert_eq!(gunzip(response.body()), b"hello world");
    }

    #[test]
    fn test_no_encoding_is_verbatim() {
        let mut recorder = ResponseRecorder::new();
        let mut w = writer(&mut recorder, None);
        w.headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("11"));
        w.write_all(b"hello ").unwrap();
        w.write_all(b"world").unwrap();
        assert!(w.is_decided());
        assert_eq!(w.active_encoding(), None);
        w.finish().unwrap();

        let response = recorder.into_response();
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(response.headers().get(header::VARY).is_none());
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            "11"
        );
        assert_eq!(&response.body()[..], b"hello world");
    }

    #[test]
    fn test_later_header_mutation_does_not_redecide() {
        let mut recorder = ResponseRecorder::new();
        let config = CompressionConfig::new().policy(ContentTypePolicy::exclude(["image/png"]));
        let mut w = CompressWriter::new(&mut recorder, Some(Encoding::Gzip), config);

        w.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        w.write_all(b"first").unwrap();

        // Too late to matter: the decision is frozen.
        w.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        w.headers_mut().remove(header::CONTENT_ENCODING);
        w.write_all(b" second").unwrap();
        assert_eq!(w.active_encoding(), Some(Encoding::Gzip));
        w.finish().unwrap();

        let response = recorder.into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
        assert_eq!(gunzip(response.body()), b"first second");
    }

    #[test]
    fn test_explicit_head_decides() {
        let mut recorder = ResponseRecorder::new();
        let mut w = writer(&mut recorder, Some(Encoding::Deflate));
        w.write_head(StatusCode::CREATED).unwrap();
        assert_eq!(w.active_encoding(), Some(Encoding::Deflate));
        w.write_all(b"created").unwrap();
        w.finish().unwrap();

        let response = recorder.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "deflate"
        );

        let mut decoded = Vec::new();
        DeflateDecoder::new(&response.body()[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"created");
    }

    #[test]
    fn test_bodyless_status_is_not_compressed() {
        let mut recorder = ResponseRecorder::new();
        let mut w = writer(&mut recorder, Some(Encoding::Gzip));
        w.write_head(StatusCode::NOT_MODIFIED).unwrap();
        assert!(w.is_decided());
        assert_eq!(w.active_encoding(), None);
        w.finish().unwrap();

        let response = recorder.into_response();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_empty_body_produces_valid_stream() {
        let mut recorder = ResponseRecorder::new();
        let w = writer(&mut recorder, Some(Encoding::Gzip));
        w.finish().unwrap();

        let response = recorder.into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert!(!response.body().is_empty());
        assert!(gunzip(response.body()).is_empty());
    }

    #[test]
    fn test_drop_finishes_stream() {
        let mut recorder = ResponseRecorder::new();
        {
            let mut w = writer(&mut recorder, Some(Encoding::Gzip));
            w.write_all(b"dropped, not finished").unwrap();
        }
        assert_eq!(gunzip(recorder.body()), b"dropped, not finished");
    }

    #[test]
    fn test_flush_emits_decodable_prefix() {
        let mut recorder = ResponseRecorder::new();
        let mut w = writer(&mut recorder, Some(Encoding::Deflate));
        w.write_all(b"data: 1\n\n").unwrap();
        w.flush().unwrap();

        let flushed = w.get_ref().body().clone();
        let mut decompress = flate2::Decompress::new(false);
        let mut decoded = Vec::with_capacity(64);
        decompress
            .decompress_vec(&flushed, &mut decoded, flate2::FlushDecompress::Sync)
            .unwrap();
        assert_eq!(decoded, b"data: 1\n\n");
        assert!(w.get_ref().is_flushed());
    }

    #[test]
    fn test_use_after_finish_is_an_error() {
        let mut recorder = ResponseRecorder::new();
        let mut w = writer(&mut recorder, Some(Encoding::Gzip));
        w.close().unwrap();

        assert!(w.write(b"late").is_err());
        assert!(w.flush().is_err());
        assert!(w.write_head(StatusCode::OK).is_err());
        // Closing twice is a no-op.
        assert!(w.close().is_ok());
    }

    /// A sink whose body writes always fail.
    #[derive(Default)]
    struct BrokenPipe {
        headers: HeaderMap,
    }

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ResponseWriter for BrokenPipe {
        fn headers(&self) -> &HeaderMap {
            &self.headers
        }

        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write_head(&mut self, _status: StatusCode) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_underlying_error_propagates_verbatim() {
        let mut w = CompressWriter::new(BrokenPipe::default(), None, CompressionConfig::default());
        let err = w.write(b"payload").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        // With compression the error surfaces at the latest when the footer is written.
        let w = CompressWriter::new(
            BrokenPipe::default(),
            Some(Encoding::Gzip),
            CompressionConfig::default(),
        );
        let err = w.finish().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    /// A sink that refuses the head and counts body writes.
    #[derive(Default)]
    struct HeadRefused {
        headers: HeaderMap,
        body_writes: usize,
    }

    impl Write for HeadRefused {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.body_writes += 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ResponseWriter for HeadRefused {
        fn headers(&self) -> &HeaderMap {
            &self.headers
        }

        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write_head(&mut self, _status: StatusCode) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer gone"))
        }
    }

    #[test]
    fn test_failed_head_stops_all_writes() {
        let mut sink = HeadRefused::default();
        let config = CompressionConfig::default();
        let mut w = CompressWriter::new(&mut sink, Some(Encoding::Gzip), config);

        let err = w.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(w.write(b"y").is_err());
        assert!(w.flush().is_err());
        assert!(w.write_head(StatusCode::OK).is_err());
        assert!(w.finish().is_err());

        assert_eq!(sink.body_writes, 0);
    }

    #[test]
    fn test_failed_head_drop_writes_nothing() {
        let mut sink = HeadRefused::default();
        {
            let mut w = CompressWriter::new(&mut sink, None, CompressionConfig::default());
            assert!(w.write_head(StatusCode::CREATED).is_err());
        }
        assert_eq!(sink.body_writes, 0);
    }

    #[test]
    fn test_boxed_trait_object_writer() {
        let boxed: Box<dyn ResponseWriter> = Box::new(ResponseRecorder::new());
        let mut w = CompressWriter::new(boxed, Some(Encoding::Gzip), CompressionConfig::default());
        w.write_all(b"boxed").unwrap();
        assert_eq!(w.active_encoding(), Some(Encoding::Gzip));
        assert_eq!(
            w.get_ref().headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
    }
}
