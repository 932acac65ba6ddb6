//! Handlers that write their response through a [`ResponseWriter`].

use crate::codec::CompressionLevel;
use crate::config::CompressionConfig;
use crate::negotiate;
use crate::writer::{CompressWriter, ResponseWriter};
use http::Request;
use std::io;
use std::sync::Arc;

/// Serves a request by writing the response to `w`.
pub trait Handler<B> {
    /// Handles `req`, writing the response head and body to `w`.
    fn serve(&self, req: &Request<B>, w: &mut dyn ResponseWriter) -> io::Result<()>;
}

impl<B, H: Handler<B> + ?Sized> Handler<B> for Arc<H> {
    fn serve(&self, req: &Request<B>, w: &mut dyn ResponseWriter) -> io::Result<()> {
        (**self).serve(req, w)
    }
}

/// A [`Handler`] backed by a closure. Created by [`handler_fn`].
#[derive(Debug, Clone, Copy)]
pub struct HandlerFn<F>(F);

/// Turns a closure into a [`Handler`].
pub fn handler_fn<B, F>(f: F) -> HandlerFn<F>
where
    F: Fn(&Request<B>, &mut dyn ResponseWriter) -> io::Result<()>,
{
    HandlerFn(f)
}

impl<B, F> Handler<B> for HandlerFn<F>
where
    F: Fn(&Request<B>, &mut dyn ResponseWriter) -> io::Result<()>,
{
    fn serve(&self, req: &Request<B>, w: &mut dyn ResponseWriter) -> io::Result<()> {
        (self.0)(req, w)
    }
}

/// Wraps `inner` so its responses are compressed when the client accepts it.
pub fn compress_handler<H>(inner: H) -> CompressHandler<H> {
    CompressHandler::new(inner)
}

/// A [`Handler`] that compresses the responses of an inner handler.
///
/// The encoding is negotiated from the request's `Accept-Encoding` headers.
/// The inner handler writes to a [`CompressWriter`], which is finished once
/// the handler returns; if the handler panics, the writer is finished while
/// unwinding.
#[derive(Debug, Clone)]
pub struct CompressHandler<H> {
    inner: H,
    config: CompressionConfig,
}

impl<H> CompressHandler<H> {
    /// Wraps `inner` with default settings.
    pub fn new(inner: H) -> Self {
        Self::with_config(inner, CompressionConfig::default())
    }

    /// Wraps `inner`, compressing at `level`.
    pub fn with_level(inner: H, level: CompressionLevel) -> Self {
        Self::with_config(inner, CompressionConfig::new().level(level))
    }

    /// Wraps `inner` with the given settings.
    pub fn with_config(inner: H, config: CompressionConfig) -> Self {
        Self { inner, config }
    }

    /// Returns a reference to the inner handler.
    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Consumes this handler, returning the inner handler.
    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<B, H: Handler<B>> Handler<B> for CompressHandler<H> {
    fn serve(&self, req: &Request<B>, w: &mut dyn ResponseWriter) -> io::Result<()> {
        let encoding = negotiate::from_headers(req.headers());
        let mut writer = CompressWriter::new(w, encoding, self.config.clone());

        let served = self.inner.serve(req, &mut writer);
        let finished = writer.finish();
        served.and(finished)
    }
}
