use crate::body::CompressionBody;
use crate::codec::Encoding;
use crate::config::CompressionConfig;
use crate::policy::{
    is_streaming_response, prepare_compressed_headers, skip_reason, status_allows_body,
};
use http::Response;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, trace};

pin_project! {
    /// Future for compression service responses.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        encoding: Option<Encoding>,
        config: Arc<CompressionConfig>,
    }
}

impl<F> ResponseFuture<F> {
    pub(crate) fn new(
        inner: F,
        encoding: Option<Encoding>,
        config: Arc<CompressionConfig>,
    ) -> Self {
        Self {
            inner,
            encoding,
            config,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(response)) => {
                let response = wrap_response(response, *this.encoding, this.config);
                Poll::Ready(Ok(response))
            }
        }
    }
}

/// Wraps the response body with compression if appropriate.
///
/// The response head is the decision point: it is inspected once, and the
/// headers are rewritten before the body is handed on.
fn wrap_response<B>(
    response: Response<B>,
    encoding: Option<Encoding>,
    config: &CompressionConfig,
) -> Response<CompressionBody<B>> {
    let (mut parts, body) = response.into_parts();

    let Some(encoding) = encoding else {
        trace!("no acceptable encoding, passing response through");
        return Response::from_parts(parts, CompressionBody::passthrough(body));
    };

    let reason = if status_allows_body(parts.status) {
        skip_reason(&parts.headers, config)
    } else {
        Some("status without body")
    };
    if let Some(reason) = reason {
        debug!(%encoding, reason, "skipping response compression");
        return Response::from_parts(parts, CompressionBody::passthrough(body));
    }

    let always_flush = is_streaming_response(&parts.headers);

    prepare_compressed_headers(&mut parts.headers, encoding);
    debug!(%encoding, always_flush, "compressing response");

    let level = config.compression_level();
    let body = CompressionBody::compressed(body, encoding, level, always_flush);
    Response::from_parts(parts, body)
}
