use crate::codec::CompressionLevel;
use crate::config::CompressionConfig;
use crate::policy::ContentTypePolicy;
use crate::service::CompressionService;
use tower::Layer;

/// A Tower layer that compresses HTTP response bodies.
///
/// This layer wraps services and compresses response bodies with gzip or
/// deflate based on the client's Accept-Encoding header.
#[derive(Debug, Clone, Default)]
pub struct CompressionLayer {
    config: CompressionConfig,
}

impl CompressionLayer {
    /// Creates a new compression layer with default settings.
    ///
    /// By default every content type is compressed at the default level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a compression layer from a full configuration.
    pub fn with_config(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Sets the compression level.
    pub fn level(mut self, level: CompressionLevel) -> Self {
        self.config = self.config.level(level);
        self
    }

    /// Sets the content-type exclusion policy.
    pub fn policy(mut self, policy: ContentTypePolicy) -> Self {
        self.config = self.config.policy(policy);
        self
    }

    /// Sets the minimum body size required for compression.
    ///
    /// Responses with a known Content-Length smaller than this value
    /// will not be compressed.
    pub fn min_size(mut self, size: usize) -> Self {
        self.config = self.config.min_size(size);
        self
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, self.config.clone())
    }
}
