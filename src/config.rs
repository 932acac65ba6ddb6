use crate::codec::CompressionLevel;
use crate::policy::ContentTypePolicy;

/// Construction-time settings shared by every response of a middleware instance.
///
/// The defaults compress every content type at the codec's default level,
/// regardless of size.
#[derive(Debug, Clone, Default)]
pub struct CompressionConfig {
    level: CompressionLevel,
    policy: ContentTypePolicy,
    min_size: usize,
}

impl CompressionConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compression level.
    pub fn level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the content-type exclusion policy.
    pub fn policy(mut self, policy: ContentTypePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the minimum body size required for compression.
    ///
    /// Responses with a declared Content-Length smaller than this value
    /// will not be compressed. Responses of unknown length always qualify.
    pub fn min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    pub(crate) fn compression_level(&self) -> CompressionLevel {
        self.level
    }

    pub(crate) fn content_type_policy(&self) -> &ContentTypePolicy {
        &self.policy
    }

    pub(crate) fn min_body_size(&self) -> usize {
        self.min_size
    }
}
