//! Content-type exclusion and the header rewrite applied when compressing.

use crate::codec::Encoding;
use crate::config::CompressionConfig;
use http::StatusCode;
use http::header::{self, HeaderMap, HeaderValue};
use std::fmt;
use std::sync::Arc;

type Predicate = dyn Fn(&str) -> bool + Send + Sync;

/// Decides which response content types are never compressed.
///
/// The predicate sees the raw `Content-Type` value as declared by the
/// handler. Responses without a (UTF-8) `Content-Type` are never excluded.
#[derive(Clone, Default)]
pub struct ContentTypePolicy {
    exclude: Option<Arc<Predicate>>,
}

impl ContentTypePolicy {
    /// A policy that compresses every content type. This is the default.
    pub fn compress_all() -> Self {
        Self { exclude: None }
    }

    /// Skips the listed media types.
    ///
    /// Matching ignores parameters (`; charset=...`), surrounding whitespace
    /// and ASCII case, so `"image/png"` also excludes `"Image/PNG; q=1"`.
    pub fn exclude<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let types: Vec<String> = types
            .into_iter()
            .map(|t| t.into().trim().to_ascii_lowercase())
            .collect();

        Self::from_fn(move |content_type| {
            let essence = essence(content_type);
            types.iter().any(|t| t.eq_ignore_ascii_case(essence))
        })
    }

    /// Skips formats that are already compressed: images other than SVG, and
    /// gRPC other than gRPC-web (which frames its own compression).
    pub fn skip_incompressible() -> Self {
        Self::from_fn(|content_type| {
            let content_type = content_type.trim_start();

            if content_type.starts_with("image/") {
                return !content_type.starts_with("image/svg+xml");
            }

            if content_type.starts_with("application/grpc") {
                return !content_type.starts_with("application/grpc-web");
            }

            false
        })
    }

    /// Uses `exclude` as the predicate; it returns `true` for content types
    /// that must not be compressed.
    pub fn from_fn<F>(exclude: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            exclude: Some(Arc::new(exclude)),
        }
    }

    /// Returns `true` if a response with this content type must not be compressed.
    pub fn excludes(&self, content_type: &str) -> bool {
        self.exclude
            .as_ref()
            .is_some_and(|exclude| exclude(content_type))
    }
}

impl fmt::Debug for ContentTypePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exclude {
            None => f.write_str("ContentTypePolicy::CompressAll"),
            Some(_) => f.write_str("ContentTypePolicy::Exclude(..)"),
        }
    }
}

/// The media type without parameters, e.g. `text/plain` for `text/plain; charset=utf-8`.
fn essence(content_type: &str) -> &str {
    content_type
        .split_once(';')
        .map_or(content_type, |(essence, _)| essence)
        .trim()
}

/// Returns why a response with these headers must be passed through
/// uncompressed, or `None` if it may be compressed.
pub(crate) fn skip_reason(headers: &HeaderMap, config: &CompressionConfig) -> Option<&'static str> {
    if headers.contains_key(header::CONTENT_ENCODING) {
        return Some("already encoded");
    }

    if headers.contains_key(header::CONTENT_RANGE) {
        return Some("range response");
    }

    let excluded = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| config.content_type_policy().excludes(ct));
    if excluded {
        return Some("excluded content type");
    }

    let below_min_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
        .is_some_and(|len| len < config.min_body_size());
    if below_min_size {
        return Some("below minimum size");
    }

    None
}

/// Returns `false` for statuses whose responses never carry a body.
pub(crate) fn status_allows_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Rewrites the response headers for a body encoded with `encoding`.
pub(crate) fn prepare_compressed_headers(headers: &mut HeaderMap, encoding: Encoding) {
    // The compressed size is unknown; a stale length would truncate the body.
    headers.remove(header::CONTENT_LENGTH);

    // Byte ranges of the original representation do not apply to the encoded one.
    headers.remove(header::ACCEPT_RANGES);

    headers.insert(
        header::CONTENT_ENCODING,
        HeaderValue::from_static(encoding.content_encoding()),
    );

    add_vary_accept_encoding(headers);
}

/// Adds Accept-Encoding to the Vary header if not already present.
///
/// An existing single `Vary` value is extended in place (`"Origin"` becomes
/// `"Origin, Accept-Encoding"`); `*` already covers every request header.
fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    // Check all Vary headers to see if Accept-Encoding is already present
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let covered = vary_str.split(',').any(|v| {
                let v = v.trim();
                v == "*" || v.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }

    let joined = match headers.get(header::VARY).map(|v| v.to_str()) {
        Some(Ok(existing)) if !existing.trim().is_empty() => {
            HeaderValue::from_str(&format!("{}, Accept-Encoding", existing.trim_end())).ok()
        }
        _ => None,
    };

    match joined {
        Some(value) => {
            // Only the first value is rewritten; any further Vary lines stay as they are.
            if let header::Entry::Occupied(mut entry) = headers.entry(header::VARY) {
                let rest: Vec<HeaderValue> = entry.iter().skip(1).cloned().collect();
                entry.insert(value);
                for extra in rest {
                    entry.append(extra);
                }
            }
        }
        None if headers.contains_key(header::VARY) => {
            headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        }
        None => {
            headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        }
    }
}

/// Checks if the response must be flushed after every chunk (e.g., streaming).
pub(crate) fn is_streaming_response(headers: &HeaderMap) -> bool {
    let no_buffering = headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("no"));

    no_buffering
        || headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
            })
}
