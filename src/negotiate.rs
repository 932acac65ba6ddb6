//! `Accept-Encoding` negotiation.
//!
//! Only literal `gzip` (or its `x-gzip` alias) and `deflate` tokens count.
//! A wildcard never authorizes either, and quality values only matter as
//! "zero" (explicitly refused) versus "non-zero" (acceptable): gzip always
//! wins when both are acceptable.

use crate::codec::Encoding;
use http::HeaderMap;
use http::header::ACCEPT_ENCODING;

/// Chooses the response encoding from the request's `Accept-Encoding` headers.
///
/// Every `Accept-Encoding` value is considered; values that are not valid
/// UTF-8 are ignored.
pub fn from_headers(headers: &HeaderMap) -> Option<Encoding> {
    choose_encoding(
        headers
            .get_all(ACCEPT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok()),
    )
}

/// Chooses the response encoding from raw `Accept-Encoding` header values.
///
/// Each value is a comma-separated list of encodings with optional quality
/// values (e.g. `"gzip;q=0.8, deflate"`). Returns `None` when neither gzip
/// nor deflate is acceptable.
pub fn choose_encoding<'a, I>(values: I) -> Option<Encoding>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut gzip = false;
    let mut deflate = false;

    for part in values.into_iter().flat_map(|v| v.split(',')) {
        let (name, quality) = parse_encoding_with_quality(part.trim());

        let slot = if name.eq_ignore_ascii_case("gzip") || name.eq_ignore_ascii_case("x-gzip") {
            &mut gzip
        } else if name.eq_ignore_ascii_case("deflate") {
            &mut deflate
        } else {
            continue;
        };

        // A zero quality refuses the encoding even if it was listed earlier.
        *slot = quality > 0.0;
    }

    if gzip {
        Some(Encoding::Gzip)
    } else if deflate {
        Some(Encoding::Deflate)
    } else {
        None
    }
}

/// Parses an encoding entry like "gzip" or "deflate;q=0.8" into (encoding, quality).
///
/// Missing, malformed or out-of-range quality values count as 1.0.
fn parse_encoding_with_quality(s: &str) -> (&str, f32) {
    let mut parts = s.split(';');
    let encoding = parts.next().unwrap_or("").trim();

    let quality = parts
        .filter_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("q")
                .then(|| value.trim().parse::<f32>().ok())
                .flatten()
        })
        .next()
        .filter(|q| (0.0..=1.0).contains(q))
        .unwrap_or(1.0);

    (encoding, quality)
}
