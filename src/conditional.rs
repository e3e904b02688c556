//! Conditional-request builder (C7): conditional, unconditional, and
//! variant-negotiation requests derived from a template request.

use crate::entry::CacheEntry;
use http::{HeaderMap, HeaderValue};

/// Builds a conditional revalidation request against one matched entry
/// (spec §4.7): `If-None-Match`/`If-Modified-Since` from the entry's
/// validators, plus `Cache-Control: max-age=0` when the entry demands
/// revalidation on every use.
pub fn build_conditional_request(template: &HeaderMap, entry: &CacheEntry) -> HeaderMap {
    let mut headers = template.clone();
    headers.remove(http::header::IF_NONE_MATCH);
    headers.remove(http::header::IF_MODIFIED_SINCE);

    if let Some(etag) = entry.etag() {
        if let Ok(v) = HeaderValue::from_str(etag) {
            headers.insert(http::header::IF_NONE_MATCH, v);
        }
    }
    if let Some(lm) = entry.last_modified() {
        if entry.etag().is_none() || headers.get(http::header::IF_NONE_MATCH).is_some() {
            if let Ok(v) = HeaderValue::from_str(lm) {
                headers.insert(http::header::IF_MODIFIED_SINCE, v);
            }
        }
    }

    let must_revalidate = entry
        .headers
        .get("cache-control")
        .map(|cc| {
            let lower = cc.to_ascii_lowercase();
            lower.contains("must-revalidate") || lower.contains("proxy-revalidate")
        })
        .unwrap_or(false);
    if must_revalidate {
        headers.insert(
            http::header::CACHE_CONTROL,
            HeaderValue::from_static("max-age=0"),
        );
    }
    headers
}

/// Builds a conditional variant-negotiation request: `If-None-Match` set to
/// a comma-joined list of all known variant ETags (spec §4.7).
pub fn build_variant_negotiation_request(
    template: &HeaderMap,
    variant_etags: &[String],
) -> HeaderMap {
    let mut headers = template.clone();
    headers.remove(http::header::IF_NONE_MATCH);
    headers.remove(http::header::IF_MODIFIED_SINCE);
    if !variant_etags.is_empty() {
        let joined = variant_etags.join(", ");
        if let Ok(v) = HeaderValue::from_str(&joined) {
            headers.insert(http::header::IF_NONE_MATCH, v);
        }
    }
    headers
}

/// Builds an unconditional request: adds `Cache-Control: no-cache`,
/// `Pragma: no-cache`, and strips any `If-*` headers (spec §4.7
/// `buildUnconditionalRequest`).
pub fn build_unconditional_request(template: &HeaderMap) -> HeaderMap {
    let mut headers = template.clone();
    headers.remove(http::header::IF_NONE_MATCH);
    headers.remove(http::header::IF_MODIFIED_SINCE);
    headers.remove(http::header::IF_MATCH);
    headers.remove(http::header::IF_UNMODIFIED_SINCE);
    headers.remove(http::header::IF_RANGE);
    headers.insert(
        http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );
    headers.insert(http::header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}
