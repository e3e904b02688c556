//! Request admissibility policy (C4): whether a request may be resolved
//! against the cache at all.

use crate::directives::CacheControl;
use http::{Method, Version};

/// The outcome of admitting a request to cache resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Eligible for cache lookup.
    Admissible,
    /// Bypass the cache entirely and call the downstream executor
    /// (`Range`/`If-Range`, non-GET/HEAD methods, `no-store`, HTTP/2+).
    Bypass,
    /// `OPTIONS *` with `Max-Forwards: 0`: answer directly with 501, never
    /// touching the cache or the downstream executor.
    OptionsStar,
}

/// Classifies a request per spec §4.4.
pub fn classify(
    method: &Method,
    version: Version,
    uri_path: &str,
    request_headers: &http::HeaderMap,
    request_cc: &CacheControl,
) -> Admission {
    if method == Method::OPTIONS
        && uri_path == "*"
        && request_headers
            .get(http::header::MAX_FORWARDS)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false)
    {
        return Admission::OptionsStar;
    }

    if request_headers.contains_key(http::header::RANGE)
        || request_headers.contains_key(http::header::IF_RANGE)
    {
        return Admission::Bypass;
    }

    if !matches!(method, &Method::GET | &Method::HEAD) {
        return Admission::Bypass;
    }

    if version_order(version) > version_order(Version::HTTP_11) {
        return Admission::Bypass;
    }

    if request_cc.no_store {
        return Admission::Bypass;
    }

    Admission::Admissible
}

fn version_order(v: Version) -> u8 {
    match v {
        Version::HTTP_09 => 0,
        Version::HTTP_10 => 1,
        Version::HTTP_11 => 2,
        Version::HTTP_2 => 3,
        Version::HTTP_3 => 4,
        _ => 2,
    }
}
