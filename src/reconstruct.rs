//! Response reconstructor (C8): builds a synthetic response from a stored
//! entry and a live request.

use crate::entry::CacheEntry;
use crate::validity;
use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode};
use std::time::SystemTime;

/// A reconstructed or synthesized response, decoupled from any particular
/// HTTP client crate's response type (the engine's output type; callers
/// adapt it to their own `http::Response<T>` shape the way the teacher's
/// `HttpResponse` sits between the engine and `reqwest`/`surf`).
#[derive(Debug, Clone)]
pub struct ReconstructedResponse {
    pub status: StatusCode,
    pub headers: http::HeaderMap,
    pub body: Option<Bytes>,
}

/// `generateResponse(request, entry)` (spec §4.8): status and headers equal
/// the entry's, with `Age` recomputed and `Transfer-Encoding` stripped;
/// body present iff the request is GET.
pub fn generate_response(
    request_method: &Method,
    entry: &CacheEntry,
    now: SystemTime,
) -> crate::error::Result<ReconstructedResponse> {
    let mut headers = entry.headers.to_header_map();
    headers.remove(http::header::TRANSFER_ENCODING);

    let current_age = validity::current_age(
        &headers,
        entry.request_instant,
        entry.response_instant,
        now,
    );
    let clipped = current_age.as_secs().min(i32::MAX as u64);
    headers.insert(http::header::AGE, HeaderValue::from(clipped as u32));

    let body = if *request_method == Method::GET {
        match &entry.resource {
            Some(resource) => Some(resource.get()?),
            None => None,
        }
    } else {
        None
    };

    Ok(ReconstructedResponse { status: entry.status, headers, body })
}

/// `generateNotModifiedResponse(entry)` (spec §4.8): status 304 carrying
/// only `Date` (synthesized if absent), `ETag`, `Content-Location`,
/// `Expires`, `Cache-Control`, `Vary`, and (only when `ETag` absent)
/// `Last-Modified`.
pub fn generate_not_modified_response(entry: &CacheEntry, now: SystemTime) -> ReconstructedResponse {
    let mut headers = http::HeaderMap::new();
    let source = entry.headers.to_header_map();

    let date = source
        .get(http::header::DATE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_str(&httpdate::fmt_http_date(now)).unwrap());
    headers.insert(http::header::DATE, date);

    for name in [
        http::header::CONTENT_LOCATION,
        http::header::EXPIRES,
        http::header::CACHE_CONTROL,
        http::header::VARY,
    ] {
        if let Some(v) = source.get(&name) {
            headers.insert(name, v.clone());
        }
    }

    if let Some(etag) = source.get(http::header::ETAG) {
        headers.insert(http::header::ETAG, etag.clone());
    } else if let Some(lm) = source.get(http::header::LAST_MODIFIED) {
        headers.insert(http::header::LAST_MODIFIED, lm.clone());
    }

    ReconstructedResponse { status: StatusCode::NOT_MODIFIED, headers, body: None }
}

/// `generateGatewayTimeout()` (spec §4.8): a bare 504, used for
/// `only-if-cached` misses and exhausted stale-if-error fallbacks.
pub fn generate_gateway_timeout() -> ReconstructedResponse {
    ReconstructedResponse {
        status: StatusCode::GATEWAY_TIMEOUT,
        headers: http::HeaderMap::new(),
        body: None,
    }
}
