//! Suitability classification of a matched entry against a live request
//! (C5).

use crate::directives::CacheControl;
use crate::entry::CacheEntry;
use crate::validity::{self, ValidityOptions};
use http::HeaderMap;
use std::time::{Duration, SystemTime};

/// Spec §3 `SuitabilityClass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuitabilityClass {
    Fresh,
    FreshEnough,
    Stale,
    StaleWhileRevalidated,
    RevalidationRequired,
    Mismatch,
}

/// Everything C5 needs to classify one matched entry (keeps the function
/// signature from growing unboundedly as more of C3's outputs are needed).
pub struct SuitabilityInputs<'a> {
    pub request_cc: &'a CacheControl,
    pub response_cc: &'a CacheControl,
    pub entry: &'a CacheEntry,
    pub request_selector_matches: bool,
    pub now: SystemTime,
    pub opts: ValidityOptions,
}

/// Classifies per spec §4.5.
pub fn classify(inputs: &SuitabilityInputs) -> SuitabilityClass {
    if !inputs.request_selector_matches {
        return SuitabilityClass::Mismatch;
    }

    let headers = inputs.entry.headers.to_header_map();
    let current_age = validity::current_age(
        &headers,
        inputs.entry.request_instant,
        inputs.entry.response_instant,
        inputs.now,
    );
    let freshness_lifetime = validity::freshness_lifetime_for_status(
        inputs.entry.status,
        &headers,
        inputs.response_cc,
        inputs.opts,
    );
    let staleness = validity::staleness(current_age, freshness_lifetime);

    if validity::must_revalidate_before_use(
        inputs.request_cc,
        inputs.response_cc,
        inputs.opts,
        current_age,
        freshness_lifetime,
        staleness,
    ) {
        return SuitabilityClass::RevalidationRequired;
    }

    let min_fresh_ok = inputs.request_cc.min_fresh < 0
        || freshness_lifetime.saturating_sub(current_age)
            >= Duration::from_secs(inputs.request_cc.min_fresh as u64);

    if current_age < freshness_lifetime && min_fresh_ok {
        return SuitabilityClass::Fresh;
    }

    let within_max_stale = inputs.request_cc.max_stale_unbounded
        || (inputs.request_cc.max_stale >= 0
            && staleness <= Duration::from_secs(inputs.request_cc.max_stale as u64));
    if within_max_stale && staleness > Duration::ZERO {
        return SuitabilityClass::FreshEnough;
    }

    if validity::may_serve_stale_while_revalidating(inputs.response_cc, staleness) {
        return SuitabilityClass::StaleWhileRevalidated;
    }

    SuitabilityClass::Stale
}

/// True iff the request carries any precondition header (spec §4.5
/// `isConditional`).
pub fn is_conditional(headers: &HeaderMap) -> bool {
    headers.contains_key(http::header::IF_NONE_MATCH)
        || headers.contains_key(http::header::IF_MODIFIED_SINCE)
        || headers.contains_key(http::header::IF_MATCH)
        || headers.contains_key(http::header::IF_UNMODIFIED_SINCE)
}

/// Strict ETag comparison for `If-None-Match`, date comparison for
/// `If-Modified-Since` (spec §4.5 `allConditionalsMatch`).
pub fn all_conditionals_match(request_headers: &HeaderMap, entry: &CacheEntry) -> bool {
    let mut checked_any = false;
    if let Some(inm) = request_headers
        .get(http::header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        checked_any = true;
        let Some(etag) = entry.etag() else { return false };
        let matches = inm
            .split(',')
            .map(str::trim)
            .any(|candidate| candidate == "*" || candidate == etag);
        if !matches {
            return false;
        }
    }
    if let Some(ims) = request_headers
        .get(http::header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
    {
        checked_any = true;
        let (Some(since), Some(lm)) = (
            httpdate::parse_http_date(ims).ok(),
            entry.last_modified().and_then(|v| httpdate::parse_http_date(v).ok()),
        ) else {
            return false;
        };
        if lm > since {
            return false;
        }
    }
    checked_any
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entry::StoredHeaders;
    use http::{HeaderValue, Method, StatusCode};

    fn entry_dated_epoch() -> CacheEntry {
        CacheEntry {
            method: Method::GET,
            uri: "http://example.org/a".into(),
            variant_selector_fields: StoredHeaders::default(),
            status: StatusCode::OK,
            headers: StoredHeaders(vec![(
                "date".into(),
                httpdate::fmt_http_date(SystemTime::UNIX_EPOCH),
            )]),
            resource: None,
            request_instant: SystemTime::UNIX_EPOCH,
            response_instant: SystemTime::UNIX_EPOCH,
            variants: None,
        }
    }

    #[test]
    fn mismatch_short_circuits() {
        let entry = entry_dated_epoch();
        let inputs = SuitabilityInputs {
            request_cc: &CacheControl::default(),
            response_cc: &CacheControl::default(),
            entry: &entry,
            request_selector_matches: false,
            now: SystemTime::UNIX_EPOCH,
            opts: ValidityOptions::default(),
        };
        assert_eq!(classify(&inputs), SuitabilityClass::Mismatch);
    }

    #[test]
    fn fresh_within_max_age() {
        let entry = entry_dated_epoch();
        let response_cc = CacheControl { max_age: 60, ..Default::default() };
        let inputs = SuitabilityInputs {
            request_cc: &CacheControl::default(),
            response_cc: &response_cc,
            entry: &entry,
            request_selector_matches: true,
            now: SystemTime::UNIX_EPOCH + Duration::from_secs(30),
            opts: ValidityOptions::default(),
        };
        assert_eq!(classify(&inputs), SuitabilityClass::Fresh);
    }

    #[test]
    fn stale_while_revalidate_classification() {
        let entry = entry_dated_epoch();
        let response_cc = CacheControl {
            max_age: 5,
            stale_while_revalidate: 30,
            ..Default::default()
        };
        let inputs = SuitabilityInputs {
            request_cc: &CacheControl::default(),
            response_cc: &response_cc,
            entry: &entry,
            request_selector_matches: true,
            now: SystemTime::UNIX_EPOCH + Duration::from_secs(10),
            opts: ValidityOptions::default(),
        };
        assert_eq!(classify(&inputs), SuitabilityClass::StaleWhileRevalidated);
    }

    #[test]
    fn revalidation_required_on_request_no_cache() {
        let entry = entry_dated_epoch();
        let request_cc = CacheControl { no_cache: true, ..Default::default() };
        let response_cc = CacheControl { max_age: 60, ..Default::default() };
        let inputs = SuitabilityInputs {
            request_cc: &request_cc,
            response_cc: &response_cc,
            entry: &entry,
            request_selector_matches: true,
            now: SystemTime::UNIX_EPOCH,
            opts: ValidityOptions::default(),
        };
        assert_eq!(classify(&inputs), SuitabilityClass::RevalidationRequired);
    }

    #[test]
    fn is_conditional_detects_if_none_match() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::IF_NONE_MATCH, HeaderValue::from_static("\"v1\""));
        assert!(is_conditional(&headers));
    }

    #[test]
    fn all_conditionals_match_etag() {
        let entry = CacheEntry {
            method: Method::GET,
            uri: "http://example.org/a".into(),
            variant_selector_fields: StoredHeaders::default(),
            status: StatusCode::OK,
            headers: StoredHeaders(vec![("etag".into(), "\"v1\"".into())]),
            resource: None,
            request_instant: SystemTime::UNIX_EPOCH,
            response_instant: SystemTime::UNIX_EPOCH,
            variants: None,
        };
        let mut headers = HeaderMap::new();
        headers.insert(http::header::IF_NONE_MATCH, HeaderValue::from_static("\"v1\""));
        assert!(all_conditionals_match(&headers, &entry));
        headers.insert(http::header::IF_NONE_MATCH, HeaderValue::from_static("\"other\""));
        assert!(!all_conditionals_match(&headers, &entry));
    }
}
