//! Age, freshness lifetime, staleness, and stale-while-revalidate /
//! stale-if-error eligibility (C3). Grounded on the age/freshness
//! algorithm in `kornelski-rusty-http-cache-semantics`' `age()`/`max_age()`.

use crate::directives::{parse_age, parse_http_date, AgeValue, CacheControl, UNSET};
use http::HeaderMap;
use std::time::{Duration, SystemTime};

/// Stand-in for +∞ in the age/staleness arithmetic: used both for a missing
/// `Date` (apparent age) and for an `Age` header that's present but
/// malformed or negative (spec §4.3). `Duration` has no infinity of its
/// own, so this is just "large enough that any real freshness lifetime or
/// `max-stale` bound falls well under it".
const INFINITE_AGE: Duration = Duration::from_secs(u64::MAX / 2);

/// Status codes the heuristic-freshness path (§4.3 step 4) applies to.
const HEURISTIC_CACHEABLE_STATUSES: &[u16] = &[200, 203, 300, 301, 410];

/// Tunables feeding the freshness-lifetime heuristic and the shared/private
/// switch; the subset of `EngineConfig` that C3 needs.
#[derive(Debug, Clone, Copy)]
pub struct ValidityOptions {
    pub shared: bool,
    pub heuristic_caching_enabled: bool,
    pub heuristic_coefficient: f64,
    pub heuristic_default_lifetime: Duration,
}

impl Default for ValidityOptions {
    fn default() -> Self {
        ValidityOptions {
            shared: true,
            heuristic_caching_enabled: false,
            heuristic_coefficient: 0.1,
            heuristic_default_lifetime: Duration::ZERO,
        }
    }
}

/// The current age of an entry per RFC 7234 §4.2.3.
pub fn current_age(
    response_headers: &HeaderMap,
    request_instant: SystemTime,
    response_instant: SystemTime,
    now: SystemTime,
) -> Duration {
    let date = parse_http_date(response_headers, http::header::DATE);
    let apparent_age = match date {
        Some(date) => response_instant.duration_since(date).unwrap_or(Duration::ZERO),
        None => INFINITE_AGE,
    };
    let age_value = match parse_age(response_headers) {
        AgeValue::Missing => Duration::ZERO,
        AgeValue::Invalid => INFINITE_AGE,
        AgeValue::Seconds(secs) => Duration::from_secs(secs),
    };
    let corrected_received_age = apparent_age.max(age_value);
    let response_delay =
        response_instant.duration_since(request_instant).unwrap_or(Duration::ZERO);
    let corrected_initial_age = corrected_received_age + response_delay;
    let resident_time = now.duration_since(response_instant).unwrap_or(Duration::ZERO);
    corrected_initial_age + resident_time
}

/// The freshness lifetime of a response per RFC 7234 §4.2.1 (spec §4.3).
/// `status` gates the heuristic path's "response is in the
/// heuristic-cacheable status set" condition (§4.3 step 4).
pub fn freshness_lifetime_for_status(
    status: http::StatusCode,
    response_headers: &HeaderMap,
    response_cc: &CacheControl,
    opts: ValidityOptions,
) -> Duration {
    if opts.shared && response_cc.s_maxage != UNSET && response_cc.s_maxage >= 0 {
        return Duration::from_secs(response_cc.s_maxage as u64);
    }
    if response_cc.max_age != UNSET && response_cc.max_age >= 0 {
        return Duration::from_secs(response_cc.max_age as u64);
    }
    let date = parse_http_date(response_headers, http::header::DATE);
    let expires = parse_http_date(response_headers, http::header::EXPIRES);
    if let (Some(date), Some(expires)) = (date, expires) {
        return expires.saturating_duration_since(date);
    }
    if opts.heuristic_caching_enabled
        && HEURISTIC_CACHEABLE_STATUSES.contains(&status.as_u16())
    {
        if let (Some(date), Some(last_modified)) =
            (date, parse_http_date(response_headers, http::header::LAST_MODIFIED))
        {
            if let Ok(age) = date.duration_since(last_modified) {
                return age.mul_f64(opts.heuristic_coefficient);
            }
        }
        return opts.heuristic_default_lifetime;
    }
    Duration::ZERO
}

/// `max(0, current_age - freshness_lifetime)`.
pub fn staleness(current_age: Duration, freshness_lifetime: Duration) -> Duration {
    current_age.saturating_sub(freshness_lifetime)
}

/// `stale-while-revalidate ≥ 0 AND staleness ≤ stale-while-revalidate`.
pub fn may_serve_stale_while_revalidating(
    response_cc: &CacheControl,
    staleness: Duration,
) -> bool {
    response_cc.stale_while_revalidate >= 0
        && staleness <= Duration::from_secs(response_cc.stale_while_revalidate as u64)
}

/// `stale-if-error ≥ 0` in either request or response AND staleness within
/// bound. `enabled` gates the directive per `staleIfErrorEnabled` (§6).
pub fn may_serve_stale_if_error(
    enabled: bool,
    request_cc: &CacheControl,
    response_cc: &CacheControl,
    staleness: Duration,
) -> bool {
    if !enabled {
        return false;
    }
    let bound = if response_cc.stale_if_error >= 0 {
        Some(response_cc.stale_if_error)
    } else if request_cc.stale_if_error >= 0 {
        Some(request_cc.stale_if_error)
    } else {
        None
    };
    match bound {
        Some(secs) => staleness <= Duration::from_secs(secs as u64),
        None => false,
    }
}

/// `must_revalidate_before_use` per §4.3: response `must-revalidate`, or
/// (shared AND `proxy-revalidate`), or a request directive forbids
/// staleness (`no-cache`, `max-age=0`, `max-stale` exceeded), or `min-fresh`
/// cannot be satisfied.
pub fn must_revalidate_before_use(
    request_cc: &CacheControl,
    response_cc: &CacheControl,
    opts: ValidityOptions,
    current_age: Duration,
    freshness_lifetime: Duration,
    staleness: Duration,
) -> bool {
    if response_cc.must_revalidate {
        return true;
    }
    if opts.shared && response_cc.proxy_revalidate {
        return true;
    }
    if request_cc.no_cache {
        return true;
    }
    if request_cc.max_age == 0 {
        return true;
    }
    if staleness > Duration::ZERO {
        let within_max_stale = request_cc.max_stale_unbounded
            || (request_cc.max_stale >= 0
                && staleness <= Duration::from_secs(request_cc.max_stale as u64));
        if !within_max_stale {
            return true;
        }
    }
    if request_cc.min_fresh >= 0 {
        let remaining = freshness_lifetime.saturating_sub(current_age);
        if remaining < Duration::from_secs(request_cc.min_fresh as u64) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;
    use http::HeaderValue;
    use std::time::Duration;

    fn at(epoch_secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(epoch_secs)
    }

    fn with_date(secs: u64) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            http::header::DATE,
            HeaderValue::from_str(&httpdate::fmt_http_date(at(secs))).unwrap(),
        );
        h
    }

    #[test]
    fn age_grows_with_resident_time() {
        let headers = with_date(1000);
        let age_at_response =
            current_age(&headers, at(1000), at(1000), at(1000));
        let age_later = current_age(&headers, at(1000), at(1000), at(1030));
        assert_eq!(age_at_response, Duration::ZERO);
        assert_eq!(age_later, Duration::from_secs(30));
    }

    #[test]
    fn malformed_or_negative_age_header_is_treated_as_infinite() {
        let mut malformed = with_date(1000);
        malformed.insert(http::header::AGE, HeaderValue::from_static("garbage"));
        let mut negative = with_date(1000);
        negative.insert(http::header::AGE, HeaderValue::from_static("-5"));
        let missing = with_date(1000);

        let huge = Duration::from_secs(1_000_000_000);
        assert!(current_age(&malformed, at(1000), at(1000), at(1000)) > huge);
        assert!(current_age(&negative, at(1000), at(1000), at(1000)) > huge);
        assert_eq!(current_age(&missing, at(1000), at(1000), at(1000)), Duration::ZERO);
    }

    #[test]
    fn max_age_wins_over_expires() {
        let mut headers = with_date(1000);
        headers.insert(
            http::header::EXPIRES,
            HeaderValue::from_str(&httpdate::fmt_http_date(at(2000))).unwrap(),
        );
        let cc = CacheControl { max_age: 60, undefined: false, ..Default::default() };
        let lifetime = freshness_lifetime_for_status(
            http::StatusCode::OK,
            &headers,
            &cc,
            ValidityOptions::default(),
        );
        assert_eq!(lifetime, Duration::from_secs(60));
    }

    #[test]
    fn shared_s_maxage_overrides_max_age() {
        let headers = with_date(1000);
        let cc = CacheControl {
            max_age: 60,
            s_maxage: 120,
            undefined: false,
            ..Default::default()
        };
        let lifetime = freshness_lifetime_for_status(
            http::StatusCode::OK,
            &headers,
            &cc,
            ValidityOptions::default(),
        );
        assert_eq!(lifetime, Duration::from_secs(120));
    }

    #[test]
    fn heuristic_uses_last_modified_when_no_max_age_or_expires() {
        let mut headers = with_date(1000);
        headers.insert(
            http::header::LAST_MODIFIED,
            HeaderValue::from_str(&httpdate::fmt_http_date(at(0))).unwrap(),
        );
        let opts = ValidityOptions {
            heuristic_caching_enabled: true,
            heuristic_coefficient: 0.1,
            ..Default::default()
        };
        let lifetime = freshness_lifetime_for_status(
            http::StatusCode::OK,
            &headers,
            &CacheControl::default(),
            opts,
        );
        assert_eq!(lifetime, Duration::from_secs(100));
    }

    #[test]
    fn staleness_is_clamped_at_zero() {
        assert_eq!(
            staleness(Duration::from_secs(5), Duration::from_secs(10)),
            Duration::ZERO
        );
        assert_eq!(
            staleness(Duration::from_secs(15), Duration::from_secs(10)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn stale_while_revalidate_eligibility() {
        let cc = CacheControl { stale_while_revalidate: 30, ..Default::default() };
        assert!(may_serve_stale_while_revalidating(&cc, Duration::from_secs(10)));
        assert!(!may_serve_stale_while_revalidating(&cc, Duration::from_secs(40)));
    }

    #[test]
    fn must_revalidate_on_request_no_cache() {
        let req = CacheControl { no_cache: true, ..Default::default() };
        assert!(must_revalidate_before_use(
            &req,
            &CacheControl::default(),
            ValidityOptions::default(),
            Duration::ZERO,
            Duration::from_secs(60),
            Duration::ZERO,
        ));
    }
}
