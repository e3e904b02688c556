//! Response caching policy (C6): whether an origin response is cacheable.

use crate::directives::CacheControl;
use crate::entry::is_understood_status;
use crate::key::vary_is_wildcard;
use crate::validity::{self, ValidityOptions};
use http::{HeaderMap, Method, StatusCode, Version};

const KNOWN_CACHEABLE: &[u16] = &[200, 203, 300, 301, 410];

/// Configuration C6 needs beyond `ValidityOptions` (kept in its own struct
/// so the function signature reads as "the knobs that affect storability",
/// mirroring how the teacher keeps `max_ttl`/`cache_bust` separate from the
/// base `CacheOptions` it wraps).
#[derive(Debug, Clone, Copy)]
pub struct PolicyOptions {
    pub max_object_size: u64,
    pub never_cache_http10_with_query: bool,
    pub never_cache_http11_with_query: bool,
    pub allow_post_caching: bool,
    pub cache_303: bool,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        PolicyOptions {
            max_object_size: 8 * 1024,
            never_cache_http10_with_query: false,
            never_cache_http11_with_query: false,
            allow_post_caching: true,
            cache_303: false,
        }
    }
}

/// Input bundle for [`is_cacheable`].
pub struct ResponseContext<'a> {
    pub request_method: &'a Method,
    pub request_version: Version,
    pub request_has_query: bool,
    pub request_headers: &'a HeaderMap,
    pub status: StatusCode,
    pub response_headers: &'a HeaderMap,
    pub response_cc: &'a CacheControl,
    pub buffered_size: u64,
    pub validity_opts: ValidityOptions,
}

/// Evaluates spec §4.6 rules 1-12 in order, short-circuiting on the first
/// violation found (except `must-understand`, which overrides a `no-store`
/// rejection per rule 12 and so is checked first).
pub fn is_cacheable(ctx: &ResponseContext, opts: &PolicyOptions) -> bool {
    let code = ctx.status.as_u16();
    if ctx.response_cc.must_understand && !understood_with_must_understand(code) {
        return false;
    }

    // Rule 1: method.
    let explicit_freshness = ctx.response_cc.max_age >= 0
        || ctx.response_cc.s_maxage >= 0
        || ctx.response_headers.contains_key(http::header::EXPIRES);
    match *ctx.request_method {
        Method::GET | Method::HEAD => {}
        Method::POST if opts.allow_post_caching && explicit_freshness => {}
        _ => return false,
    }

    // Rule 2: protocol.
    if version_order(ctx.request_version) > version_order(Version::HTTP_11) {
        return false;
    }

    // Rule 3: status code.
    if code == 206 {
        return false;
    }
    if !is_understood_status(ctx.status) {
        return false;
    }
    if code == 303 && !opts.cache_303 {
        return false;
    }
    if !KNOWN_CACHEABLE.contains(&code) && !explicit_freshness {
        return false;
    }

    // Rule 4: size cap.
    if ctx.buffered_size > opts.max_object_size {
        return false;
    }

    // Rule 5: at most one Date/Expires/Age.
    if ctx.response_headers.get_all(http::header::DATE).iter().count() > 1
        || ctx.response_headers.get_all(http::header::EXPIRES).iter().count() > 1
        || ctx.response_headers.get_all(http::header::AGE).iter().count() > 1
    {
        return false;
    }

    // Rule 6: Vary: *.
    if vary_is_wildcard(ctx.response_headers) {
        return false;
    }

    // Rule 7: explicit non-cacheable directives.
    if ctx.response_cc.no_store {
        return false;
    }
    if ctx.validity_opts.shared && ctx.response_cc.private {
        return false;
    }

    // Rule 8: Authorization in shared mode.
    if ctx.validity_opts.shared
        && ctx.request_headers.contains_key(http::header::AUTHORIZATION)
        && !(ctx.response_cc.s_maxage >= 0
            || ctx.response_cc.must_revalidate
            || ctx.response_cc.public)
    {
        return false;
    }

    // Rule 9: query-string caveats.
    if ctx.request_has_query {
        if opts.never_cache_http10_with_query
            && ctx.request_version == Version::HTTP_10
        {
            return false;
        }
        if opts.never_cache_http11_with_query
            && ctx.request_version == Version::HTTP_11
            && !explicit_freshness
        {
            return false;
        }
    }

    // Rule 10: Expires <= Date with no Cache-Control.
    if ctx.response_cc.undefined {
        if let (Some(date), Some(expires)) = (
            crate::directives::parse_http_date(ctx.response_headers, http::header::DATE),
            crate::directives::parse_http_date(
                ctx.response_headers,
                http::header::EXPIRES,
            ),
        ) {
            if expires <= date {
                return false;
            }
        }
    }

    // Rule 11: freshness lifetime must be positive unless explicitly
    // cacheable via a freshness directive.
    let lifetime = validity::freshness_lifetime_for_status(
        ctx.status,
        ctx.response_headers,
        ctx.response_cc,
        ctx.validity_opts,
    );
    if lifetime.is_zero() && !explicit_freshness {
        return false;
    }

    true
}

fn understood_with_must_understand(code: u16) -> bool {
    matches!(code, 200..=206 | 300..=307 | 400..=417 | 421 | 500..=505)
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
