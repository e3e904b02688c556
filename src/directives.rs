//! Cache-Control parsing and the handful of other headers the engine reads
//! as structured data instead of raw strings (C1).

use http::HeaderMap;
use std::collections::HashMap;
use std::time::SystemTime;

/// Sentinel for an unset integer directive (spec §3: "unset integers are
/// represented as `-1`").
pub const UNSET: i64 = -1;

/// A parsed `Cache-Control` header, shared shape for both request and
/// response sides (spec §3 `RequestCacheControl`/`ResponseCacheControl`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_cache_fields: Vec<String>,
    pub no_store: bool,
    pub only_if_cached: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub public: bool,
    pub private: bool,
    pub private_fields: Vec<String>,
    pub immutable: bool,
    pub must_understand: bool,
    pub max_age: i64,
    pub s_maxage: i64,
    pub min_fresh: i64,
    pub max_stale: i64,
    /// `max-stale` with no argument means "any staleness is acceptable".
    pub max_stale_unbounded: bool,
    pub stale_while_revalidate: i64,
    pub stale_if_error: i64,
    /// True when no `Cache-Control` header was present at all.
    pub undefined: bool,
}

impl CacheControl {
    fn unset() -> Self {
        CacheControl {
            no_cache: false,
            no_cache_fields: Vec::new(),
            no_store: false,
            only_if_cached: false,
            must_revalidate: false,
            proxy_revalidate: false,
            public: false,
            private: false,
            private_fields: Vec::new(),
            immutable: false,
            must_understand: false,
            max_age: UNSET,
            s_maxage: UNSET,
            min_fresh: UNSET,
            max_stale: UNSET,
            max_stale_unbounded: false,
            stale_while_revalidate: UNSET,
            stale_if_error: UNSET,
            undefined: true,
        }
    }
}

/// Spec §3: unset integer directives default to the `-1` sentinel, not `0`
/// — a bare `CacheControl::default()` must behave as "no header present",
/// never as `max-age=0`/`s-maxage=0`.
impl Default for CacheControl {
    fn default() -> Self {
        Self::unset()
    }
}

/// Tokenizes a `Cache-Control` header value into `(name, value)` pairs,
/// unquoting quoted-string arguments. Returns `None` only when the header
/// cannot be tokenized at all (unbalanced quote), matching §4.1's
/// "fails only when the header cannot be tokenized at all".
fn tokenize(raw: &str) -> Option<Vec<(String, Option<String>)>> {
    let mut out = Vec::new();
    let mut chars = raw.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut name = String::new();
        while matches!(chars.peek(), Some(c) if *c != '=' && *c != ',' && !c.is_whitespace())
        {
            name.push(chars.next().unwrap());
        }
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let value = if chars.peek() == Some(&'=') {
            chars.next();
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut v = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    v.push(c);
                }
                if !closed {
                    return None;
                }
                Some(v)
            } else {
                let mut v = String::new();
                while matches!(chars.peek(), Some(c) if *c != ',') {
                    v.push(chars.next().unwrap());
                }
                Some(v.trim().to_string())
            }
        } else {
            None
        };
        if !name.is_empty() {
            out.push((name, value));
        }
    }
    Some(out)
}

fn parse_int(v: &Option<String>) -> i64 {
    v.as_deref().and_then(|s| s.trim().parse::<i64>().ok()).unwrap_or(UNSET)
}

fn field_list(v: &Option<String>) -> Vec<String> {
    match v {
        Some(s) => s
            .split(',')
            .map(|f| f.trim().to_ascii_lowercase())
            .filter(|f| !f.is_empty())
            .collect(),
        None => Vec::new(),
    }
}

/// Parses the `Cache-Control` header out of a header map. Best-effort per
/// last-duplicate-wins; returns the `undefined` record when the header is
/// absent.
pub fn parse_cache_control(headers: &HeaderMap) -> CacheControl {
    let mut values = headers.get_all(http::header::CACHE_CONTROL).iter();
    let Some(first) = values.next() else {
        return CacheControl::unset();
    };
    let mut raw = first.to_str().unwrap_or_default().to_string();
    for extra in values {
        raw.push(',');
        raw.push_str(extra.to_str().unwrap_or_default());
    }
    let Some(tokens) = tokenize(&raw) else {
        return CacheControl::unset();
    };

    let mut cc = CacheControl { undefined: false, ..CacheControl::unset() };
    for (name, value) in tokens {
        match name.to_ascii_lowercase().as_str() {
            "no-cache" if value.is_some() => {
                cc.no_cache = true;
                cc.no_cache_fields = field_list(&value);
            }
            "no-cache" => cc.no_cache = true,
            "no-store" => cc.no_store = true,
            "only-if-cached" => cc.only_if_cached = true,
            "must-revalidate" => cc.must_revalidate = true,
            "proxy-revalidate" => cc.proxy_revalidate = true,
            "public" => cc.public = true,
            "private" if value.is_some() => {
                cc.private = true;
                cc.private_fields = field_list(&value);
            }
            "private" => cc.private = true,
            "immutable" => cc.immutable = true,
            "must-understand" => cc.must_understand = true,
            "max-age" => cc.max_age = parse_int(&value),
            "s-maxage" => cc.s_maxage = parse_int(&value),
            "min-fresh" => cc.min_fresh = parse_int(&value),
            "max-stale" => {
                if value.is_none() {
                    cc.max_stale_unbounded = true;
                } else {
                    cc.max_stale = parse_int(&value);
                }
            }
            "stale-while-revalidate" => cc.stale_while_revalidate = parse_int(&value),
            "stale-if-error" => cc.stale_if_error = parse_int(&value),
            _ => {}
        }
    }
    cc
}

/// Formats a `CacheControl` back into a directive string. Used by the
/// conditional-request builder (C7) when synthesizing `Cache-Control:
/// max-age=0` or `no-cache` onto a cloned request.
pub fn format_cache_control(cc: &CacheControl) -> String {
    let mut parts: Vec<String> = Vec::new();
    if cc.no_store {
        parts.push("no-store".into());
    }
    if cc.no_cache {
        parts.push("no-cache".into());
    }
    if cc.only_if_cached {
        parts.push("only-if-cached".into());
    }
    if cc.must_revalidate {
        parts.push("must-revalidate".into());
    }
    if cc.max_age != UNSET {
        parts.push(format!("max-age={}", cc.max_age));
    }
    parts.join(", ")
}

/// Parses an HTTP-date header (`Date`, `Expires`, `Last-Modified`) into a
/// `SystemTime`. Returns `None` on a missing or malformed header, per the
/// "apparent_age is +∞ when Date missing" rule in §4.3 (the caller maps
/// `None` to +∞ as appropriate).
pub fn parse_http_date(headers: &HeaderMap, name: http::header::HeaderName) -> Option<SystemTime> {
    let raw = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(raw).ok()
}

/// The result of parsing an `Age` header: a missing header contributes
/// nothing to the age calculation, while a header that's present but
/// unparseable or negative is treated as +∞ (spec §4.3, spec.md:83 "a
/// malformed or negative `Age` is treated as +∞") — the two are not the
/// same outcome, unlike a bare "couldn't parse" `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeValue {
    /// No `Age` header was present.
    Missing,
    /// `Age` was present but malformed or negative.
    Invalid,
    /// `Age` parsed to a non-negative integer number of seconds.
    Seconds(u64),
}

/// Parses the `Age` header (seconds). See [`AgeValue`] for how missing vs.
/// malformed/negative values differ.
pub fn parse_age(headers: &HeaderMap) -> AgeValue {
    let Some(raw) = headers.get(http::header::AGE).and_then(|v| v.to_str().ok()) else {
        return AgeValue::Missing;
    };
    match raw.trim().parse::<i64>() {
        Ok(seconds) if seconds >= 0 => AgeValue::Seconds(seconds as u64),
        _ => AgeValue::Invalid,
    }
}

/// Parses the `Warning` header into `(code, text)` pairs. Used by C8 to
/// decide whether to drop 1xx warnings on store (RFC 7234 §4.3.4) and by
/// the synchronous-revalidation fallback to add `Warning: 110 ...`.
pub fn parse_warnings(headers: &HeaderMap) -> Vec<(u16, String)> {
    headers
        .get_all(http::header::WARNING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| {
            raw.split(',').filter_map(|entry| {
                let entry = entry.trim();
                let mut parts = entry.splitn(2, ' ');
                let code = parts.next()?.trim().parse::<u16>().ok()?;
                let rest = parts.next().unwrap_or_default().to_string();
                Some((code, rest))
            })
        })
        .collect()
}

/// Builds the `Via` header value for an outbound exchange (spec §6):
/// `<protocol>/<major>.<minor> localhost (<product>/<version> (cache))`.
pub fn via_header_value(
    protocol: &str,
    major: u8,
    minor: u8,
    product: &str,
    version: &str,
) -> String {
    format!("{protocol}/{major}.{minor} localhost ({product}/{version} (cache))")
}

/// A case-insensitive, order-preserving map of request header field names to
/// their comma-joined values, used when comparing `Vary` selectors (C2/C5).
pub type FieldValues = HashMap<String, String>;

#[cfg(test)]
mod test {
    use super::*;
    use http::HeaderValue;

    fn headers(cc: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(http::header::CACHE_CONTROL, HeaderValue::from_str(cc).unwrap());
        h
    }

    #[test]
    fn undefined_when_absent() {
        let cc = parse_cache_control(&HeaderMap::new());
        assert!(cc.undefined);
        assert_eq!(cc.max_age, UNSET);
    }

    #[test]
    fn parses_scalar_and_boolean_directives() {
        let cc = parse_cache_control(&headers("max-age=60, must-revalidate, public"));
        assert!(!cc.undefined);
        assert_eq!(cc.max_age, 60);
        assert!(cc.must_revalidate);
        assert!(cc.public);
        assert_eq!(cc.s_maxage, UNSET);
    }

    #[test]
    fn malformed_integer_yields_unset() {
        let cc = parse_cache_control(&headers("max-age=not-a-number"));
        assert_eq!(cc.max_age, UNSET);
    }

    #[test]
    fn last_duplicate_wins() {
        let cc = parse_cache_control(&headers("max-age=10, max-age=20"));
        assert_eq!(cc.max_age, 20);
    }

    #[test]
    fn no_cache_field_list_is_retained_case_insensitively() {
        let cc = parse_cache_control(&headers("no-cache=\"Set-Cookie, X-Foo\""));
        assert!(cc.no_cache);
        assert_eq!(cc.no_cache_fields, vec!["set-cookie", "x-foo"]);
    }

    #[test]
    fn max_stale_without_argument_is_unbounded() {
        let cc = parse_cache_control(&headers("max-stale"));
        assert!(cc.max_stale_unbounded);
        assert_eq!(cc.max_stale, UNSET);
    }

    #[test]
    fn via_header_format() {
        assert_eq!(
            via_header_value("HTTP", 1, 1, "http-cache-core", "0.1.0"),
            "HTTP/1.1 localhost (http-cache-core/0.1.0 (cache))"
        );
    }

    #[test]
    fn warning_parsing() {
        let mut h = HeaderMap::new();
        h.insert(
            http::header::WARNING,
            HeaderValue::from_static("110 - \"Response is Stale\", 112 - \"Disconnected\""),
        );
        let warnings = parse_warnings(&h);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].0, 110);
        assert_eq!(warnings[1].0, 112);
    }
}
