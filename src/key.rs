//! Root cache key and variant selector computation (C2).

use http::HeaderMap;
use url::Url;

/// Computes the root cache key from scheme, authority, and canonicalized
/// path+query. The key is opaque to callers and deterministic over
/// well-formed URIs (spec §4.2).
///
/// Canonicalization: lowercase scheme and host, drop a default port, resolve
/// `.`/`..` path segments, discard the fragment. `url::Url` already performs
/// percent-encoding normalization and default-port stripping for us; we add
/// lowercasing of scheme/host (the `url` crate lowercases host but not an
/// already-parsed scheme coming from arbitrary callers) and drop the
/// fragment explicitly.
pub fn cache_key(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let scheme = normalized.scheme().to_ascii_lowercase();
    let host = normalized.host_str().unwrap_or_default().to_ascii_lowercase();
    let port_part = match normalized.port() {
        Some(p) if !is_default_port(&scheme, p) => format!(":{p}"),
        _ => String::new(),
    };
    let path = canonicalize_path(normalized.path());
    let query = normalized.query().map(|q| format!("?{q}")).unwrap_or_default();
    format!("{scheme}://{host}{port_part}{path}{query}")
}

fn is_default_port(scheme: &str, port: u16) -> bool {
    matches!((scheme, port), ("http", 80) | ("https", 443))
}

/// Resolves `.`/`..` segments the way a user agent would before sending a
/// request line, so two syntactically different but equivalent paths hash
/// to the same key.
fn canonicalize_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    let mut out = String::from("/");
    out.push_str(&stack.join("/"));
    out
}

/// Builds the canonical variant selector string for a request given the
/// ordered, case-insensitive set of field names from an entry's `Vary`
/// header (spec §4.2): `{field=value}&{field=value}`, fields sorted,
/// values comma-joined and whitespace-normalized.
///
/// Returns `None` when any named field is `*` (the caller must already have
/// refused to store a `Vary: *` response; this is a defensive guard so a
/// stray `*` never produces a bogus selector).
pub fn variant_selector(vary_fields: &[String], request_headers: &HeaderMap) -> Option<String> {
    let mut fields: Vec<String> =
        vary_fields.iter().map(|f| f.to_ascii_lowercase()).collect();
    if fields.iter().any(|f| f == "*") {
        return None;
    }
    fields.sort();
    fields.dedup();
    let mut parts = Vec::with_capacity(fields.len());
    for field in &fields {
        let value = request_headers
            .get_all(field.as_str())
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");
        let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
        parts.push(format!("{{{field}={normalized}}}"));
    }
    Some(parts.join("&"))
}

/// Parses the `Vary` header into its field-name list, used to derive a
/// variant selector both when storing a root entry and when matching one.
pub fn vary_fields(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(http::header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(',').map(|f| f.trim().to_ascii_lowercase()))
        .filter(|f| !f.is_empty())
        .collect()
}

/// True when the response's `Vary` header is exactly `*` (never cacheable;
/// spec §4.2, §4.6 rule 6).
pub fn vary_is_wildcard(headers: &HeaderMap) -> bool {
    headers.get_all(http::header::VARY).iter().any(|v| v.as_bytes() == b"*")
}

#[cfg(test)]
mod test {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn strips_default_port_and_fragment() {
        let url = Url::parse("HTTP://Example.ORG:80/a/./b/../c?q=1#frag").unwrap();
        assert_eq!(cache_key(&url), "http://example.org/a/c?q=1");
    }

    #[test]
    fn keeps_non_default_port() {
        let url = Url::parse("http://example.org:8080/x").unwrap();
        assert_eq!(cache_key(&url), "http://example.org:8080/x");
    }

    #[test]
    fn variant_selector_sorts_and_joins() {
        let mut headers = HeaderMap::new();
        headers.insert("accept-encoding", HeaderValue::from_static("gzip"));
        headers.insert("accept-language", HeaderValue::from_static("en, fr"));
        let selector = variant_selector(
            &["Accept-Language".into(), "Accept-Encoding".into()],
            &headers,
        )
        .unwrap();
        assert_eq!(
            selector,
            "{accept-encoding=gzip}&{accept-language=en, fr}"
        );
    }

    #[test]
    fn wildcard_vary_has_no_selector() {
        assert!(variant_selector(&["*".into()], &HeaderMap::new()).is_none());
    }

    #[test]
    fn vary_wildcard_detection() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::VARY, HeaderValue::from_static("*"));
        assert!(vary_is_wildcard(&headers));
    }
}
