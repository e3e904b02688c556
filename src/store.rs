//! Cache store facade (C9): orchestrates storage on top of C2 (key/variant
//! selector) and the storage interface (`backend::CacheManager`). Nothing
//! above this layer ever calls a `CacheManager` method directly.

use crate::backend::CacheManager;
use crate::entry::{CacheEntry, CacheMatch, VariantMap};
use crate::error::Result;
use crate::key;
use http::HeaderMap;
use std::time::SystemTime;
use url::Url;

/// `match(request) -> CacheMatch` (spec §4.9): looks up the root entry for
/// `url`, then resolves the request's variant selector against the root's
/// variant map (if any) to find the specific hit.
pub async fn match_request(
    manager: &dyn CacheManager,
    url: &Url,
    request_headers: &HeaderMap,
) -> Result<CacheMatch> {
    let root_key = key::cache_key(url);
    let Some(root) = manager.get_entry(&root_key).await? else {
        return Ok(CacheMatch::none());
    };

    let Some(variants) = root.variants.clone() else {
        return Ok(CacheMatch { hit: Some(root.clone()), root: Some(root) });
    };

    let vary_fields: Vec<String> = root.variant_selector_fields.0.iter().map(|(k, _)| k.clone()).collect();
    let selector = key::variant_selector(&vary_fields, request_headers);
    let hit = match selector.and_then(|s| variants.get(&s).cloned()) {
        Some(variant_key) => manager.get_entry(&variant_key).await?,
        None => None,
    };
    Ok(CacheMatch { hit, root: Some(root) })
}

/// Returns the stored `ETag` of every known variant of `root`, used to build
/// the variant-negotiation conditional request (spec §4.7, §4.9
/// `getVariants`).
pub async fn get_variant_etags(manager: &dyn CacheManager, root: &CacheEntry) -> Result<Vec<String>> {
    let Some(variants) = &root.variants else { return Ok(Vec::new()) };
    let keys: Vec<String> = variants.values().cloned().collect();
    let entries = manager.get_entries(&keys).await?;
    Ok(entries.iter().filter_map(|(_, e)| e.etag().map(str::to_string)).collect())
}

/// Returns every known variant of `root` as `(storage key, entry)` pairs, so
/// a 304 from variant negotiation can be matched back to the variant it
/// confirmed (spec §4.12.1). `get_variant_etags` is a thin projection of this.
pub async fn get_variant_entries(
    manager: &dyn CacheManager,
    root: &CacheEntry,
) -> Result<Vec<(String, CacheEntry)>> {
    let Some(variants) = &root.variants else { return Ok(Vec::new()) };
    let keys: Vec<String> = variants.values().cloned().collect();
    manager.get_entries(&keys).await
}

/// The storage key `entry` actually occupies: the root key when it carries
/// no `Vary`, or the variant key recomputed from its own recorded
/// `variant_selector_fields` otherwise. Used to re-target an update at the
/// same slot a matched entry was read from, without the caller having to
/// carry the key alongside every `CacheEntry` it passes around.
pub fn storage_key_for(url: &Url, entry: &CacheEntry) -> String {
    let root_key = key::cache_key(url);
    let vary_fields = key::vary_fields(&entry.headers.to_header_map());
    if vary_fields.is_empty() {
        return root_key;
    }
    match key::variant_selector(&vary_fields, &entry.variant_selector_fields.to_header_map()) {
        Some(selector) => format!("{root_key}#{selector}"),
        None => root_key,
    }
}

/// `update(hit, response) -> entry` (spec §4.9, §4.12.2): merges a 304's
/// headers into `hit` per RFC 7234 §4.3.4 (every header field named in the
/// response replaces the stored one; everything else is kept), refreshes the
/// timestamps, and persists the result at `hit`'s own storage key.
pub async fn update_revalidated(
    manager: &dyn CacheManager,
    url: &Url,
    hit: &CacheEntry,
    response_headers: &HeaderMap,
    request_instant: SystemTime,
    response_instant: SystemTime,
) -> Result<CacheEntry> {
    let merged_headers = merge_headers(&hit.headers.to_header_map(), response_headers);
    let merged = CacheEntry {
        method: hit.method.clone(),
        uri: hit.uri.clone(),
        variant_selector_fields: hit.variant_selector_fields.clone(),
        status: hit.status,
        headers: (&merged_headers).into(),
        resource: hit.resource.clone(),
        request_instant,
        response_instant,
        variants: hit.variants.clone(),
    };
    let key = storage_key_for(url, hit);
    let to_store = merged.clone();
    manager.update_entry(&key, Box::new(move |_| Some(to_store))).await?;
    Ok(merged)
}

/// Replaces, in `base`, every header field also named in `overlay` (keeping
/// everything else), after stripping hop-by-hop headers from `overlay`.
fn merge_headers(base: &HeaderMap, overlay: &HeaderMap) -> HeaderMap {
    let overlay = crate::entry::strip_hop_by_hop(overlay);
    let mut out = base.clone();
    let mut replaced: std::collections::HashSet<http::HeaderName> = std::collections::HashSet::new();
    for name in overlay.keys() {
        if replaced.insert(name.clone()) {
            out.remove(name);
            for value in overlay.get_all(name) {
                out.append(name.clone(), value.clone());
            }
        }
    }
    out
}

/// `store(request, response) -> ()` (spec §4.9): writes a freshly fetched,
/// cacheable response, creating or extending a variant root as needed.
///
/// When the response carries no `Vary`, the entry is stored directly under
/// the root key. When it does, the entry is stored under a derived variant
/// key and the root is updated (via CAS) to add or replace that variant's
/// slot in its variant map, never touching unrelated variants.
pub async fn store(
    manager: &dyn CacheManager,
    url: &Url,
    request_headers: &HeaderMap,
    entry: CacheEntry,
) -> Result<()> {
    let root_key = key::cache_key(url);
    let vary_fields = key::vary_fields(&entry.headers.to_header_map());

    if vary_fields.is_empty() {
        manager.put_entry(root_key, entry).await?;
        return Ok(());
    }

    let Some(selector) = key::variant_selector(&vary_fields, request_headers) else {
        // `Vary: *` would already have been rejected by C6; treat
        // defensively as unstorable rather than corrupt the variant map.
        return Ok(());
    };
    let variant_key = format!("{root_key}#{selector}");
    let mut variant_entry = entry;
    variant_entry.variant_selector_fields = request_headers.into();
    manager.put_entry(variant_key.clone(), variant_entry).await?;

    let root_uri = url.as_str().to_string();
    let vary_fields_owned: Vec<(String, String)> =
        vary_fields.into_iter().map(|f| (f, String::new())).collect();
    manager
        .update_entry(
            &root_key,
            Box::new(move |current| {
                let mut root = current.unwrap_or_else(|| empty_variant_root(root_uri));
                let variants = root.variants.get_or_insert_with(VariantMap::new);
                variants.insert(selector, variant_key);
                root.variant_selector_fields = crate::entry::StoredHeaders(vary_fields_owned);
                root.resource = None;
                Some(root)
            }),
        )
        .await?;
    Ok(())
}

/// `storeFromNegotiated(matchedVariant, response) -> ()` (spec §4.9): a 304
/// from a variant-negotiation exchange refreshes only the matched variant's
/// headers and validators, leaving its body and the root's variant map
/// untouched.
pub async fn store_from_negotiated(
    manager: &dyn CacheManager,
    variant_key: &str,
    refreshed_headers: HeaderMap,
    response_instant: std::time::SystemTime,
) -> Result<()> {
    manager
        .update_entry(
            variant_key,
            Box::new(move |current| {
                let mut entry = current?;
                entry.headers = (&refreshed_headers).into();
                entry.response_instant = response_instant;
                Some(entry)
            }),
        )
        .await?;
    Ok(())
}

/// `update(key, transform)` (spec §4.9): re-exposed here so callers never
/// need to reach past the facade into `backend::CacheManager` directly.
pub async fn update(
    manager: &dyn CacheManager,
    key: &str,
    transform: Box<dyn FnOnce(Option<CacheEntry>) -> Option<CacheEntry> + Send>,
) -> Result<bool> {
    manager.update_entry(key, transform).await
}

fn empty_variant_root(uri: String) -> CacheEntry {
    CacheEntry {
        method: http::Method::GET,
        uri,
        variant_selector_fields: crate::entry::StoredHeaders::default(),
        status: http::StatusCode::OK,
        headers: crate::entry::StoredHeaders::default(),
        resource: None,
        request_instant: std::time::SystemTime::UNIX_EPOCH,
        response_instant: std::time::SystemTime::UNIX_EPOCH,
        variants: Some(VariantMap::new()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::InMemoryManager;
    use crate::entry::StoredHeaders;
    use http::{HeaderValue, Method, StatusCode};
    use std::time::SystemTime;

    fn entry(headers: Vec<(&str, &str)>) -> CacheEntry {
        CacheEntry {
            method: Method::GET,
            uri: "http://example.org/a".into(),
            variant_selector_fields: StoredHeaders::default(),
            status: StatusCode::OK,
            headers: StoredHeaders(headers.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            resource: None,
            request_instant: SystemTime::UNIX_EPOCH,
            response_instant: SystemTime::UNIX_EPOCH,
            variants: None,
        }
    }

    #[tokio::test]
    async fn store_without_vary_writes_root_directly() {
        let manager = InMemoryManager::new(1);
        let url = Url::parse("http://example.org/a").unwrap();
        store(&manager, &url, &HeaderMap::new(), entry(vec![])).await.unwrap();
        let found = match_request(&manager, &url, &HeaderMap::new()).await.unwrap();
        assert!(found.hit.is_some());
    }

    #[tokio::test]
    async fn store_with_vary_creates_variant_and_root() {
        let manager = InMemoryManager::new(1);
        let url = Url::parse("http://example.org/a").unwrap();
        let mut request_headers = HeaderMap::new();
        request_headers.insert("accept-encoding", HeaderValue::from_static("gzip"));
        store(
            &manager,
            &url,
            &request_headers,
            entry(vec![("vary", "Accept-Encoding")]),
        )
        .await
        .unwrap();

        let found = match_request(&manager, &url, &request_headers).await.unwrap();
        assert!(found.hit.is_some());
        assert!(found.root.unwrap().is_variant_root());
    }

    #[tokio::test]
    async fn mismatched_variant_selector_misses() {
        let manager = InMemoryManager::new(1);
        let url = Url::parse("http://example.org/a").unwrap();
        let mut stored_with = HeaderMap::new();
        stored_with.insert("accept-encoding", HeaderValue::from_static("gzip"));
        store(
            &manager,
            &url,
            &stored_with,
            entry(vec![("vary", "Accept-Encoding")]),
        )
        .await
        .unwrap();

        let mut requested_with = HeaderMap::new();
        requested_with.insert("accept-encoding", HeaderValue::from_static("br"));
        let found = match_request(&manager, &url, &requested_with).await.unwrap();
        assert!(found.hit.is_none());
        assert!(found.root.is_some());
    }

    #[tokio::test]
    async fn get_variant_entries_returns_all_known_variants() {
        let manager = InMemoryManager::new(1);
        let url = Url::parse("http://example.org/a").unwrap();
        let mut gzip_headers = HeaderMap::new();
        gzip_headers.insert("accept-encoding", HeaderValue::from_static("gzip"));
        store(&manager, &url, &gzip_headers, entry(vec![("vary", "Accept-Encoding")])).await.unwrap();
        let mut br_headers = HeaderMap::new();
        br_headers.insert("accept-encoding", HeaderValue::from_static("br"));
        store(&manager, &url, &br_headers, entry(vec![("vary", "Accept-Encoding")])).await.unwrap();

        let root = match_request(&manager, &url, &gzip_headers).await.unwrap().root.unwrap();
        let variants = get_variant_entries(&manager, &root).await.unwrap();
        assert_eq!(variants.len(), 2);
    }

    #[tokio::test]
    async fn get_variant_entries_empty_for_non_variant_root() {
        let manager = InMemoryManager::new(1);
        let url = Url::parse("http://example.org/a").unwrap();
        store(&manager, &url, &HeaderMap::new(), entry(vec![])).await.unwrap();
        let root = match_request(&manager, &url, &HeaderMap::new()).await.unwrap().hit.unwrap();
        assert!(get_variant_entries(&manager, &root).await.unwrap().is_empty());
    }

    #[test]
    fn storage_key_for_plain_entry_is_root_key() {
        let url = Url::parse("http://example.org/a").unwrap();
        let e = entry(vec![]);
        assert_eq!(storage_key_for(&url, &e), key::cache_key(&url));
    }

    #[test]
    fn storage_key_for_variant_entry_includes_selector() {
        let url = Url::parse("http://example.org/a").unwrap();
        let mut e = entry(vec![("vary", "Accept-Encoding")]);
        e.variant_selector_fields =
            StoredHeaders(vec![("accept-encoding".to_string(), "gzip".to_string())]);
        let computed = storage_key_for(&url, &e);
        assert!(computed.starts_with(&key::cache_key(&url)));
        assert!(computed.contains('#'));
    }

    #[tokio::test]
    async fn update_revalidated_merges_headers_and_refreshes_timestamps() {
        let manager = InMemoryManager::new(1);
        let url = Url::parse("http://example.org/a").unwrap();
        let stored = entry(vec![("etag", "\"v1\""), ("cache-control", "max-age=60")]);
        store(&manager, &url, &HeaderMap::new(), stored.clone()).await.unwrap();

        let mut response_headers = HeaderMap::new();
        response_headers.insert("etag", HeaderValue::from_static("\"v1\""));
        response_headers.insert("date", HeaderValue::from_static("Mon, 01 Jan 2024 00:00:00 GMT"));
        let now = SystemTime::now();
        let merged = update_revalidated(&manager, &url, &stored, &response_headers, now, now)
            .await
            .unwrap();

        assert_eq!(merged.headers.get("cache-control"), Some("max-age=60"));
        assert_eq!(merged.headers.get("date"), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
        assert_eq!(merged.response_instant, now);

        let refetched = match_request(&manager, &url, &HeaderMap::new()).await.unwrap().hit.unwrap();
        assert_eq!(refetched.headers.get("date"), Some("Mon, 01 Jan 2024 00:00:00 GMT"));
    }
}
