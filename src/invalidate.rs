//! Invalidation engine (C10): evicts entries made stale by an unsafe
//! request's response, per spec §4.10.

use crate::backend::CacheManager;
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::key;
use http::{HeaderMap, Method, StatusCode};
use std::time::SystemTime;
use url::Url;

/// True for a request method whose non-error response invalidates stored
/// representations of the target resource (spec §4.10: everything except
/// the safe methods `GET`/`HEAD`/`OPTIONS`/`TRACE`).
pub fn is_unsafe_method(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

/// `evictInvalidatedEntries(request, response) -> ()` (spec §4.10).
///
/// On a non-error response to an unsafe request, evicts the root entry (and
/// all of its variants) keyed by the request URI. If the response also
/// carries a `Location` or `Content-Location` header resolving to a
/// same-origin URI, that target's root entry is evicted too — but only when
/// doing so is actually informative: the stored entry's `ETag` differs from
/// the response's and the stored entry's `Date` is not newer than the
/// response's.
pub async fn evict_invalidated_entries(
    manager: &dyn CacheManager,
    request_url: &Url,
    request_method: &Method,
    response_status: StatusCode,
    response_headers: &HeaderMap,
) -> Result<()> {
    if !is_unsafe_method(request_method) || response_status.is_client_error() || response_status.is_server_error() {
        return Ok(());
    }

    evict_root_and_variants(manager, request_url).await?;

    let response_etag = response_headers.get(http::header::ETAG).and_then(|v| v.to_str().ok());
    let response_date = crate::directives::parse_http_date(response_headers, http::header::DATE);

    for header in [http::header::LOCATION, http::header::CONTENT_LOCATION] {
        let Some(target) = response_headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| request_url.join(raw).ok())
        else {
            continue;
        };
        if !same_origin(request_url, &target) {
            continue;
        }
        evict_if_stale(manager, &target, response_etag, response_date).await?;
    }

    Ok(())
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

async fn evict_root_and_variants(manager: &dyn CacheManager, url: &Url) -> Result<()> {
    let root_key = key::cache_key(url);
    if let Some(root) = manager.get_entry(&root_key).await? {
        if let Some(variants) = &root.variants {
            for variant_key in variants.values() {
                manager.remove_entry(variant_key).await?;
            }
        }
    }
    manager.remove_entry(&root_key).await?;
    Ok(())
}

async fn evict_if_stale(
    manager: &dyn CacheManager,
    url: &Url,
    response_etag: Option<&str>,
    response_date: Option<SystemTime>,
) -> Result<()> {
    let root_key = key::cache_key(url);
    let Some(root) = manager.get_entry(&root_key).await? else { return Ok(()) };
    if !entry_is_superseded(&root, response_etag, response_date) {
        return Ok(());
    }
    evict_root_and_variants(manager, url).await
}

fn entry_is_superseded(entry: &CacheEntry, response_etag: Option<&str>, response_date: Option<SystemTime>) -> bool {
    let etags_differ = match (entry.etag(), response_etag) {
        (Some(stored), Some(incoming)) => stored != incoming,
        _ => true,
    };
    if !etags_differ {
        return false;
    }
    match (entry.date(), response_date) {
        (Some(stored_date), Some(incoming_date)) => stored_date <= incoming_date,
        _ => true,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::InMemoryManager;
    use crate::entry::StoredHeaders;
    use http::HeaderValue;

    fn entry_with(etag: &str, date: SystemTime) -> CacheEntry {
        CacheEntry {
            method: Method::GET,
            uri: "http://example.org/a".into(),
            variant_selector_fields: StoredHeaders::default(),
            status: StatusCode::OK,
            headers: StoredHeaders(vec![
                ("etag".into(), etag.to_string()),
                ("date".into(), httpdate::fmt_http_date(date)),
            ]),
            resource: None,
            request_instant: date,
            response_instant: date,
            variants: None,
        }
    }

    #[tokio::test]
    async fn unsafe_post_evicts_target_entry() {
        let manager = InMemoryManager::new(1);
        let url = Url::parse("http://example.org/a").unwrap();
        manager
            .put_entry(key::cache_key(&url), entry_with("\"v1\"", SystemTime::UNIX_EPOCH))
            .await
            .unwrap();

        evict_invalidated_entries(&manager, &url, &Method::POST, StatusCode::OK, &HeaderMap::new())
            .await
            .unwrap();

        assert!(manager.get_entry(&key::cache_key(&url)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn safe_method_never_evicts() {
        let manager = InMemoryManager::new(1);
        let url = Url::parse("http://example.org/a").unwrap();
        manager
            .put_entry(key::cache_key(&url), entry_with("\"v1\"", SystemTime::UNIX_EPOCH))
            .await
            .unwrap();

        evict_invalidated_entries(&manager, &url, &Method::GET, StatusCode::OK, &HeaderMap::new())
            .await
            .unwrap();

        assert!(manager.get_entry(&key::cache_key(&url)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn location_target_evicted_when_etag_differs_and_not_newer() {
        let manager = InMemoryManager::new(1);
        let request_url = Url::parse("http://example.org/a").unwrap();
        let target_url = Url::parse("http://example.org/b").unwrap();
        manager
            .put_entry(key::cache_key(&target_url), entry_with("\"old\"", SystemTime::UNIX_EPOCH))
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(http::header::LOCATION, HeaderValue::from_static("/b"));
        headers.insert(http::header::ETAG, HeaderValue::from_static("\"new\""));
        headers.insert(
            http::header::DATE,
            HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::UNIX_EPOCH)).unwrap(),
        );

        evict_invalidated_entries(&manager, &request_url, &Method::PUT, StatusCode::OK, &headers)
            .await
            .unwrap();

        assert!(manager.get_entry(&key::cache_key(&target_url)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn location_target_kept_when_stored_entry_is_newer() {
        let manager = InMemoryManager::new(1);
        let request_url = Url::parse("http://example.org/a").unwrap();
        let target_url = Url::parse("http://example.org/b").unwrap();
        let future = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1000);
        manager
            .put_entry(key::cache_key(&target_url), entry_with("\"old\"", future))
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(http::header::LOCATION, HeaderValue::from_static("/b"));
        headers.insert(http::header::ETAG, HeaderValue::from_static("\"new\""));
        headers.insert(
            http::header::DATE,
            HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::UNIX_EPOCH)).unwrap(),
        );

        evict_invalidated_entries(&manager, &request_url, &Method::PUT, StatusCode::OK, &headers)
            .await
            .unwrap();

        assert!(manager.get_entry(&key::cache_key(&target_url)).await.unwrap().is_some());
    }
}
