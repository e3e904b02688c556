//! The decision engine (C12): the state machine that ties every other
//! component together for a single request/response exchange.
//!
//! Grounded on the teacher's `Middleware::run` chain, generalized from its
//! two-outcome (hit/miss) shape into the five-state machine spec §9 calls
//! for: each state transition here is its own `async fn` rather than a
//! callback swapped into an `AtomicReference`, per the design note on
//! replacing the source's callback-chained asynchrony.

use crate::admission::{self, Admission};
use crate::backend::CacheManager;
use crate::conditional;
use crate::config::EngineConfig;
use crate::directives::{self, CacheControl};
use crate::entry::{self, CacheEntry};
use crate::error::{CacheError, Result};
use crate::executor::{BackendResponse, CacheRequest, DownstreamExecutor};
use crate::invalidate;
use crate::policy;
use crate::reconstruct::{self, ReconstructedResponse};
use crate::resource::{InMemoryResourceFactory, Resource, ResourceFactory};
use crate::revalidator::{RevalidationJob, RevalidationOutcome, Revalidator};
use crate::status::{CacheStatus, ExchangeOutcome, ViaCache};
use crate::store;
use crate::suitability::{self, SuitabilityClass, SuitabilityInputs};
use crate::validity;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use url::Url;

/// What the engine hands back from one exchange: either a response it
/// built itself (a hit, a validation, a synthesized error) or the backend's
/// own response passed through unmodified.
#[derive(Debug, Clone)]
pub enum EngineResponse {
    /// A response the engine synthesized from a stored entry.
    Reconstructed(ReconstructedResponse),
    /// The downstream executor's response, passed through unmodified.
    Backend(BackendResponse),
}

impl EngineResponse {
    /// The status code of whichever response this wraps.
    pub fn status(&self) -> StatusCode {
        match self {
            EngineResponse::Reconstructed(r) => r.status,
            EngineResponse::Backend(b) => b.status,
        }
    }
}

/// The result of buffering a response body under the size cap (spec
/// §4.12.4: "buffer the body under the size cap... if exceeded, stream the
/// original body through").
#[derive(Debug)]
enum BufferOutcome {
    Buffered(Bytes),
    Oversized,
}

fn buffer_within_cap(body: &Bytes, max_object_size: u64) -> BufferOutcome {
    if body.len() as u64 > max_object_size {
        BufferOutcome::Oversized
    } else {
        BufferOutcome::Buffered(body.clone())
    }
}

fn is_server_error_eligible_for_stale(status: StatusCode) -> bool {
    matches!(status, StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT)
}

fn add_warning_110(headers: &mut HeaderMap) {
    if let Ok(value) = HeaderValue::from_str("110 - \"Response is Stale\"") {
        headers.append(http::header::WARNING, value);
    }
}

/// Ties C1-C11 together behind one entry point, `exchange`. Held as
/// `Arc<Self>` so a scheduled background revalidation job can carry a
/// handle back into the engine's own storing logic without duplicating it
/// (spec §4.11/§4.12's background path reuses step 7 verbatim).
pub struct Engine {
    manager: Arc<dyn CacheManager>,
    executor: Arc<dyn DownstreamExecutor>,
    resource_factory: Arc<dyn ResourceFactory>,
    config: EngineConfig,
    via: ViaCache,
    revalidator: Option<Revalidator>,
    product: String,
    product_version: String,
}

impl Engine {
    pub fn new(
        manager: Arc<dyn CacheManager>,
        executor: Arc<dyn DownstreamExecutor>,
        resource_factory: Arc<dyn ResourceFactory>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let revalidator = (config.asynchronous_workers > 0).then(|| {
            Revalidator::new(
                config.asynchronous_workers,
                Duration::from_millis(200),
                config.max_update_retries.max(1),
            )
        });
        Arc::new(Engine {
            manager,
            executor,
            resource_factory,
            config,
            via: ViaCache::new(),
            revalidator,
            product: "http-cache-core".to_string(),
            product_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// The single entry point (spec §4.12 steps 1-7).
    pub async fn exchange(self: &Arc<Self>, mut request: CacheRequest) -> Result<(EngineResponse, ExchangeOutcome)> {
        if request.uri.path() == "*"
            && request.method == Method::OPTIONS
            && request
                .headers
                .get(http::header::MAX_FORWARDS)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim() == "0")
                .unwrap_or(false)
        {
            let response = ReconstructedResponse { status: StatusCode::NOT_IMPLEMENTED, headers: HeaderMap::new(), body: None };
            return Ok((EngineResponse::Reconstructed(response), ExchangeOutcome::new(CacheStatus::CacheModuleResponse)));
        }

        if let Some(response) = check_fatal_compliance(&request) {
            return Ok((EngineResponse::Reconstructed(response), ExchangeOutcome::new(CacheStatus::CacheModuleResponse)));
        }

        request.headers = entry::strip_hop_by_hop(&request.headers);
        let via_value = self.via.get(request.version, &self.product, &self.product_version);
        if let Ok(value) = HeaderValue::from_str(&via_value) {
            request.headers.append(http::header::VIA, value);
        }

        let request_cc = directives::parse_cache_control(&request.headers);

        match admission::classify(&request.method, request.version, request.uri.path(), &request.headers, &request_cc) {
            Admission::OptionsStar => unreachable!("handled above before requestCompliance"),
            Admission::Bypass => self.bypass(request).await,
            Admission::Admissible => self.admissible(request, request_cc).await,
        }
    }

    async fn bypass(self: &Arc<Self>, request: CacheRequest) -> Result<(EngineResponse, ExchangeOutcome)> {
        let backend = self.executor.execute(request.clone()).await?;
        self.invalidate_for(&request, backend.status, &backend.headers).await;
        Ok((EngineResponse::Backend(backend), ExchangeOutcome::new(CacheStatus::CacheMiss)))
    }

    async fn invalidate_for(&self, request: &CacheRequest, status: StatusCode, headers: &HeaderMap) {
        if let Err(err) = invalidate::evict_invalidated_entries(self.manager.as_ref(), &request.uri, &request.method, status, headers).await {
            log::warn!("invalidation failed for {}: {err}", request.uri);
        }
    }

    async fn admissible(self: &Arc<Self>, request: CacheRequest, request_cc: CacheControl) -> Result<(EngineResponse, ExchangeOutcome)> {
        let cache_match = match store::match_request(self.manager.as_ref(), &request.uri, &request.headers).await {
            Ok(m) => m,
            Err(err) => {
                log::warn!("cache lookup failed for {}: {err}", request.uri);
                crate::entry::CacheMatch::none()
            }
        };

        match cache_match.hit {
            None => self.handle_no_hit(request, request_cc, cache_match.root).await,
            Some(hit) => self.handle_hit(request, request_cc, hit).await,
        }
    }

    async fn handle_no_hit(
        self: &Arc<Self>,
        request: CacheRequest,
        request_cc: CacheControl,
        root: Option<CacheEntry>,
    ) -> Result<(EngineResponse, ExchangeOutcome)> {
        if request_cc.only_if_cached {
            log::debug!("only-if-cached miss for {}", request.uri);
            let response = reconstruct::generate_gateway_timeout();
            return Ok((EngineResponse::Reconstructed(response), ExchangeOutcome::new(CacheStatus::CacheModuleResponse)));
        }

        let negotiable = root.as_ref().is_some_and(|r| r.is_variant_root()) && request.is_repeatable();
        if negotiable {
            return self.negotiate_variants(request, root.unwrap()).await;
        }

        self.call_downstream_and_handle(request).await
    }

    /// Spec §4.12.1.
    async fn negotiate_variants(self: &Arc<Self>, request: CacheRequest, root: CacheEntry) -> Result<(EngineResponse, ExchangeOutcome)> {
        let variant_entries = store::get_variant_entries(self.manager.as_ref(), &root).await.unwrap_or_default();
        let etags: Vec<String> = variant_entries.iter().filter_map(|(_, e)| e.etag().map(str::to_string)).collect();
        let headers = conditional::build_variant_negotiation_request(&request.headers, &etags);
        let cond_request = request.with_headers(headers);

        let request_instant = SystemTime::now();
        let backend = self.executor.execute(cond_request).await?;
        let response_instant = SystemTime::now();

        if backend.status != StatusCode::NOT_MODIFIED {
            return self.handle_backend_response_timed(request, backend, request_instant, response_instant).await;
        }

        let response_etag = backend.headers.get(http::header::ETAG).and_then(|v| v.to_str().ok());
        let matched = response_etag.and_then(|tag| variant_entries.iter().find(|(_, e)| e.etag() == Some(tag)));

        let response_date = directives::parse_http_date(&backend.headers, http::header::DATE);
        let matched = matched.filter(|(_, entry)| {
            !matches!((entry.date(), response_date), (Some(entry_date), Some(response_date)) if entry_date > response_date)
        });

        let Some((variant_key, variant_entry)) = matched else {
            let headers = conditional::build_unconditional_request(&request.headers);
            let retry_request = request.with_headers(headers);
            return self.call_downstream_and_handle(retry_request).await;
        };

        store::store_from_negotiated(self.manager.as_ref(), variant_key, backend.headers.clone(), response_instant).await?;
        let updated = CacheEntry { headers: (&backend.headers).into(), response_instant, ..variant_entry.clone() };
        let response = reconstruct::generate_response(&request.method, &updated, response_instant)?;
        let outcome = ExchangeOutcome::new(CacheStatus::Validated).with_entry(updated);
        Ok((EngineResponse::Reconstructed(response), outcome))
    }

    async fn call_downstream_and_handle(self: &Arc<Self>, request: CacheRequest) -> Result<(EngineResponse, ExchangeOutcome)> {
        let request_instant = SystemTime::now();
        let backend = self.executor.execute(request.clone()).await?;
        let response_instant = SystemTime::now();
        self.handle_backend_response_timed(request, backend, request_instant, response_instant).await
    }

    /// Spec §4.12 step 6.
    async fn handle_hit(self: &Arc<Self>, request: CacheRequest, request_cc: CacheControl, hit: CacheEntry) -> Result<(EngineResponse, ExchangeOutcome)> {
        let response_cc = directives::parse_cache_control(&hit.headers.to_header_map());
        let now = SystemTime::now();
        let inputs = SuitabilityInputs {
            request_cc: &request_cc,
            response_cc: &response_cc,
            entry: &hit,
            request_selector_matches: true,
            now,
            opts: self.config.validity_options(),
        };
        let class = suitability::classify(&inputs);

        match class {
            SuitabilityClass::Fresh | SuitabilityClass::FreshEnough => {
                let response = if suitability::is_conditional(&request.headers) && suitability::all_conditionals_match(&request.headers, &hit) {
                    reconstruct::generate_not_modified_response(&hit, now)
                } else {
                    reconstruct::generate_response(&request.method, &hit, now)?
                };
                Ok((EngineResponse::Reconstructed(response), ExchangeOutcome::new(CacheStatus::CacheHit).with_entry(hit)))
            }
            _ if request_cc.only_if_cached => {
                let response = reconstruct::generate_gateway_timeout();
                Ok((EngineResponse::Reconstructed(response), ExchangeOutcome::new(CacheStatus::CacheModuleResponse).with_entry(hit)))
            }
            SuitabilityClass::Mismatch => self.call_downstream_and_handle(request).await,
            _ if hit.status == StatusCode::NOT_MODIFIED && !suitability::is_conditional(&request.headers) => {
                self.call_downstream_and_handle(request).await
            }
            _ if !request.is_repeatable() => self.call_downstream_and_handle(request).await,
            SuitabilityClass::StaleWhileRevalidated => match &self.revalidator {
                Some(revalidator) if revalidator.is_enabled() => {
                    self.schedule_background_revalidation(&request, hit.clone(), revalidator);
                    let response = reconstruct::generate_response(&request.method, &hit, now)?;
                    Ok((EngineResponse::Reconstructed(response), ExchangeOutcome::new(CacheStatus::CacheModuleResponse).with_entry(hit)))
                }
                _ => self.revalidate_with_fallback(request, hit).await,
            },
            SuitabilityClass::RevalidationRequired | SuitabilityClass::Stale => self.revalidate_with_fallback(request, hit).await,
        }
    }

    /// Spec §4.12.2/§4.12.3: the two revalidation flows share every step
    /// except which caller routes into them, so this one function serves
    /// both `REVALIDATION_REQUIRED` and `STALE`/`STALE_WHILE_REVALIDATED`
    /// without a present revalidator.
    async fn revalidate_with_fallback(self: &Arc<Self>, request: CacheRequest, hit: CacheEntry) -> Result<(EngineResponse, ExchangeOutcome)> {
        let headers = conditional::build_conditional_request(&request.headers, &hit);
        let cond_request = request.with_headers(headers);

        let request_instant = SystemTime::now();
        let backend = match self.executor.execute(cond_request).await {
            Ok(b) => b,
            Err(err) => return Ok(self.stale_fallback_or_failure(&request, &hit, &err)),
        };
        let response_instant = SystemTime::now();

        let entry_date = hit.date();
        let response_date = directives::parse_http_date(&backend.headers, http::header::DATE);
        let should_retry_unconditionally = request.is_repeatable()
            && matches!((entry_date, response_date), (Some(e), Some(r)) if r < e);

        let backend = if should_retry_unconditionally {
            let retry_headers = conditional::build_unconditional_request(&request.headers);
            let retry_request = request.with_headers(retry_headers);
            match self.executor.execute(retry_request).await {
                Ok(b) => b,
                Err(err) => return Ok(self.stale_fallback_or_failure(&request, &hit, &err)),
            }
        } else {
            backend
        };

        if backend.status == StatusCode::NOT_MODIFIED {
            let updated =
                store::update_revalidated(self.manager.as_ref(), &request.uri, &hit, &backend.headers, request_instant, response_instant).await?;
            let response = if suitability::is_conditional(&request.headers) && suitability::all_conditionals_match(&request.headers, &updated) {
                reconstruct::generate_not_modified_response(&updated, response_instant)
            } else {
                reconstruct::generate_response(&request.method, &updated, response_instant)?
            };
            return Ok((EngineResponse::Reconstructed(response), ExchangeOutcome::new(CacheStatus::Validated).with_entry(updated)));
        }

        if is_server_error_eligible_for_stale(backend.status) {
            let request_cc = directives::parse_cache_control(&request.headers);
            let response_cc = directives::parse_cache_control(&hit.headers.to_header_map());
            if let Some(response) = self.build_stale_response_if_eligible(&request, &hit, &request_cc, &response_cc) {
                return Ok((EngineResponse::Reconstructed(response), ExchangeOutcome::new(CacheStatus::CacheModuleResponse).with_entry(hit)));
            }
        }

        self.handle_backend_response_timed(request, backend, request_instant, response_instant).await
    }

    fn stale_fallback_or_failure(&self, request: &CacheRequest, hit: &CacheEntry, err: &CacheError) -> (EngineResponse, ExchangeOutcome) {
        log::warn!("downstream exchange failed while revalidating {}: {err}", request.uri);
        let request_cc = directives::parse_cache_control(&request.headers);
        let response_cc = directives::parse_cache_control(&hit.headers.to_header_map());
        match self.build_stale_response_if_eligible(request, hit, &request_cc, &response_cc) {
            Some(response) => (EngineResponse::Reconstructed(response), ExchangeOutcome::new(CacheStatus::CacheModuleResponse).with_entry(hit.clone())),
            None => {
                let response = reconstruct::generate_gateway_timeout();
                (EngineResponse::Reconstructed(response), ExchangeOutcome::new(CacheStatus::Failure).with_entry(hit.clone()))
            }
        }
    }

    fn build_stale_response_if_eligible(
        &self,
        request: &CacheRequest,
        hit: &CacheEntry,
        request_cc: &CacheControl,
        response_cc: &CacheControl,
    ) -> Option<ReconstructedResponse> {
        let now = SystemTime::now();
        let headers = hit.headers.to_header_map();
        let current_age = validity::current_age(&headers, hit.request_instant, hit.response_instant, now);
        let freshness_lifetime = validity::freshness_lifetime_for_status(hit.status, &headers, response_cc, self.config.validity_options());
        let staleness = validity::staleness(current_age, freshness_lifetime);
        if !validity::may_serve_stale_if_error(self.config.stale_if_error_enabled, request_cc, response_cc, staleness) {
            return None;
        }
        let mut response = reconstruct::generate_response(&request.method, hit, now).ok()?;
        add_warning_110(&mut response.headers);
        Some(response)
    }

    /// Spec §4.12.4 (step 7): protocol-normalize, invalidate, evaluate
    /// cacheability, buffer, and store or pass through.
    async fn handle_backend_response_timed(
        self: &Arc<Self>,
        request: CacheRequest,
        backend: BackendResponse,
        request_instant: SystemTime,
        response_instant: SystemTime,
    ) -> Result<(EngineResponse, ExchangeOutcome)> {
        let backend = normalize_backend_response(&request, backend);
        self.invalidate_for(&request, backend.status, &backend.headers).await;

        if backend.status == StatusCode::NOT_MODIFIED {
            let existing = store::match_request(self.manager.as_ref(), &request.uri, &request.headers).await.ok().and_then(|m| m.hit);
            if let Some(hit) = existing {
                let updated =
                    store::update_revalidated(self.manager.as_ref(), &request.uri, &hit, &backend.headers, request_instant, response_instant).await?;
                let response = reconstruct::generate_response(&request.method, &updated, response_instant)?;
                let outcome = ExchangeOutcome::new(CacheStatus::Validated).with_entry(updated);
                return Ok((EngineResponse::Reconstructed(response), outcome));
            }
        }

        self.maybe_store_fresh_response(&request, &backend, request_instant, response_instant).await?;
        Ok((EngineResponse::Backend(backend), ExchangeOutcome::new(CacheStatus::CacheMiss)))
    }

    /// Shared between the synchronous store path and background
    /// revalidation (spec §4.11: a background job reuses step 7 verbatim).
    /// Returns whether anything was actually written.
    async fn maybe_store_fresh_response(
        &self,
        request: &CacheRequest,
        backend: &BackendResponse,
        request_instant: SystemTime,
        response_instant: SystemTime,
    ) -> Result<bool> {
        let buffered = match buffer_within_cap(&backend.body, self.config.max_object_size) {
            BufferOutcome::Buffered(bytes) => bytes,
            BufferOutcome::Oversized => {
                log::debug!("response for {} exceeds max_object_size, not caching", request.uri);
                return Ok(false);
            }
        };

        let response_cc = directives::parse_cache_control(&backend.headers);
        let ctx = policy::ResponseContext {
            request_method: &request.method,
            request_version: request.version,
            request_has_query: request.uri.query().is_some(),
            request_headers: &request.headers,
            status: backend.status,
            response_headers: &backend.headers,
            response_cc: &response_cc,
            buffered_size: buffered.len() as u64,
            validity_opts: self.config.validity_options(),
        };
        if !policy::is_cacheable(&ctx, &self.config.policy_options()) {
            return Ok(false);
        }

        if self.config.freshness_check_enabled {
            if let Ok(existing) = store::match_request(self.manager.as_ref(), &request.uri, &request.headers).await {
                if let Some(hit) = existing.hit {
                    let incoming_date = directives::parse_http_date(&backend.headers, http::header::DATE);
                    if let (Some(existing_date), Some(incoming_date)) = (hit.date(), incoming_date) {
                        if existing_date > incoming_date {
                            log::debug!("newer entry already present for {}, discarding response", request.uri);
                            return Ok(false);
                        }
                    }
                }
            }
        }

        let needs_resource = !matches!(
            (request.method.clone(), backend.status),
            (Method::HEAD, _) | (_, StatusCode::NO_CONTENT) | (_, StatusCode::NOT_MODIFIED)
        );
        let resource = needs_resource.then(|| self.make_resource(buffered)).transpose()?;

        let entry = CacheEntry::from_response(
            request.method.clone(),
            request.uri.as_str().to_string(),
            crate::entry::StoredHeaders::default(),
            backend.status,
            &backend.headers,
            resource,
            request_instant,
            response_instant,
        );
        store::store(self.manager.as_ref(), &request.uri, &request.headers, entry).await?;
        Ok(true)
    }

    fn make_resource(&self, bytes: Bytes) -> Result<Resource> {
        match self.resource_factory.create(bytes.clone()) {
            Ok(resource) => Ok(resource),
            Err(err) => {
                log::warn!("resource factory failed, falling back to in-memory: {err}");
                InMemoryResourceFactory.create(bytes)
            }
        }
    }

    fn schedule_background_revalidation(self: &Arc<Self>, request: &CacheRequest, hit: CacheEntry, revalidator: &Revalidator) {
        let headers = conditional::build_conditional_request(&request.headers, &hit);
        let cond_request = request.with_headers(headers);
        let key = store::storage_key_for(&request.uri, &hit);
        log::debug!("scheduling background revalidation for {key}");
        let job = Arc::new(BackgroundRevalidationJob { engine: self.clone(), url: request.uri.clone(), cond_request, hit });
        revalidator.trigger(key, job);
    }
}

/// Reject fatally non-compliant requests (spec §4.12 step 1). This crate's
/// request model always carries a fully-buffered body, so the only
/// realistic fatal case left is a missing `Content-Length` on a method that
/// requires an entity.
fn check_fatal_compliance(request: &CacheRequest) -> Option<ReconstructedResponse> {
    let requires_length = matches!(request.method, Method::POST | Method::PUT | Method::PATCH);
    let has_length = request.body.is_some() || request.headers.contains_key(http::header::CONTENT_LENGTH);
    if requires_length && !has_length {
        return Some(ReconstructedResponse { status: StatusCode::LENGTH_REQUIRED, headers: HeaderMap::new(), body: None });
    }
    None
}

/// Spec §4.12.4: strip hop-by-hop headers, drop a vacuous `identity`
/// `Content-Encoding` token, and remove `Transfer-Encoding` for HTTP/1.0
/// requests.
fn normalize_backend_response(request: &CacheRequest, mut backend: BackendResponse) -> BackendResponse {
    backend.headers = entry::strip_hop_by_hop(&backend.headers);
    if backend.headers.get(http::header::CONTENT_ENCODING).map(|v| v.as_bytes()) == Some(b"identity") {
        backend.headers.remove(http::header::CONTENT_ENCODING);
    }
    if request.version == http::Version::HTTP_10 {
        backend.headers.remove(http::header::TRANSFER_ENCODING);
    }
    backend
}

/// One scheduled background revalidation attempt, holding an `Arc<Engine>`
/// so it can reuse `maybe_store_fresh_response` instead of duplicating the
/// store-on-cacheable-response logic (spec §4.11).
struct BackgroundRevalidationJob {
    engine: Arc<Engine>,
    url: Url,
    cond_request: CacheRequest,
    hit: CacheEntry,
}

#[async_trait]
impl RevalidationJob for BackgroundRevalidationJob {
    async fn run(&self) -> Result<RevalidationOutcome> {
        let request_instant = SystemTime::now();
        let backend = self.engine.executor.execute(self.cond_request.clone()).await?;
        let response_instant = SystemTime::now();

        if backend.status == StatusCode::NOT_MODIFIED {
            store::update_revalidated(self.engine.manager.as_ref(), &self.url, &self.hit, &backend.headers, request_instant, response_instant)
                .await?;
            return Ok(RevalidationOutcome::Unchanged);
        }

        if is_server_error_eligible_for_stale(backend.status) {
            return Ok(RevalidationOutcome::Failed);
        }

        let updated = self
            .engine
            .maybe_store_fresh_response(&self.cond_request, &backend, request_instant, response_instant)
            .await?;
        Ok(if updated { RevalidationOutcome::Updated } else { RevalidationOutcome::Failed })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::InMemoryManager;
    use crate::resource::InMemoryResourceFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubExecutor {
        responses: Mutex<Vec<BackendResponse>>,
        calls: AtomicUsize,
    }

    impl StubExecutor {
        fn new(responses: Vec<BackendResponse>) -> Self {
            let mut responses = responses;
            responses.reverse();
            StubExecutor { responses: Mutex::new(responses), calls: AtomicUsize::new(0) }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DownstreamExecutor for StubExecutor {
        async fn execute(&self, _request: CacheRequest) -> Result<BackendResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            responses.pop().ok_or(CacheError::BackendIOError("no more stubbed responses".into()))
        }
    }

    fn request(method: Method, uri: &str) -> CacheRequest {
        CacheRequest { method, uri: Url::parse(uri).unwrap(), version: http::Version::HTTP_11, headers: HeaderMap::new(), body: None }
    }

    fn response(status: StatusCode, headers: Vec<(&str, &str)>, body: &'static [u8]) -> BackendResponse {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.insert(http::HeaderName::from_bytes(k.as_bytes()).unwrap(), HeaderValue::from_str(v).unwrap());
        }
        BackendResponse { status, version: http::Version::HTTP_11, headers: map, body: Bytes::from_static(body) }
    }

    fn engine(executor: Arc<dyn DownstreamExecutor>, config: EngineConfig) -> Arc<Engine> {
        engine_with(Arc::new(InMemoryManager::new(1)), executor, config)
    }

    fn engine_with(manager: Arc<dyn CacheManager>, executor: Arc<dyn DownstreamExecutor>, config: EngineConfig) -> Arc<Engine> {
        Engine::new(manager, executor, Arc::new(InMemoryResourceFactory), config)
    }

    fn http_date(instant: SystemTime) -> String {
        httpdate::fmt_http_date(instant)
    }

    #[tokio::test]
    async fn fresh_response_is_served_from_cache_without_downstream_call() {
        let date = http_date(SystemTime::now());
        let executor = Arc::new(StubExecutor::new(vec![response(
            StatusCode::OK,
            vec![("cache-control", "max-age=60"), ("date", date.as_str())],
            b"abc",
        )]));
        let engine = engine(executor.clone(), EngineConfig::default());

        let (_, outcome) = engine.exchange(request(Method::GET, "http://example.org/a")).await.unwrap();
        assert_eq!(outcome.status, CacheStatus::CacheMiss);

        let (response, outcome) = engine.exchange(request(Method::GET, "http://example.org/a")).await.unwrap();
        assert_eq!(outcome.status, CacheStatus::CacheHit);
        if let EngineResponse::Reconstructed(r) = response {
            assert_eq!(r.body.unwrap(), Bytes::from_static(b"abc"));
        } else {
            panic!("expected a reconstructed response");
        }
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn revalidation_merges_headers_on_304() {
        let executor = Arc::new(StubExecutor::new(vec![
            response(StatusCode::OK, vec![("cache-control", "max-age=10"), ("etag", "\"v1\""), ("date", "Mon, 01 Jan 2024 12:00:00 GMT")], b"x"),
            response(StatusCode::NOT_MODIFIED, vec![("etag", "\"v1\""), ("date", "Mon, 01 Jan 2024 12:00:20 GMT")], b""),
        ]));
        let engine = engine(executor, EngineConfig::default());

        engine.exchange(request(Method::GET, "http://example.org/b")).await.unwrap();
        let (response, outcome) = engine.exchange(request(Method::GET, "http://example.org/b")).await.unwrap();
        assert_eq!(outcome.status, CacheStatus::Validated);
        if let EngineResponse::Reconstructed(r) = response {
            assert_eq!(r.status, StatusCode::OK);
            assert_eq!(r.body.unwrap(), Bytes::from_static(b"x"));
        } else {
            panic!("expected a reconstructed response");
        }
    }

    #[tokio::test]
    async fn only_if_cached_miss_returns_504_without_downstream_call() {
        let executor = Arc::new(StubExecutor::new(vec![]));
        let engine = engine(executor.clone(), EngineConfig::default());

        let mut req = request(Method::GET, "http://example.org/e");
        req.headers.insert(http::header::CACHE_CONTROL, HeaderValue::from_static("only-if-cached"));
        let (response, outcome) = engine.exchange(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(outcome.status, CacheStatus::CacheModuleResponse);
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test]
    async fn unsafe_method_invalidates_existing_entry() {
        let date = http_date(SystemTime::now());
        let manager: Arc<dyn CacheManager> = Arc::new(InMemoryManager::new(1));
        let executor = Arc::new(StubExecutor::new(vec![
            response(StatusCode::OK, vec![("cache-control", "max-age=60"), ("date", date.as_str())], b"abc"),
            response(StatusCode::OK, vec![], b""),
        ]));
        let engine = engine_with(manager.clone(), executor, EngineConfig::default());

        engine.exchange(request(Method::GET, "http://example.org/f")).await.unwrap();
        engine.exchange(request(Method::DELETE, "http://example.org/f")).await.unwrap();

        let executor = Arc::new(StubExecutor::new(vec![response(StatusCode::OK, vec![], b"new")]));
        let engine = engine_with(manager, executor, EngineConfig::default());
        let (_, outcome) = engine.exchange(request(Method::GET, "http://example.org/f")).await.unwrap();
        assert_eq!(outcome.status, CacheStatus::CacheMiss);
    }

    #[tokio::test]
    async fn vary_star_response_is_never_stored() {
        let executor = Arc::new(StubExecutor::new(vec![
            response(StatusCode::OK, vec![("cache-control", "max-age=600"), ("vary", "*")], b"abc"),
            response(StatusCode::OK, vec![("cache-control", "max-age=600"), ("vary", "*")], b"abc"),
        ]));
        let engine = engine(executor.clone(), EngineConfig::default());

        engine.exchange(request(Method::GET, "http://example.org/g")).await.unwrap();
        engine.exchange(request(Method::GET, "http://example.org/g")).await.unwrap();
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn oversized_response_is_never_stored() {
        let big_body: Vec<u8> = vec![b'x'; 100];
        let executor = Arc::new(StubExecutor::new(vec![
            response(StatusCode::OK, vec![("cache-control", "max-age=60")], Box::leak(big_body.clone().into_boxed_slice())),
            response(StatusCode::OK, vec![("cache-control", "max-age=60")], Box::leak(big_body.into_boxed_slice())),
        ]));
        let config = EngineConfig { max_object_size: 8, ..Default::default() };
        let engine = engine(executor.clone(), config);

        let (response, _) = engine.exchange(request(Method::GET, "http://example.org/h")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        engine.exchange(request(Method::GET, "http://example.org/h")).await.unwrap();
        assert_eq!(executor.call_count(), 2);
    }

    #[tokio::test]
    async fn stale_while_revalidate_serves_immediately_and_dedupes_background_call() {
        let date = http_date(SystemTime::now() - Duration::from_secs(10));
        let executor = Arc::new(StubExecutor::new(vec![
            response(
                StatusCode::OK,
                vec![("cache-control", "max-age=5, stale-while-revalidate=30"), ("date", date.as_str())],
                b"d1",
            ),
            response(StatusCode::OK, vec![("cache-control", "max-age=5, stale-while-revalidate=30")], b"d2"),
        ]));
        let engine = engine(executor.clone(), EngineConfig::default());

        engine.exchange(request(Method::GET, "http://example.org/d")).await.unwrap();

        let (response, outcome) = engine.exchange(request(Method::GET, "http://example.org/d")).await.unwrap();
        assert_eq!(outcome.status, CacheStatus::CacheModuleResponse);
        if let EngineResponse::Reconstructed(r) = response {
            assert_eq!(r.body.unwrap(), Bytes::from_static(b"d1"));
        } else {
            panic!("expected an immediate stale reconstruction");
        }
    }
}
