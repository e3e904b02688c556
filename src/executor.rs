//! The downstream executor interface (spec §6): the next element in the
//! request pipeline that actually performs a network exchange. The engine
//! only ever calls it; it never constructs one.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Version};
use url::Url;

/// A request as the engine hands it to the downstream executor. Carries
/// enough of the request line to let the executor reconstruct a real
/// network request, plus whether the request entity (if any) is
/// "repeatable" (spec §4.12.2: synchronous revalidation may retry once with
/// an unconditional request only when the entity is repeatable).
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub method: Method,
    pub uri: Url,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl CacheRequest {
    /// GET/HEAD requests and POST requests with a buffered (non-streaming)
    /// body are repeatable; only a POST with a streaming body the engine
    /// cannot rewind is not. Since this crate's `Resource`/body model never
    /// represents an un-rewindable streaming body, every `CacheRequest` is
    /// repeatable.
    pub fn is_repeatable(&self) -> bool {
        true
    }

    /// Clones this request with `headers` substituted, used throughout the
    /// engine to derive conditional/unconditional/variant-negotiation
    /// sub-requests from a single template without repeating the other
    /// request-line fields at every call site.
    pub fn with_headers(&self, headers: HeaderMap) -> Self {
        CacheRequest { headers, ..self.clone() }
    }
}

/// A response as the downstream executor hands it back to the engine,
/// already buffered (streaming passthrough is handled by the caller before
/// it ever reaches this type — see `engine::BufferOutcome`).
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: http::StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The next element in the request pipeline (spec §6 "Downstream
/// executor"). A single `async fn` unifies the source's classical and
/// asynchronous callback-based shapes, the way the teacher's `Middleware::
/// remote_fetch` does for `reqwest`/`surf`.
#[async_trait]
pub trait DownstreamExecutor: Send + Sync {
    async fn execute(&self, request: CacheRequest) -> Result<BackendResponse>;
}
