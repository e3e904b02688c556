#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
#![allow(clippy::doc_lazy_continuation)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! A standalone RFC 7234 HTTP caching engine, decoupled from any particular
//! HTTP client or server.
//!
//! This crate implements the decision logic a caching middleware needs —
//! admission, freshness and staleness classification, conditional request
//! construction, response reconstruction, invalidation, and background
//! (stale-while-revalidate) revalidation — behind two small integration
//! seams: a [`CacheManager`](backend::CacheManager) for storage and a
//! [`DownstreamExecutor`](executor::DownstreamExecutor) for performing the
//! actual network exchange. A caller wires those two traits to its HTTP
//! stack of choice and drives everything else through [`Engine::exchange`].
//!
//! ## Basic usage
//!
//! ```rust,no_run
//! use http_cache_core::backend::InMemoryManager;
//! use http_cache_core::config::EngineConfig;
//! use http_cache_core::engine::Engine;
//! use http_cache_core::resource::InMemoryResourceFactory;
//! use std::sync::Arc;
//!
//! # async fn run(executor: Arc<dyn http_cache_core::executor::DownstreamExecutor>) {
//! let manager = Arc::new(InMemoryManager::new(3));
//! let engine = Engine::new(
//!     manager,
//!     executor,
//!     Arc::new(InMemoryResourceFactory),
//!     EngineConfig::default(),
//! );
//! # }
//! ```
//!
//! Each call to [`Engine::exchange`] drives one request through admission,
//! cache lookup, freshness classification, and — when necessary —
//! revalidation or a fresh downstream fetch, returning the response the
//! caller should serve along with a status describing how it was produced.

/// Admission control: the first decision (C1) on whether a request is even
/// a candidate for cache handling.
pub mod admission;
/// Storage integration seam: the `CacheManager` trait and the in-memory
/// reference implementation.
pub mod backend;
/// Engine-wide tunables (`EngineConfig`) and their conversion into the
/// narrower option structs individual modules need.
pub mod config;
/// Conditional-request construction for synchronous and background
/// revalidation and variant negotiation.
pub mod conditional;
/// `Cache-Control` and related header parsing.
pub mod directives;
/// The decision engine: the state machine that ties every other module
/// together for a single request/response exchange.
pub mod engine;
/// The stored-entry data model.
pub mod entry;
/// The crate's error type and result alias.
pub mod error;
/// The downstream-exchange integration seam.
pub mod executor;
/// Cache invalidation on unsafe methods.
pub mod invalidate;
/// Cache key and variant selector construction.
pub mod key;
/// Storability policy: whether a response may be cached at all.
pub mod policy;
/// Reconstructing an HTTP response from a stored entry.
pub mod reconstruct;
/// Cached response body storage (`Resource`) and its factories.
pub mod resource;
/// Background (stale-while-revalidate) revalidation scheduling.
pub mod revalidator;
/// The on-disk wire format used to persist a `CacheEntry`.
#[cfg(feature = "json")]
pub mod serde_format;
/// Cache status reporting (`CacheStatus`, `ExchangeOutcome`) and the `Via`
/// header cache.
pub mod status;
/// The storage-facing operations built on top of `CacheManager`.
pub mod store;
/// Freshness and staleness classification of a cached entry against a live
/// request.
pub mod suitability;
/// Age, freshness lifetime, and staleness arithmetic (RFC 7234 §4.2).
pub mod validity;

pub use backend::CacheManager;
pub use config::EngineConfig;
pub use engine::{Engine, EngineResponse};
pub use error::{CacheError, Result};
pub use executor::{BackendResponse, CacheRequest, DownstreamExecutor};
pub use status::{CacheStatus, ExchangeOutcome};
