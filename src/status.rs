//! Observable per-exchange status (spec §6) and the small concurrent
//! `Via`-string cache the design notes call for (§9: "model as a small
//! concurrent map keyed by (scheme, major, minor); never rely on a
//! process-wide singleton").

use crate::directives::{via_header_value, CacheControl};
use crate::entry::CacheEntry;
use dashmap::DashMap;
use http::Version;
use std::sync::Arc;

/// The five-way status the engine assigns to every exchange (spec §6,
/// property P1). Generalizes the teacher's two-valued `HitOrMiss`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    CacheHit,
    CacheMiss,
    Validated,
    CacheModuleResponse,
    Failure,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CacheStatus::CacheHit => "CACHE_HIT",
            CacheStatus::CacheMiss => "CACHE_MISS",
            CacheStatus::Validated => "VALIDATED",
            CacheStatus::CacheModuleResponse => "CACHE_MODULE_RESPONSE",
            CacheStatus::Failure => "FAILURE",
        };
        f.write_str(s)
    }
}

/// Everything observable about one completed exchange, attached alongside
/// the response itself (spec §6 "Observable response context attributes").
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    pub status: CacheStatus,
    pub matched_entry: Option<CacheEntry>,
    pub response_cache_control: Option<CacheControl>,
}

impl ExchangeOutcome {
    pub fn new(status: CacheStatus) -> Self {
        ExchangeOutcome { status, matched_entry: None, response_cache_control: None }
    }

    pub fn with_entry(mut self, entry: CacheEntry) -> Self {
        self.matched_entry = Some(entry);
        self
    }

    pub fn with_response_cache_control(mut self, cc: CacheControl) -> Self {
        self.response_cache_control = Some(cc);
        self
    }
}

/// A small lazily-populated cache of `Via` header values keyed by protocol
/// version, so the engine never reformats the same string twice per
/// version and never reaches for a process-wide `static`.
#[derive(Debug, Clone, Default)]
pub struct ViaCache {
    values: Arc<DashMap<Version, Arc<str>>>,
}

impl ViaCache {
    pub fn new() -> Self {
        ViaCache::default()
    }

    /// Returns the `Via` value for `version`, computing and caching it on
    /// first use.
    pub fn get(&self, version: Version, product: &str, product_version: &str) -> Arc<str> {
        if let Some(existing) = self.values.get(&version) {
            return existing.clone();
        }
        let (protocol, major, minor) = version_parts(version);
        let value: Arc<str> =
            via_header_value(protocol, major, minor, product, product_version).into();
        self.values.insert(version, value.clone());
        value
    }
}

fn version_parts(version: Version) -> (&'static str, u8, u8) {
    match version {
        Version::HTTP_09 => ("HTTP", 0, 9),
        Version::HTTP_10 => ("HTTP", 1, 0),
        Version::HTTP_11 => ("HTTP", 1, 1),
        Version::HTTP_2 => ("HTTP", 2, 0),
        Version::HTTP_3 => ("HTTP", 3, 0),
        _ => ("HTTP", 1, 1),
    }
}
