//! Engine configuration (spec §6), the teacher's `HttpCacheOptions` shape
//! generalized to the full §6 table. Only the options enumerated there are
//! implemented; legacy options from older source revisions (a 303-caching
//! toggle, a weak-ETag-on-PUT/DELETE toggle) are deliberately absent (§9).

use std::time::Duration;

/// The engine's full configuration surface (spec §6 table).
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Upper bound (bytes) on body buffered for caching; larger bodies
    /// stream through uncached. Default 8 KiB.
    pub max_object_size: u64,
    /// Advisory upper bound on entry count passed to the backend. Default
    /// 1 000.
    pub max_cache_entries: u64,
    /// CAS retry budget in `updateEntry`. Default 1.
    pub max_update_retries: u32,
    /// Enables heuristic freshness in C3. Default false.
    pub heuristic_caching_enabled: bool,
    /// Coefficient in heuristic lifetime calculation. Default 0.1.
    pub heuristic_coefficient: f64,
    /// Fallback lifetime when Last-Modified absent. Default 0.
    pub heuristic_default_lifetime: Duration,
    /// Switches behavior between public/shared and private-cache semantics.
    /// Default true.
    pub shared_cache: bool,
    /// Before overwriting, re-check whether a strictly newer entry exists.
    /// Default true.
    pub freshness_check_enabled: bool,
    /// Thread/task budget for C11. Zero disables async revalidation.
    /// Default 1.
    pub asynchronous_workers: usize,
    /// Per RFC: refuse to cache `?`-URI responses from HTTP/1.0 origins.
    /// Default false.
    pub never_cache_http10_responses_with_query: bool,
    /// Same for HTTP/1.1 without explicit freshness. Default false.
    pub never_cache_http11_responses_with_query: bool,
    /// Enable the stale-if-error directive. Default false.
    pub stale_if_error_enabled: bool,
    /// Permit POST caching when the response carries explicit freshness
    /// headers (§9 open question, resolved: modern convention).
    pub allow_post_caching: bool,
    /// Cache 303 responses. Off by default, matching the modern convention
    /// recorded in DESIGN.md.
    pub cache_303: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_object_size: 8 * 1024,
            max_cache_entries: 1_000,
            max_update_retries: 1,
            heuristic_caching_enabled: false,
            heuristic_coefficient: 0.1,
            heuristic_default_lifetime: Duration::ZERO,
            shared_cache: true,
            freshness_check_enabled: true,
            asynchronous_workers: 1,
            never_cache_http10_responses_with_query: false,
            never_cache_http11_responses_with_query: false,
            stale_if_error_enabled: false,
            allow_post_caching: true,
            cache_303: false,
        }
    }
}

impl EngineConfig {
    /// Projects the subset of this configuration that C3 (freshness/age)
    /// needs.
    pub fn validity_options(&self) -> crate::validity::ValidityOptions {
        crate::validity::ValidityOptions {
            shared: self.shared_cache,
            heuristic_caching_enabled: self.heuristic_caching_enabled,
            heuristic_coefficient: self.heuristic_coefficient,
            heuristic_default_lifetime: self.heuristic_default_lifetime,
        }
    }

    /// Projects the subset of this configuration that C9 (storability
    /// policy) needs.
    pub fn policy_options(&self) -> crate::policy::PolicyOptions {
        crate::policy::PolicyOptions {
            max_object_size: self.max_object_size,
            never_cache_http10_with_query: self.never_cache_http10_responses_with_query,
            never_cache_http11_with_query: self.never_cache_http11_responses_with_query,
            allow_post_caching: self.allow_post_caching,
            cache_303: self.cache_303,
        }
    }
}
