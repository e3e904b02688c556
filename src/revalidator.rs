//! Asynchronous revalidator (C11): fire-and-forget background revalidation
//! for the stale-while-revalidate path, with stampede protection so two
//! concurrent triggers for the same key share one in-flight exchange.
//!
//! Grounded on the leader/follower `Shared<BoxFuture>` pattern a
//! cache-stampede-protected fetch command uses elsewhere in the corpus: a
//! `DashMap` of in-flight futures keyed by cache key, where the first caller
//! becomes the leader and inserts the shared future, and every later caller
//! for the same key just clones and awaits it.

use crate::error::CacheError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// What a background revalidation attempt produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// The entry was replaced or refreshed.
    Updated,
    /// A 304 confirmed the stored entry was still current.
    Unchanged,
    /// The exchange failed; the stored entry is left as-is (spec §4.11:
    /// a failed background revalidation never evicts the stale entry).
    Failed,
}

/// One job for the revalidator to run: re-issue the forked exchange and
/// apply its result to the store. `Send + Sync + 'static` so it can be
/// boxed and shared across the leader/follower fan-in.
#[async_trait]
pub trait RevalidationJob: Send + Sync + 'static {
    async fn run(&self) -> Result<RevalidationOutcome, CacheError>;
}

type SharedResult = Result<RevalidationOutcome, Arc<CacheError>>;
type SharedJob = Shared<BoxFuture<'static, SharedResult>>;

/// Bounded background worker pool with per-key stampede protection (spec
/// §4.11, §5 "asynchronous_workers").
#[derive(Clone)]
pub struct Revalidator {
    inflight: Arc<DashMap<String, SharedJob>>,
    permits: Arc<Semaphore>,
    worker_budget: usize,
    retry_backoff: Duration,
    max_attempts: u32,
    cancellation: CancellationToken,
}

impl Revalidator {
    /// `worker_budget` of zero disables asynchronous revalidation entirely
    /// (spec §6 `asynchronous_workers: 0`); callers must check
    /// [`Revalidator::is_enabled`] before calling [`Revalidator::trigger`],
    /// since a zero-permit semaphore would otherwise block forever.
    pub fn new(worker_budget: usize, retry_backoff: Duration, max_attempts: u32) -> Self {
        Revalidator {
            inflight: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(worker_budget)),
            worker_budget,
            retry_backoff,
            max_attempts: max_attempts.max(1),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.worker_budget > 0
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Triggers background revalidation for `key`, deduplicating against any
    /// already-running attempt for the same key (spec §4.11 "concurrent
    /// triggers for the same key join the existing attempt instead of
    /// issuing a second request"). Returns immediately; the caller does not
    /// await the result.
    pub fn trigger(&self, key: String, job: Arc<dyn RevalidationJob>) {
        let shared = match self.inflight.entry(key.clone()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(vacant) => {
                let permits = self.permits.clone();
                let retry_backoff = self.retry_backoff;
                let max_attempts = self.max_attempts;
                let cancellation = self.cancellation.clone();

                let future: BoxFuture<'static, SharedResult> = async move {
                    let _permit = permits.acquire_owned().await.ok();
                    run_with_backoff(job, retry_backoff, max_attempts, &cancellation)
                        .await
                        .map_err(Arc::new)
                }
                .boxed();
                let shared = future.shared();
                vacant.insert(shared.clone());
                shared
            }
        };

        let inflight = self.inflight.clone();
        tokio::spawn(async move {
            let _ = shared.await;
            inflight.remove(&key);
        });
    }

    /// Cancels every in-flight and future revalidation attempt (spec §5
    /// shutdown: outstanding workers observe cancellation and stop retrying,
    /// rather than being forcibly killed mid-exchange).
    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }
}

async fn run_with_backoff(
    job: Arc<dyn RevalidationJob>,
    backoff: Duration,
    max_attempts: u32,
    cancellation: &CancellationToken,
) -> Result<RevalidationOutcome, CacheError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancellation.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        match job.run().await {
            Ok(outcome) => return Ok(outcome),
            Err(_) if attempt < max_attempts => {
                tokio::select! {
                    _ = tokio::time::sleep(backoff * attempt) => {}
                    _ = cancellation.cancelled() => return Err(CacheError::Cancelled),
                }
            }
            Err(err) => return Err(err),
        }
    }
}
