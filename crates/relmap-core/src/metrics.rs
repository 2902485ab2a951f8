//! Global atomic counters for relmap runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    api_requests: AtomicU64,
    api_retries: AtomicU64,
    degraded_fetches: AtomicU64,
    cache_hits: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            api_requests: AtomicU64::new(0),
            api_retries: AtomicU64::new(0),
            degraded_fetches: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    /// Increment the remote-requests counter by one.
    pub fn inc_api_requests(&self) {
        self.api_requests.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "api_requests", "counter incremented");
    }

    /// Increment the retried-requests counter by one.
    pub fn inc_api_retries(&self) {
        self.api_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "api_retries", "counter incremented");
    }

    /// A remote data point that degraded to "missing".
    pub fn inc_degraded_fetches(&self) {
        self.degraded_fetches.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "degraded_fetches", "counter incremented");
    }

    /// An entity served from the prior cache instead of the remote.
    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_hits", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            api_requests = self.api_requests(),
            api_retries = self.api_retries(),
            degraded_fetches = self.degraded_fetches(),
            cache_hits = self.cache_hits(),
        );
    }

    pub fn api_requests(&self) -> u64 {
        self.api_requests.load(Ordering::Relaxed)
    }

    pub fn api_retries(&self) -> u64 {
        self.api_retries.load(Ordering::Relaxed)
    }

    pub fn degraded_fetches(&self) -> u64 {
        self.degraded_fetches.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.api_requests.store(0, Ordering::Relaxed);
        self.api_retries.store(0, Ordering::Relaxed);
        self.degraded_fetches.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.api_requests(), 0);
        m.inc_api_requests();
        m.inc_api_requests();
        assert_eq!(m.api_requests(), 2);

        m.inc_api_retries();
        assert_eq!(m.api_retries(), 1);

        m.inc_degraded_fetches();
        m.inc_cache_hits();
        m.inc_cache_hits();
        assert_eq!(m.degraded_fetches(), 1);
        assert_eq!(m.cache_hits(), 2);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_api_requests();
        m.inc_api_retries();
        m.inc_degraded_fetches();
        m.inc_cache_hits();
        m.reset();
        assert_eq!(m.api_requests(), 0);
        assert_eq!(m.api_retries(), 0);
        assert_eq!(m.degraded_fetches(), 0);
        assert_eq!(m.cache_hits(), 0);
    }
}
