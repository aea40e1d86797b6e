//! Core sliding-window admission algorithm.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::error::{FormgateError, Result};
use crate::storage::StorageBackend;

use super::key::LimiterKey;
use super::window::WindowState;

/// Bounded attempts for the load-modify-store sequence when the swap loses.
const MAX_CAS_ATTEMPTS: u32 = 3;
/// Bounded attempts against a failing storage backend.
const MAX_STORAGE_ATTEMPTS: u32 = 3;
/// Initial backoff between storage attempts; doubles per retry.
const STORAGE_BACKOFF: Duration = Duration::from_millis(10);

/// Outcome of an admission check.
///
/// Rejection is a normal outcome, never an error. `remaining == u64::MAX`
/// marks the unlimited decisions produced by the disabled policy and by
/// allow-listed clients. A rejection without `retry_after` is a permanent
/// block, not a time-based one; callers should not print a retry hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed.
    pub accepted: bool,
    /// Slots left in the current window when accepted.
    pub remaining: u64,
    /// Time until a slot frees up, present only for time-based rejections.
    pub retry_after: Option<Duration>,
}

impl Decision {
    /// An accepted consumption with `remaining` slots left.
    pub fn accepted(remaining: u64) -> Self {
        Self {
            accepted: true,
            remaining,
            retry_after: None,
        }
    }

    /// An acceptance outside any bookkeeping (policy disabled, allow list).
    pub fn unlimited() -> Self {
        Self {
            accepted: true,
            remaining: u64::MAX,
            retry_after: None,
        }
    }

    /// A time-based rejection.
    pub fn rejected(retry_after: Duration) -> Self {
        Self {
            accepted: false,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }

    /// A permanent rejection (denied client address).
    pub fn denied() -> Self {
        Self {
            accepted: false,
            remaining: 0,
            retry_after: None,
        }
    }

    /// Whether this decision bypassed bookkeeping entirely.
    pub fn is_unlimited(&self) -> bool {
        self.accepted && self.remaining == u64::MAX
    }
}

/// Keyed sliding-window admission controller.
///
/// Same-key decisions serialize through the storage backend's
/// compare-and-swap; the limiter holds no per-key locks of its own, so
/// distinct keys never contend.
pub struct SlidingWindowLimiter {
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a limiter over the given storage and clock.
    pub fn new(storage: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Consume one slot for `key` under a (limit, interval) policy.
    ///
    /// The load-modify-store sequence is atomic per key: losing the swap
    /// re-runs the whole sequence against a fresh load, bounded by
    /// [`MAX_CAS_ATTEMPTS`]. A rejected attempt never mutates stored state.
    pub async fn consume(
        &self,
        key: &LimiterKey,
        limit: u64,
        interval: Duration,
    ) -> Result<Decision> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let stored = self.load_with_retry(key).await?;
            let now = self.clock.now();

            // Undecodable state falls back to a fresh window; the raw bytes
            // still guard the swap so the overwrite stays atomic.
            let mut state = stored
                .as_deref()
                .and_then(WindowState::decode)
                .unwrap_or_else(|| WindowState::new(now));

            state.advance_to(now, interval);
            let effective = state.effective_count(now, interval);

            if effective >= limit {
                let retry_after = state.retry_after(now, interval);
                debug!(
                    key = %key,
                    effective = effective,
                    limit = limit,
                    "Rate limit exceeded"
                );
                return Ok(Decision::rejected(retry_after));
            }

            state.record_hit();
            let remaining = limit - (effective + 1);
            let encoded = state.encode();
            let ttl = interval.saturating_mul(2);

            if self
                .cas_with_retry(key, stored.as_deref(), &encoded, ttl)
                .await?
            {
                trace!(key = %key, remaining = remaining, "Consumption recorded");
                return Ok(Decision::accepted(remaining));
            }

            trace!(key = %key, attempt = attempt, "Lost compare-and-swap, reloading");
        }

        Err(FormgateError::StorageUnavailable(format!(
            "compare-and-swap contention exhausted for {}",
            key
        )))
    }

    async fn load_with_retry(&self, key: &LimiterKey) -> Result<Option<Vec<u8>>> {
        let mut backoff = STORAGE_BACKOFF;
        let mut last_error = None;
        for _ in 0..MAX_STORAGE_ATTEMPTS {
            match self.storage.load(key.as_str()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "Storage load failed, backing off");
                    last_error = Some(e);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            FormgateError::StorageUnavailable("load retries exhausted".to_string())
        }))
    }

    async fn cas_with_retry(
        &self,
        key: &LimiterKey,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Duration,
    ) -> Result<bool> {
        let mut backoff = STORAGE_BACKOFF;
        let mut last_error = None;
        for _ in 0..MAX_STORAGE_ATTEMPTS {
            match self
                .storage
                .compare_and_swap(key.as_str(), expected, new, ttl)
                .await
            {
                Ok(swapped) => return Ok(swapped),
                Err(e) => {
                    warn!(key = %key, error = %e, "Storage swap failed, backing off");
                    last_error = Some(e);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            FormgateError::StorageUnavailable("swap retries exhausted".to_string())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::KeyingMode;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    const INTERVAL: Duration = Duration::from_secs(60);

    struct Harness {
        clock: Arc<ManualClock>,
        storage: Arc<MemoryStorage>,
        limiter: SlidingWindowLimiter,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        ));
        let storage = Arc::new(MemoryStorage::with_clock(clock.clone()));
        let limiter = SlidingWindowLimiter::new(storage.clone(), clock.clone());
        Harness {
            clock,
            storage,
            limiter,
        }
    }

    fn key(form: &str) -> LimiterKey {
        LimiterKey::derive(KeyingMode::PerForm, form, "192.0.2.1")
    }

    #[tokio::test]
    async fn test_accepts_up_to_limit_then_rejects() {
        let h = harness();
        let key = key("contact");

        for expected_remaining in [2, 1, 0] {
            let decision = h.limiter.consume(&key, 3, INTERVAL).await.unwrap();
            assert!(decision.accepted);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = h.limiter.consume(&key, 3, INTERVAL).await.unwrap();
        assert!(!decision.accepted);
        assert!(decision.retry_after.is_some());
    }

    #[tokio::test]
    async fn test_rejection_reports_time_to_window_end() {
        let h = harness();
        let key = key("contact");

        h.limiter.consume(&key, 2, INTERVAL).await.unwrap();
        h.limiter.consume(&key, 2, INTERVAL).await.unwrap();

        h.clock.advance(chrono::Duration::seconds(1));
        let decision = h.limiter.consume(&key, 2, INTERVAL).await.unwrap();
        assert!(!decision.accepted);
        assert_eq!(decision.retry_after, Some(Duration::from_secs(59)));
    }

    #[tokio::test]
    async fn test_rejected_consume_never_mutates_state() {
        let h = harness();
        let key = key("contact");
        h.limiter.consume(&key, 1, INTERVAL).await.unwrap();

        let before = h.storage.load(key.as_str()).await.unwrap();
        let decision = h.limiter.consume(&key, 1, INTERVAL).await.unwrap();
        let after = h.storage.load(key.as_str()).await.unwrap();

        assert!(!decision.accepted);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_slot_frees_after_window_advances() {
        let h = harness();
        let key = key("contact");

        h.limiter.consume(&key, 2, INTERVAL).await.unwrap();
        h.limiter.consume(&key, 2, INTERVAL).await.unwrap();
        assert!(!h.limiter.consume(&key, 2, INTERVAL).await.unwrap().accepted);

        // Just past the window the old hits blend out enough for one slot.
        h.clock.advance(chrono::Duration::seconds(61));
        let decision = h.limiter.consume(&key, 2, INTERVAL).await.unwrap();
        assert!(decision.accepted);
    }

    #[tokio::test]
    async fn test_counters_reset_after_two_idle_intervals() {
        let h = harness();
        let key = key("contact");

        h.limiter.consume(&key, 2, INTERVAL).await.unwrap();
        h.limiter.consume(&key, 2, INTERVAL).await.unwrap();

        h.clock.advance(chrono::Duration::seconds(121));
        for _ in 0..2 {
            let decision = h.limiter.consume(&key, 2, INTERVAL).await.unwrap();
            assert!(decision.accepted);
        }
    }

    #[tokio::test]
    async fn test_boundary_burst_is_smoothed() {
        let h = harness();
        let key = key("contact");

        for _ in 0..4 {
            h.limiter.consume(&key, 4, INTERVAL).await.unwrap();
        }

        // A naive fixed window would grant four fresh slots right after the
        // boundary; the blended previous window must still push back.
        h.clock.advance(chrono::Duration::seconds(61));
        let first = h.limiter.consume(&key, 4, INTERVAL).await.unwrap();
        assert!(first.accepted);
        let second = h.limiter.consume(&key, 4, INTERVAL).await.unwrap();
        assert!(!second.accepted);
    }

    #[tokio::test]
    async fn test_backward_clock_still_rejects() {
        let h = harness();
        let key = key("contact");

        h.limiter.consume(&key, 1, INTERVAL).await.unwrap();

        h.clock.advance(chrono::Duration::seconds(-30));
        let decision = h.limiter.consume(&key, 1, INTERVAL).await.unwrap();
        assert!(!decision.accepted);
        assert_eq!(decision.retry_after, Some(INTERVAL));
    }

    #[tokio::test]
    async fn test_corrupt_state_restarts_window() {
        let h = harness();
        let key = key("contact");

        h.storage
            .compare_and_swap(key.as_str(), None, b"garbage", INTERVAL)
            .await
            .unwrap();

        let decision = h.limiter.consume(&key, 1, INTERVAL).await.unwrap();
        assert!(decision.accepted);

        let stored = h.storage.load(key.as_str()).await.unwrap().unwrap();
        assert!(WindowState::decode(&stored).is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exactly_one_caller_wins_last_slot() {
        let h = harness();
        let key = Arc::new(key("contact"));
        let limiter = Arc::new(h.limiter);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                limiter.consume(&key, 1, INTERVAL).await.unwrap()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().accepted {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    struct FailingStorage;

    #[async_trait]
    impl StorageBackend for FailingStorage {
        async fn load(&self, _key: &str) -> crate::error::Result<Option<Vec<u8>>> {
            Err(FormgateError::StorageUnavailable("backend down".to_string()))
        }

        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected: Option<&[u8]>,
            _new: &[u8],
            _ttl: Duration,
        ) -> crate::error::Result<bool> {
            Err(FormgateError::StorageUnavailable("backend down".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_outage_surfaces_after_retries() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        ));
        let limiter = SlidingWindowLimiter::new(Arc::new(FailingStorage), clock);

        let result = limiter.consume(&key("contact"), 5, INTERVAL).await;
        assert!(matches!(
            result,
            Err(FormgateError::StorageUnavailable(_))
        ));
    }
}
