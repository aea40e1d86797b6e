//! Persisted sliding-window state and its codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Bookkeeping for one limiter key: two adjacent fixed sub-windows.
///
/// The window is aligned to the key's first-seen time and advances only by
/// whole intervals, so alignment stays deterministic per key. The effective
/// count blends the previous sub-window by the fraction of it still inside
/// the trailing interval, which smooths the burst-at-boundary problem of a
/// naive fixed window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    /// Start of the current fixed sub-window, unix microseconds.
    window_start_micros: i64,
    /// Consumptions recorded in the current sub-window.
    current: u64,
    /// Consumptions recorded in the sub-window before it.
    previous: u64,
}

impl WindowState {
    /// Fresh state for a key first seen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            window_start_micros: now.timestamp_micros(),
            current: 0,
            previous: 0,
        }
    }

    /// Start of the current sub-window.
    pub fn window_start(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.window_start_micros).unwrap_or_default()
    }

    /// Count recorded in the current sub-window.
    pub fn current_count(&self) -> u64 {
        self.current
    }

    /// Count recorded in the previous sub-window.
    pub fn previous_count(&self) -> u64 {
        self.previous
    }

    /// Advance the alignment so `now` falls inside the current sub-window.
    ///
    /// One elapsed interval shifts the current count into the previous slot;
    /// two or more drop both. Must be called before reading the effective
    /// count.
    pub fn advance_to(&mut self, now: DateTime<Utc>, interval: Duration) {
        let interval_micros = interval_micros(interval);
        if interval_micros == 0 {
            return;
        }
        let elapsed = self.clamped_micros(now) - self.window_start_micros;
        let advanced = elapsed / interval_micros;
        if advanced == 1 {
            self.previous = self.current;
            self.current = 0;
        } else if advanced >= 2 {
            self.previous = 0;
            self.current = 0;
        }
        if advanced > 0 {
            self.window_start_micros += advanced * interval_micros;
        }
    }

    /// Blended consumption count over the trailing interval ending at `now`.
    ///
    /// The previous sub-window contributes the floor of its count weighted
    /// by the fraction of its span still inside the trailing window. Floor,
    /// not rounding: a consumption only counts while it is fully inside.
    pub fn effective_count(&self, now: DateTime<Utc>, interval: Duration) -> u64 {
        let interval_micros = interval_micros(interval);
        if interval_micros == 0 {
            return self.current;
        }
        let into = (self.clamped_micros(now) - self.window_start_micros) as f64
            / interval_micros as f64;
        let overlap = (1.0 - into).clamp(0.0, 1.0);
        self.current + (self.previous as f64 * overlap).floor() as u64
    }

    /// Record one accepted consumption.
    pub fn record_hit(&mut self) {
        self.current = self.current.saturating_add(1);
    }

    /// Time until the current sub-window ends and the oldest contribution
    /// starts decaying out of the trailing interval.
    ///
    /// Clamped to at least one second, never negative.
    pub fn retry_after(&self, now: DateTime<Utc>, interval: Duration) -> Duration {
        let window_end = self.window_start_micros.saturating_add(interval_micros(interval));
        let remaining = (window_end - self.clamped_micros(now)).max(0);
        let remaining = Duration::from_micros(remaining as u64);
        remaining.max(Duration::from_secs(1))
    }

    /// Decode a stored value.
    ///
    /// Garbage reads as absent: a store handing back bytes the codec does
    /// not understand must not take admission control down, it just restarts
    /// the window for that key.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice(bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "Discarding undecodable window state");
                None
            }
        }
    }

    /// Encode for storage.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("window state serializes")
    }

    /// A clock that ran backward must not mint capacity: `now` is clamped
    /// to the window start for all arithmetic.
    fn clamped_micros(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_micros().max(self.window_start_micros)
    }
}

/// Interval width in microseconds, saturating instead of wrapping.
fn interval_micros(interval: Duration) -> i64 {
    interval.as_micros().min(i64::MAX as u128) as i64
}
