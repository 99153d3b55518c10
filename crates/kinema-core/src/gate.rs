//! Per-user broadcast throttle.
//!
//! The gate decides whether a live broadcast may fire now for a given user
//! key. It governs broadcast emission only: persistence is never gated, so
//! durability stays independent of network chattiness.

use dashmap::DashMap;
use std::time::Duration;
use tracing::trace;

/// Key one throttle bucket is tracked under. `None` is the shared bucket
/// for anonymous sessions.
pub type GateKey = Option<String>;

/// Per-key minimum-interval throttle.
///
/// State lives for the lifetime of the process. Key cardinality equals the
/// number of distinct concurrent users, so no expiry is needed.
#[derive(Debug)]
pub struct RateGate {
    interval_ms: i64,
    last_allowed: DashMap<GateKey, i64>,
}

impl RateGate {
    /// Create a gate enforcing `interval` between broadcasts per key.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as i64,
            last_allowed: DashMap::new(),
        }
    }

    /// Decide whether a broadcast may fire at `now_ms` for `key`.
    ///
    /// Returns `true` and records `now_ms` as the new last-allowed stamp
    /// iff at least the configured interval has passed since the previous
    /// allowed broadcast for `key`; otherwise returns `false` and leaves
    /// state unchanged. The first event per key always passes.
    ///
    /// The check and the stamp update happen under the map entry lock, so
    /// two concurrent calls for one key inside the interval cannot both
    /// pass.
    pub fn allow(&self, key: Option<&str>, now_ms: i64) -> bool {
        use dashmap::mapref::entry::Entry;

        match self.last_allowed.entry(key.map(str::to_owned)) {
            Entry::Vacant(slot) => {
                slot.insert(now_ms);
                true
            }
            Entry::Occupied(mut slot) => {
                if now_ms.saturating_sub(*slot.get()) >= self.interval_ms {
                    slot.insert(now_ms);
                    true
                } else {
                    trace!(interval_ms = self.interval_ms, "Broadcast suppressed");
                    false
                }
            }
        }
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.last_allowed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(interval_ms: u64) -> RateGate {
        RateGate::new(Duration::from_millis(interval_ms))
    }

    #[test]
    fn test_first_event_always_passes() {
        let gate = gate(500);
        assert!(gate.allow(Some("7"), 0));
        assert!(gate.allow(None, 0));
    }

    #[test]
    fn test_monotonicity() {
        let gate = gate(500);
        assert!(gate.allow(Some("7"), 1_000));
        assert!(!gate.allow(Some("7"), 1_100));
        assert!(!gate.allow(Some("7"), 1_499));
        assert!(gate.allow(Some("7"), 1_500));
        assert!(!gate.allow(Some("7"), 1_999));
    }

    #[test]
    fn test_denied_call_leaves_state_unchanged() {
        let gate = gate(500);
        assert!(gate.allow(Some("7"), 1_000));
        // Denied attempts must not push the window forward.
        assert!(!gate.allow(Some("7"), 1_400));
        assert!(gate.allow(Some("7"), 1_500));
    }

    #[test]
    fn test_keys_are_independent() {
        let gate = gate(500);
        assert!(gate.allow(Some("7"), 1_000));
        assert!(gate.allow(Some("8"), 1_000));
        assert!(gate.allow(None, 1_000));
        assert!(!gate.allow(Some("7"), 1_100));
        assert!(!gate.allow(None, 1_100));
        assert_eq!(gate.tracked_keys(), 3);
    }

    #[test]
    fn test_zero_interval_always_allows() {
        let gate = gate(0);
        assert!(gate.allow(Some("7"), 100));
        assert!(gate.allow(Some("7"), 100));
    }
}
