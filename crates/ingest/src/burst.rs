//! Per-session burst-mode circuit breaker (spec.md §4.D).
//!
//! If more than `burst_events_threshold` events from one session arrive
//! within `burst_window_ms`, the session enters burst mode: only the
//! first and last `command_end` of each burst bucket are persisted;
//! intermediate events update in-memory recency only. The session
//! exits burst mode after `burst_quiet_ms` of silence.

use std::collections::HashMap;
use std::sync::Mutex;

pub const BURST_EVENTS_THRESHOLD_DEFAULT: u32 = 10;
pub const BURST_WINDOW_MS_DEFAULT: i64 = 100;
pub const BURST_QUIET_MS_DEFAULT: i64 = 500;

#[derive(Debug, Clone, Copy)]
pub struct BurstConfig {
    pub events_threshold: u32,
    pub window_ms: i64,
    pub quiet_ms: i64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            events_threshold: BURST_EVENTS_THRESHOLD_DEFAULT,
            window_ms: BURST_WINDOW_MS_DEFAULT,
            quiet_ms: BURST_QUIET_MS_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstDecision {
    /// Not in burst mode; persist normally.
    Normal,
    /// In burst mode and this is the bucket's first event; persist.
    BucketFirst,
    /// In burst mode and an interior event; update recency only, skip
    /// the durable write. The caller defers this event rather than
    /// dropping it, since it may turn out to be the bucket's last.
    BucketInterior,
}

/// Result of observing one event: the decision for *this* event, plus
/// whether a previously open bucket just closed (quiet period elapsed).
/// A closed bucket means the caller's deferred interior event for this
/// session, if any, is now known to be the bucket's true last event and
/// should be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstObservation {
    pub decision: BurstDecision,
    pub bucket_closed: bool,
}

struct SessionWindow {
    window_start_ms: i64,
    events_in_window: u32,
    last_event_ms: i64,
    burst_mode: bool,
    bucket_has_first: bool,
}

pub struct BurstTracker {
    config: BurstConfig,
    sessions: Mutex<HashMap<String, SessionWindow>>,
}

impl BurstTracker {
    pub fn new(config: BurstConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Record one event for `session_id` at `now_ms` and decide whether
    /// it should be durably persisted.
    pub fn observe(&self, session_id: &str, now_ms: i64) -> BurstObservation {
        let mut sessions = self.sessions.lock().expect("burst tracker mutex poisoned");
        let window = sessions.entry(session_id.to_string()).or_insert(SessionWindow {
            window_start_ms: now_ms,
            events_in_window: 0,
            last_event_ms: now_ms,
            burst_mode: false,
            bucket_has_first: false,
        });

        let mut bucket_closed = false;
        if window.burst_mode && now_ms - window.last_event_ms >= self.config.quiet_ms {
            window.burst_mode = false;
            window.events_in_window = 0;
            window.bucket_has_first = false;
            bucket_closed = true;
        }

        if now_ms - window.window_start_ms > self.config.window_ms {
            window.window_start_ms = now_ms;
            window.events_in_window = 0;
        }

        window.events_in_window += 1;
        window.last_event_ms = now_ms;

        if !window.burst_mode && window.events_in_window > self.config.events_threshold {
            window.burst_mode = true;
            window.bucket_has_first = false;
        }

        if !window.burst_mode {
            return BurstObservation { decision: BurstDecision::Normal, bucket_closed };
        }

        let decision = if !window.bucket_has_first {
            window.bucket_has_first = true;
            BurstDecision::BucketFirst
        } else {
            BurstDecision::BucketInterior
        };
        BurstObservation { decision, bucket_closed }
    }

    /// Drops a session's burst-window state, e.g. on session end. Does
    /// not flush any deferred event — the pipeline owns that.
    pub fn forget_session(&self, session_id: &str) {
        self.sessions.lock().expect("burst tracker mutex poisoned").remove(session_id);
    }

    pub fn is_burst_mode(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .expect("burst tracker mutex poisoned")
            .get(session_id)
            .map(|w| w.burst_mode)
            .unwrap_or(false)
    }

    pub fn burst_session_count(&self) -> u64 {
        self.sessions
            .lock()
            .expect("burst tracker mutex poisoned")
            .values()
            .filter(|w| w.burst_mode)
            .count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_normal_below_threshold() {
        let tracker = BurstTracker::new(BurstConfig {
            events_threshold: 3,
            window_ms: 100,
            quiet_ms: 500,
        });
        for i in 0..3 {
            let obs = tracker.observe("s1", i);
            assert_eq!(obs.decision, BurstDecision::Normal);
            assert!(!obs.bucket_closed);
        }
    }

    #[test]
    fn enters_burst_mode_above_threshold_within_window() {
        let tracker = BurstTracker::new(BurstConfig {
            events_threshold: 2,
            window_ms: 100,
            quiet_ms: 500,
        });
        assert_eq!(tracker.observe("s1", 0).decision, BurstDecision::Normal);
        assert_eq!(tracker.observe("s1", 1).decision, BurstDecision::Normal);
        assert_eq!(tracker.observe("s1", 2).decision, BurstDecision::BucketFirst);
        assert_eq!(tracker.observe("s1", 3).decision, BurstDecision::BucketInterior);
        assert!(tracker.is_burst_mode("s1"));
    }

    #[test]
    fn exits_burst_mode_after_quiet_period() {
        let tracker = BurstTracker::new(BurstConfig {
            events_threshold: 1,
            window_ms: 100,
            quiet_ms: 50,
        });
        assert_eq!(tracker.observe("s1", 0).decision, BurstDecision::Normal);
        assert_eq!(tracker.observe("s1", 1).decision, BurstDecision::BucketFirst);
        assert!(tracker.is_burst_mode("s1"));

        let obs = tracker.observe("s1", 100);
        assert_eq!(obs.decision, BurstDecision::Normal);
        assert!(obs.bucket_closed);
        assert!(!tracker.is_burst_mode("s1"));
    }

    #[test]
    fn bucket_closed_only_fires_once_per_quiet_gap() {
        let tracker = BurstTracker::new(BurstConfig {
            events_threshold: 1,
            window_ms: 100,
            quiet_ms: 50,
        });
        tracker.observe("s1", 0);
        tracker.observe("s1", 1);
        assert!(tracker.observe("s1", 100).bucket_closed);
        assert!(!tracker.observe("s1", 101).bucket_closed);
    }
}
