//! Bounded event queue with priority retention (spec.md §4.D).
//!
//! `command_end`/`session_start`/`session_end` are high priority and are
//! retained preferentially; `suggest_request`/`suggest_feedback`
//! telemetry is dropped oldest-first on overflow.

use std::collections::VecDeque;
use std::sync::Mutex;

use suggestd_types::EventType;

pub const QUEUE_CAPACITY_DEFAULT: usize = 8192;
pub const QUEUE_BYTE_BUDGET_DEFAULT: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub session_id: String,
    pub event_type: EventType,
    pub ts_ms: i64,
    pub payload: suggestd_types::IngestEventRequest,
    pub approx_bytes: usize,
}

fn is_high_priority(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::CommandEnd | EventType::SessionStart | EventType::SessionEnd
    )
}

#[derive(Debug, Default)]
pub struct QueueStats {
    pub len: usize,
    pub drop_count: u64,
}

pub struct EventQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    byte_budget: usize,
}

struct Inner {
    events: VecDeque<QueuedEvent>,
    bytes: usize,
    drop_count: u64,
}

impl EventQueue {
    pub fn new(capacity: usize, byte_budget: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                bytes: 0,
                drop_count: 0,
            }),
            capacity,
            byte_budget,
        }
    }

    /// Enqueue an event, evicting low-priority telemetry oldest-first if
    /// the queue is over capacity or byte budget. Never blocks (the
    /// shell side must never stall on the daemon).
    pub fn push(&self, event: QueuedEvent) {
        let mut inner = self.inner.lock().expect("event queue mutex poisoned");

        while inner.events.len() >= self.capacity || inner.bytes + event.approx_bytes > self.byte_budget {
            let evict_index = inner
                .events
                .iter()
                .position(|e| !is_high_priority(e.event_type))
                .unwrap_or(0);
            match inner.events.remove(evict_index) {
                Some(evicted) => {
                    inner.bytes = inner.bytes.saturating_sub(evicted.approx_bytes);
                    inner.drop_count += 1;
                    metrics::counter!("suggestd_ingest_drop_total").increment(1);
                }
                None => break,
            }
        }

        inner.bytes += event.approx_bytes;
        inner.events.push_back(event);
        metrics::gauge!("suggestd_ingest_queue_len").set(inner.events.len() as f64);
    }

    pub fn pop(&self) -> Option<QueuedEvent> {
        let mut inner = self.inner.lock().expect("event queue mutex poisoned");
        let popped = inner.events.pop_front();
        if let Some(ref e) = popped {
            inner.bytes = inner.bytes.saturating_sub(e.approx_bytes);
        }
        metrics::gauge!("suggestd_ingest_queue_len").set(inner.events.len() as f64);
        popped
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().expect("event queue mutex poisoned");
        QueueStats {
            len: inner.events.len(),
            drop_count: inner.drop_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(event_type: EventType, session_id: &str) -> QueuedEvent {
        QueuedEvent {
            session_id: session_id.to_string(),
            event_type,
            ts_ms: 1000,
            payload: suggestd_types::IngestEventRequest {
                event_type,
                session_id: session_id.to_string(),
                shell: "zsh".into(),
                ts_ms: 1000,
                cwd: "/tmp".into(),
                cmd_raw: None,
                cmd_truncated: None,
                exit_code: None,
                duration_ms: None,
                ephemeral: None,
                repo_key: None,
                branch: None,
            },
            approx_bytes: 64,
        }
    }

    #[test]
    fn telemetry_is_evicted_before_high_priority() {
        let queue = EventQueue::new(2, 1_000_000);
        queue.push(sample_event(EventType::SuggestRequest, "s1"));
        queue.push(sample_event(EventType::CommandEnd, "s1"));
        queue.push(sample_event(EventType::CommandEnd, "s1"));

        let stats = queue.stats();
        assert_eq!(stats.len, 2);
        assert_eq!(stats.drop_count, 1);

        let first = queue.pop().unwrap();
        assert_eq!(first.event_type, EventType::CommandEnd);
    }

    #[test]
    fn fifo_order_preserved_when_no_eviction_needed() {
        let queue = EventQueue::new(10, 1_000_000);
        queue.push(sample_event(EventType::CommandEnd, "s1"));
        queue.push(sample_event(EventType::CommandEnd, "s2"));
        assert_eq!(queue.pop().unwrap().session_id, "s1");
        assert_eq!(queue.pop().unwrap().session_id, "s2");
    }
}
