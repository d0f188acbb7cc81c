//! Bounded audit queue of adaptive pattern events.
//!
//! Complements the listener callbacks: the queue can be drained at leisure
//! (the CLI polls it for progress lines) and overflow drops the oldest
//! event instead of blocking the adjuster.

use crossbeam_queue::ArrayQueue;

use crate::pattern::adaptive::state::Phase;

#[derive(Debug, Clone, PartialEq)]
pub enum PatternEvent {
    PhaseTransition {
        from: Phase,
        to: Phase,
        tps: f64,
        at_ms: u64,
        reason: &'static str,
    },
    TpsChange {
        from: f64,
        to: f64,
        at_ms: u64,
    },
    StabilityDetected {
        tps: f64,
        at_ms: u64,
    },
    Recovery {
        tps: f64,
        at_ms: u64,
    },
}

pub struct EventLog {
    queue: ArrayQueue<PatternEvent>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    pub fn push(&self, event: PatternEvent) {
        if let Err(rejected) = self.queue.push(event) {
            // Full: evict the oldest and retry once.
            let _ = self.queue.pop();
            let _ = self.queue.push(rejected);
        }
    }

    pub fn drain(&self) -> Vec<PatternEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.queue.pop() {
            events.push(event);
        }
        events
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_returns_fifo_order() {
        let log = EventLog::new(8);
        log.push(PatternEvent::TpsChange {
            from: 10.0,
            to: 20.0,
            at_ms: 1,
        });
        log.push(PatternEvent::StabilityDetected {
            tps: 20.0,
            at_ms: 2,
        });
        let events = log.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], PatternEvent::TpsChange { .. }));
        assert!(log.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let log = EventLog::new(2);
        for at_ms in 0..5u64 {
            log.push(PatternEvent::TpsChange {
                from: 0.0,
                to: 0.0,
                at_ms,
            });
        }
        let events = log.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], PatternEvent::TpsChange { at_ms: 4, .. }));
    }
}
