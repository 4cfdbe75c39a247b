//! Bounded output queue
//!
//! Sits between a run's producers (stdout/stderr readers, runner notices)
//! and the flush task. Pushing never blocks; the queue is a small state
//! machine that accepts, drops or truncates:
//!
//! - **Accepting**: events are redacted and queued until flushed.
//! - **Dropping**: the unflushed backlog hit `max_pending_bytes`. New events
//!   are counted and discarded until the flusher takes a batch, at which
//!   point a single "N lines dropped" warning is queued.
//! - **Truncated**: the run reached `max_events` or `max_bytes` of recorded
//!   output. One warning is queued and every later event is discarded.
//!
//! The synthetic warnings do not count against the caps.

use std::collections::VecDeque;

use tether_core::domain::event::RunEvent;

use super::redact::Redactor;

/// Longest message a single event may carry
pub const MAX_LINE_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    pub max_events: usize,
    pub max_bytes: usize,
    pub max_pending_bytes: usize,
}

/// What happened to a pushed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Queued,
    Dropped,
    /// This push crossed a cap; a truncation warning was queued
    Truncated,
    /// The stream was already truncated
    Discarded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub recorded_events: usize,
    pub recorded_bytes: usize,
    pub dropped_lines: u64,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Accepting,
    Dropping { count: u64 },
    Truncated,
}

pub struct OutputQueue {
    limits: QueueLimits,
    redactor: Redactor,
    state: State,
    pending: VecDeque<Queued>,
    /// Bytes of recorded output awaiting flush; synthetic warnings weigh nothing
    pending_bytes: usize,
    stats: QueueStats,
}

struct Queued {
    event: RunEvent,
    weight: usize,
}

impl OutputQueue {
    pub fn new(limits: QueueLimits, redactor: Redactor) -> Self {
        Self {
            limits,
            redactor,
            state: State::Accepting,
            pending: VecDeque::new(),
            pending_bytes: 0,
            stats: QueueStats::default(),
        }
    }

    pub fn push(&mut self, event: RunEvent) -> Push {
        match self.state {
            State::Truncated => return Push::Discarded,
            State::Dropping { count } => {
                self.state = State::Dropping { count: count + 1 };
                self.stats.dropped_lines += 1;
                return Push::Dropped;
            }
            State::Accepting => {}
        }

        let mut event = self.redactor.redact_event(event);
        clamp_message(&mut event, MAX_LINE_BYTES);
        let size = event.size_bytes();

        if !self.pending.is_empty() && self.pending_bytes + size > self.limits.max_pending_bytes {
            self.state = State::Dropping { count: 1 };
            self.stats.dropped_lines += 1;
            return Push::Dropped;
        }

        if self.stats.recorded_events >= self.limits.max_events {
            self.truncate(format!(
                "output truncated: event limit of {} reached",
                self.limits.max_events
            ));
            return Push::Truncated;
        }

        let room = self.limits.max_bytes - self.stats.recorded_bytes;
        if size > room {
            if room > 0 {
                event.data = None;
                clamp_message(&mut event, room);
                self.record(event);
            }
            self.truncate(format!(
                "output truncated: byte limit of {} reached",
                self.limits.max_bytes
            ));
            return Push::Truncated;
        }

        self.record(event);
        Push::Queued
    }

    /// Removes up to `max_events` / `max_bytes` from the front. Always
    /// returns at least one event when anything is pending.
    pub fn take_batch(&mut self, max_events: usize, max_bytes: usize) -> Vec<RunEvent> {
        let mut batch = Vec::new();
        let mut bytes = 0;

        while let Some(front) = self.pending.front() {
            let size = front.event.size_bytes();
            if !batch.is_empty() && (batch.len() >= max_events || bytes + size > max_bytes) {
                break;
            }
            if let Some(queued) = self.pending.pop_front() {
                self.pending_bytes -= queued.weight;
                bytes += size;
                batch.push(queued.event);
            }
        }

        if !batch.is_empty() {
            self.resume();
        }

        batch
    }

    /// Ends a dropping phase even if nothing was drained; used on close.
    pub fn finish(&mut self) {
        self.resume();
    }

    pub fn should_flush(&self, batch_events: usize, batch_bytes: usize) -> bool {
        self.pending.len() >= batch_events || self.pending_bytes >= batch_bytes
    }

    /// Whether pushes are currently being dropped for backpressure
    pub fn is_dropping(&self) -> bool {
        matches!(self.state, State::Dropping { .. })
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    fn record(&mut self, event: RunEvent) {
        let weight = event.size_bytes();
        self.stats.recorded_events += 1;
        self.stats.recorded_bytes += weight;
        self.pending_bytes += weight;
        self.pending.push_back(Queued { event, weight });
    }

    fn enqueue_notice(&mut self, message: String) {
        self.pending.push_back(Queued {
            event: RunEvent::warning(message),
            weight: 0,
        });
    }

    fn truncate(&mut self, message: String) {
        tracing::debug!("{}", message);
        self.state = State::Truncated;
        self.stats.truncated = true;
        self.enqueue_notice(message);
    }

    fn resume(&mut self) {
        if let State::Dropping { count } = self.state {
            self.state = State::Accepting;
            self.enqueue_notice(format!(
                "{} lines dropped: output arrived faster than it could be flushed",
                count
            ));
        }
    }
}

/// Cuts the message to at most `limit` bytes on a char boundary.
fn clamp_message(event: &mut RunEvent, limit: usize) {
    if event.message.len() <= limit {
        return;
    }
    let mut cut = limit;
    while !event.message.is_char_boundary(cut) {
        cut -= 1;
    }
    event.message.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::domain::event::EventLevel;

    fn limits(max_events: usize, max_bytes: usize, max_pending_bytes: usize) -> QueueLimits {
        QueueLimits {
            max_events,
            max_bytes,
            max_pending_bytes,
        }
    }

    fn queue(max_events: usize, max_bytes: usize, max_pending_bytes: usize) -> OutputQueue {
        OutputQueue::new(limits(max_events, max_bytes, max_pending_bytes), Redactor::new())
    }

    fn drain_all(q: &mut OutputQueue) -> Vec<RunEvent> {
        let mut all = Vec::new();
        loop {
            let batch = q.take_batch(usize::MAX, usize::MAX);
            if batch.is_empty() {
                return all;
            }
            all.extend(batch);
        }
    }

    #[test]
    fn test_event_cap_yields_max_plus_one() {
        let mut q = queue(5, usize::MAX, usize::MAX);

        let outcomes: Vec<_> = (0..20).map(|i| q.push(RunEvent::info(format!("line {}", i)))).collect();
        assert_eq!(outcomes[4], Push::Queued);
        assert_eq!(outcomes[5], Push::Truncated);
        assert!(outcomes[6..].iter().all(|p| *p == Push::Discarded));

        let events = drain_all(&mut q);
        assert_eq!(events.len(), 6);
        assert_eq!(events[4].message, "line 4");
        assert_eq!(events[5].level, EventLevel::Warning);
        assert!(events[5].message.contains("event limit of 5"));
        assert!(q.stats().truncated);
    }

    #[test]
    fn test_byte_cap_cuts_at_boundary() {
        let mut q = queue(100, 25, usize::MAX);

        assert_eq!(q.push(RunEvent::info("0123456789")), Push::Queued);
        assert_eq!(q.push(RunEvent::info("abcdefghij")), Push::Queued);
        assert_eq!(q.push(RunEvent::info("KLMNOPQRST")), Push::Truncated);
        assert_eq!(q.push(RunEvent::info("more")), Push::Discarded);

        let events = drain_all(&mut q);
        let real: usize = events[..3].iter().map(|e| e.message.len()).sum();
        assert_eq!(real, 25);
        assert_eq!(events[2].message, "KLMNO");
        assert!(events[3].message.contains("byte limit of 25"));
        assert_eq!(events.len(), 4);
        assert_eq!(q.stats().recorded_bytes, 25);
    }

    #[test]
    fn test_byte_cap_exactly_full_adds_only_warning() {
        let mut q = queue(100, 10, usize::MAX);
        assert_eq!(q.push(RunEvent::info("0123456789")), Push::Queued);
        assert_eq!(q.push(RunEvent::info("x")), Push::Truncated);

        let events = drain_all(&mut q);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].level, EventLevel::Warning);
    }

    #[test]
    fn test_byte_cut_respects_char_boundary() {
        let mut q = queue(100, 4, usize::MAX);
        q.push(RunEvent::info("aéé"));

        let events = drain_all(&mut q);
        assert_eq!(events[0].message, "aé");
    }

    #[test]
    fn test_backpressure_drops_then_reports_once() {
        let mut q = queue(1000, usize::MAX, 20);

        assert_eq!(q.push(RunEvent::info("0123456789")), Push::Queued);
        assert_eq!(q.push(RunEvent::info("0123456789")), Push::Queued);
        assert_eq!(q.push(RunEvent::info("x")), Push::Dropped);
        assert_eq!(q.push(RunEvent::info("y")), Push::Dropped);
        assert_eq!(q.push(RunEvent::info("z")), Push::Dropped);
        assert_eq!(q.stats().dropped_lines, 3);

        let first = q.take_batch(1, usize::MAX);
        assert_eq!(first.len(), 1);

        // Draining resumed: the warning follows what was already queued
        assert_eq!(q.push(RunEvent::info("after")), Push::Queued);
        let rest = drain_all(&mut q);
        let messages: Vec<_> = rest.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages[0], "0123456789");
        assert!(messages[1].starts_with("3 lines dropped"));
        assert_eq!(messages[2], "after");

        let warnings = rest.iter().filter(|e| e.level == EventLevel::Warning).count();
        assert_eq!(warnings, 1);
    }

    #[test]
    fn test_oversized_line_accepted_into_empty_queue() {
        let mut q = queue(10, usize::MAX, 4);
        assert_eq!(q.push(RunEvent::info("longer than four")), Push::Queued);
        assert_eq!(q.push(RunEvent::info("next")), Push::Dropped);
    }

    #[test]
    fn test_finish_reports_pending_drops() {
        let mut q = queue(10, usize::MAX, 5);
        q.push(RunEvent::info("12345"));
        q.push(RunEvent::info("dropped"));
        q.finish();

        let events = drain_all(&mut q);
        assert_eq!(events.len(), 2);
        assert!(events[1].message.starts_with("1 lines dropped"));
    }

    #[test]
    fn test_batches_respect_size_limits() {
        let mut q = queue(100, usize::MAX, usize::MAX);
        for _ in 0..5 {
            q.push(RunEvent::info("abcd"));
        }
        assert!(q.should_flush(5, usize::MAX));
        assert!(!q.should_flush(6, 100));

        assert_eq!(q.take_batch(2, usize::MAX).len(), 2);
        assert_eq!(q.take_batch(100, 9).len(), 2);
        // A single event larger than the byte limit still moves
        assert_eq!(q.take_batch(100, 1).len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_pushed_events_are_redacted() {
        let mut redactor = Redactor::new();
        redactor.add_literal("topsecret");
        let mut q = OutputQueue::new(limits(10, usize::MAX, usize::MAX), redactor);

        q.push(RunEvent::info("the value is topsecret"));
        let events = drain_all(&mut q);
        assert_eq!(events[0].message, "the value is [REDACTED]");
        assert!(events[0].redacted);
    }

    #[test]
    fn test_long_lines_clamped() {
        let mut q = queue(10, usize::MAX, usize::MAX);
        q.push(RunEvent::info("x".repeat(MAX_LINE_BYTES * 2)));
        let events = drain_all(&mut q);
        assert_eq!(events[0].message.len(), MAX_LINE_BYTES);
    }
}
