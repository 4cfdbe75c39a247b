//! Run event stream
//!
//! Turns a run's output into durable event batches. Producers push through
//! an [`EventEmitter`] into the run's [`OutputQueue`] without ever blocking;
//! a single flush task per run drains the queue in FIFO order and appends
//! batches through the [`EventRepository`]. A batch is flushed when it
//! reaches `batch_events` or `batch_bytes`, or when `flush_interval` passes.
//! Transient append failures are retried with linear backoff under the same
//! batch id, so a retry after a lost response is stored once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tether_client::ClientError;
use tether_core::domain::event::RunEvent;
use tether_core::dto::event::AppendEvents;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::output_queue::{OutputQueue, Push, QueueLimits, QueueStats};
use super::redact::Redactor;
use crate::repository::EventRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLimits {
    /// Recorded events per run before truncation
    pub max_events: usize,
    /// Recorded bytes per run before truncation
    pub max_bytes: usize,
    /// Unflushed bytes before new output is dropped
    pub max_pending_bytes: usize,
    pub batch_events: usize,
    pub batch_bytes: usize,
    pub flush_interval: Duration,
    pub flush_attempts: u32,
    /// Base delay; attempt `n` waits `n * retry_backoff`
    pub retry_backoff: Duration,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            max_bytes: 2 * 1024 * 1024,
            max_pending_bytes: 256 * 1024,
            batch_events: 200,
            batch_bytes: 64 * 1024,
            flush_interval: Duration::from_secs(1),
            flush_attempts: 5,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl StreamLimits {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_events == 0 || self.max_bytes == 0 {
            anyhow::bail!("stream caps must be greater than 0");
        }
        if self.max_pending_bytes == 0 {
            anyhow::bail!("max_pending_bytes must be greater than 0");
        }
        if self.batch_events == 0 || self.batch_events > 1000 {
            anyhow::bail!("batch_events must be between 1 and 1000");
        }
        if self.flush_interval.is_zero() {
            anyhow::bail!("flush_interval must be greater than 0");
        }
        if self.flush_attempts == 0 {
            anyhow::bail!("flush_attempts must be greater than 0");
        }
        Ok(())
    }

    fn queue_limits(&self) -> QueueLimits {
        QueueLimits {
            max_events: self.max_events,
            max_bytes: self.max_bytes,
            max_pending_bytes: self.max_pending_bytes,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("failed to flush events for run {run_id} after {attempts} attempt(s): {source}")]
    Flush {
        run_id: Uuid,
        attempts: u32,
        #[source]
        source: ClientError,
    },

    #[error("event flusher for run {0} stopped unexpectedly")]
    Flusher(Uuid),
}

/// What a closed stream recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub stats: QueueStats,
    pub batches: u64,
}

struct Shared {
    queue: Mutex<OutputQueue>,
    wake: Notify,
    closed: AtomicBool,
    batch_events: usize,
    batch_bytes: usize,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, OutputQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cheap handle for pushing events into a run's stream
#[derive(Clone)]
pub struct EventEmitter {
    shared: Arc<Shared>,
}

impl EventEmitter {
    /// Queues an event without blocking.
    pub fn emit(&self, event: RunEvent) -> Push {
        let (outcome, flush) = {
            let mut queue = self.shared.queue();
            let outcome = queue.push(event);
            let flush = queue.should_flush(self.shared.batch_events, self.shared.batch_bytes);
            (outcome, flush)
        };

        if flush || matches!(outcome, Push::Dropped | Push::Truncated) {
            self.shared.wake.notify_one();
        }
        outcome
    }

    pub fn info(&self, message: impl Into<String>) -> Push {
        self.emit(RunEvent::info(message))
    }

    pub fn warning(&self, message: impl Into<String>) -> Push {
        self.emit(RunEvent::warning(message))
    }

    pub fn error(&self, message: impl Into<String>) -> Push {
        self.emit(RunEvent::error(message))
    }
}

/// A run's event stream and its flush task
pub struct EventStream {
    run_id: Uuid,
    shared: Arc<Shared>,
    flusher: Option<JoinHandle<Result<u64, StreamError>>>,
}

impl EventStream {
    /// Starts the flush task for `run_id`. Must be called within a Tokio runtime.
    pub fn start(
        run_id: Uuid,
        limits: StreamLimits,
        redactor: Redactor,
        sink: Arc<dyn EventRepository>,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(OutputQueue::new(limits.queue_limits(), redactor)),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
            batch_events: limits.batch_events,
            batch_bytes: limits.batch_bytes,
        });

        let flusher = tokio::spawn(flush_loop(run_id, Arc::clone(&shared), sink, limits));

        Self {
            run_id,
            shared,
            flusher: Some(flusher),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Flushes everything still queued and stops the flush task.
    pub async fn close(mut self) -> Result<StreamSummary, StreamError> {
        self.signal_close();

        let batches = match self.flusher.take() {
            Some(handle) => handle.await.map_err(|_| StreamError::Flusher(self.run_id))??,
            None => 0,
        };

        let stats = self.shared.queue().stats();
        tracing::debug!(
            "Event stream for run {} closed: {} events, {} bytes, {} dropped, truncated={}",
            self.run_id,
            stats.recorded_events,
            stats.recorded_bytes,
            stats.dropped_lines,
            stats.truncated
        );

        Ok(StreamSummary { stats, batches })
    }

    fn signal_close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        // An unclosed stream still gets a final drain
        if self.flusher.is_some() {
            self.signal_close();
        }
    }
}

async fn flush_loop(
    run_id: Uuid,
    shared: Arc<Shared>,
    sink: Arc<dyn EventRepository>,
    limits: StreamLimits,
) -> Result<u64, StreamError> {
    let mut batches = 0;

    loop {
        if !shared.closed.load(Ordering::Acquire) {
            tokio::select! {
                _ = shared.wake.notified() => {}
                _ = tokio::time::sleep(limits.flush_interval) => {}
            }
        }

        let closing = shared.closed.load(Ordering::Acquire);
        if closing {
            shared.queue().finish();
        }

        loop {
            let batch = shared
                .queue()
                .take_batch(limits.batch_events, limits.batch_bytes);
            if batch.is_empty() {
                break;
            }
            flush_with_retry(run_id, sink.as_ref(), batch, &limits).await?;
            batches += 1;
        }

        if closing {
            return Ok(batches);
        }
    }
}

async fn flush_with_retry(
    run_id: Uuid,
    sink: &dyn EventRepository,
    events: Vec<RunEvent>,
    limits: &StreamLimits,
) -> Result<(), StreamError> {
    let request = AppendEvents {
        batch_id: Uuid::new_v4(),
        events,
    };
    let mut attempt = 0;

    loop {
        attempt += 1;

        match sink.append_events(run_id, &request).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < limits.flush_attempts => {
                let delay = limits.retry_backoff * attempt;
                tracing::warn!(
                    "Failed to flush {} events for run {} (attempt {}/{}): {}; retrying in {:?}",
                    request.events.len(),
                    run_id,
                    attempt,
                    limits.flush_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(source) => {
                tracing::error!(
                    "Giving up on {} events for run {} after {} attempt(s): {}",
                    request.events.len(),
                    run_id,
                    attempt,
                    source
                );
                return Err(StreamError::Flush {
                    run_id,
                    attempts: attempt,
                    source,
                });
            }
        }
    }
}
