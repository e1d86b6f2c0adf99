//! The per-invocation progress queue.
//!
//! A [`ProgressBus`] decouples the pipeline orchestrator (producer) from
//! the HTTP writer (single consumer). The queue is bounded: under
//! backpressure, older heartbeat-class frames are evicted first and
//! state-change frames are never dropped. After every enqueue the
//! producer yields once to the scheduler so the writer gets a chance to
//! flush before the next step begins.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

use super::{ProgressFrame, ProgressSink};

/// Default bound for the per-invocation queue. Generous relative to the
/// number of state-change events a single ingestion emits.
const DEFAULT_CAPACITY: usize = 64;

struct Shared {
    queue: Mutex<VecDeque<ProgressFrame>>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
    started_at: Instant,
    sink: Mutex<Option<Arc<dyn ProgressSink>>>,
}

/// Handle pair factory for a single pipeline invocation.
pub struct ProgressBus;

impl ProgressBus {
    /// Creates a sender/receiver pair with the default capacity.
    pub fn channel() -> (ProgressSender, ProgressReceiver) {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a sender/receiver pair with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> (ProgressSender, ProgressReceiver) {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            capacity,
            started_at: Instant::now(),
            sink: Mutex::new(None),
        });
        (
            ProgressSender {
                shared: Arc::clone(&shared),
            },
            ProgressReceiver { shared },
        )
    }
}

/// Producer half, held by the orchestrator.
#[derive(Clone)]
pub struct ProgressSender {
    shared: Arc<Shared>,
}

impl ProgressSender {
    /// Attaches a side-channel observer that sees every emitted frame.
    pub fn set_sink(&self, sink: Arc<dyn ProgressSink>) {
        *self.shared.sink.lock() = Some(sink);
    }

    /// Seconds elapsed since the invocation started.
    pub fn elapsed_secs(&self) -> u64 {
        self.shared.started_at.elapsed().as_secs()
    }

    /// Emits a named event. Non-blocking: on a full queue, the oldest
    /// heartbeat-class frame is evicted; if none exists and the new
    /// frame is itself heartbeat-class it is discarded, otherwise the
    /// bound is exceeded rather than losing a state change. Yields once
    /// after enqueue so the writer can flush.
    pub async fn emit(&self, event: &str, data: Value) {
        let mut data = data;
        if let Value::Object(ref mut map) = data {
            map.insert("elapsed".to_string(), Value::from(self.elapsed_secs()));
        }
        let frame = ProgressFrame::new(event, data);

        if let Some(sink) = self.shared.sink.lock().clone() {
            sink.observe(&frame);
        }

        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                if let Some(pos) = queue.iter().position(|f| f.is_heartbeat_class()) {
                    queue.remove(pos);
                } else if frame.is_heartbeat_class() {
                    log::trace!("[ProgressBus] Dropping heartbeat frame, queue full");
                    return;
                }
            }
            queue.push_back(frame);
        }
        self.shared.notify.notify_one();

        tokio::task::yield_now().await;
    }

    /// Publishes the close sentinel. The receiver drains remaining
    /// frames, then observes end-of-stream.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }
}

/// Consumer half, held by exactly one HTTP response writer.
pub struct ProgressReceiver {
    shared: Arc<Shared>,
}

impl ProgressReceiver {
    /// Receives the next frame, or `None` after the sentinel once the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<ProgressFrame> {
        loop {
            {
                let mut queue = self.shared.queue.lock();
                if let Some(frame) = queue.pop_front() {
                    return Some(frame);
                }
                if self.shared.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Seconds elapsed since the invocation started.
    pub fn elapsed_secs(&self) -> u64 {
        self.shared.started_at.elapsed().as_secs()
    }
}
