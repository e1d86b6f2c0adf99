//! Side-channel observer for progress frames.
//!
//! The bus delivers frames to exactly one HTTP writer; a sink is an
//! additional read-only tap used for logging and tests, decoupled from
//! the transport.

use super::ProgressFrame;

/// Observer for frames passing through a [`super::ProgressBus`].
pub trait ProgressSink: Send + Sync {
    /// Called for every emitted frame, before it is queued.
    fn observe(&self, frame: &ProgressFrame);
}

/// Sink that discards everything. Used when no observer is attached.
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn observe(&self, _frame: &ProgressFrame) {
        // No-op
    }
}

/// Sink that logs every frame at debug level. Useful for tracing event
/// flow in development.
pub struct LoggingProgressSink;

impl ProgressSink for LoggingProgressSink {
    fn observe(&self, frame: &ProgressFrame) {
        tracing::debug!(event = %frame.event, "progress_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProgressBus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test sink that counts observed frames.
    struct CountingSink {
        count: AtomicUsize,
    }

    impl ProgressSink for CountingSink {
        fn observe(&self, _frame: &ProgressFrame) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn sink_sees_every_emitted_frame() {
        let sink = Arc::new(CountingSink {
            count: AtomicUsize::new(0),
        });
        let (tx, _rx) = ProgressBus::channel();
        tx.set_sink(sink.clone());

        tx.emit("started", json!({})).await;
        tx.emit("completed", json!({})).await;

        assert_eq!(sink.count.load(Ordering::SeqCst), 2);
    }
}
