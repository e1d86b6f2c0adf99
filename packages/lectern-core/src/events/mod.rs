//! Progress event system for real-time client communication.
//!
//! This module provides:
//! - [`ProgressFrame`], the wire form of a pipeline progress event
//! - [`ProgressBus`], the per-invocation bounded queue carrying frames
//!   from the orchestrator to the single HTTP writer
//! - [`ProgressSink`] for side-channel observers (logging, tests)
//!
//! The SSE transport itself lives in the `api` module; services only
//! ever talk to the bus.

mod bus;
mod sink;

pub use bus::{ProgressBus, ProgressReceiver, ProgressSender};
pub use sink::{LoggingProgressSink, NoopProgressSink, ProgressSink};

use serde_json::Value;

/// Event names that may be dropped under backpressure. Everything else
/// is a state-change event and is never dropped.
pub const HEARTBEAT_CLASS: [&str; 2] = ["ping", "heartbeat"];

/// Padding payload attached to `ping`/`heartbeat` frames so that
/// intermediate proxies flush the response immediately.
pub const FLUSH_PADDING_BYTES: usize = 2048;

/// A single progress event as delivered to the client.
///
/// `event` becomes the SSE `event:` field; `data` is serialized as the
/// `data:` JSON body. The bus stamps `elapsed` (whole seconds since the
/// invocation started) into `data` on emit.
#[derive(Debug, Clone)]
pub struct ProgressFrame {
    pub event: String,
    pub data: Value,
}

impl ProgressFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Whether this frame belongs to the droppable heartbeat class.
    pub fn is_heartbeat_class(&self) -> bool {
        HEARTBEAT_CLASS.contains(&self.event.as_str())
    }

    /// Returns a frame with the flush padding field attached.
    pub fn with_padding(mut self) -> Self {
        if let Value::Object(ref mut map) = self.data {
            map.insert(
                "_padding".to_string(),
                Value::String(" ".repeat(FLUSH_PADDING_BYTES)),
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn heartbeat_class_covers_ping_and_heartbeat() {
        assert!(ProgressFrame::new("ping", json!({})).is_heartbeat_class());
        assert!(ProgressFrame::new("heartbeat", json!({})).is_heartbeat_class());
        assert!(!ProgressFrame::new("fetch_start", json!({})).is_heartbeat_class());
    }

    #[test]
    fn padding_is_roughly_two_kilobytes() {
        let frame = ProgressFrame::new("ping", json!({"message": "hi"})).with_padding();
        let padding = frame.data["_padding"].as_str().unwrap();
        assert_eq!(padding.len(), FLUSH_PADDING_BYTES);
    }
}
