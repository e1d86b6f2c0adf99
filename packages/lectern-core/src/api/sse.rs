//! Server-sent-events transport for the progress bus.
//!
//! Exactly one HTTP response consumes each bus. The writer waits up to
//! [`RECEIVE_TIMEOUT`] for a frame; on timeout it emits a `heartbeat`
//! carrying the flush padding and keeps waiting. `ping` and `heartbeat`
//! frames always carry the ~2 KB `_padding` field so intermediate
//! proxies flush immediately. When the client disconnects, the response
//! body is dropped and the attached guard cancels the pipeline's
//! context.

use std::time::Duration;

use async_stream::stream;
use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use bytes::Bytes;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::events::{ProgressFrame, ProgressReceiver};

/// How long the writer waits for a frame before heartbeating.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(15);

/// Formats one frame as an SSE message.
pub fn format_frame(frame: &ProgressFrame) -> String {
    let frame = if frame.is_heartbeat_class() {
        frame.clone().with_padding()
    } else {
        frame.clone()
    };
    format!(
        "event: {}\ndata: {}\n\n",
        frame.event,
        serde_json::to_string(&frame.data).unwrap_or_else(|_| "{}".to_string())
    )
}

/// Cancels the request context when the response body is dropped.
struct DisconnectGuard {
    cancel: CancellationToken,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
        }
    }
}

/// Builds the streaming SSE response over a progress receiver.
pub fn sse_response(mut rx: ProgressReceiver, cancel: CancellationToken) -> Response {
    // Captured by the generator at construction, so a body dropped
    // before it is ever polled still cancels the pipeline context.
    let guard = DisconnectGuard { cancel };

    let body_stream = stream! {
        let _guard = guard;

        loop {
            match tokio::time::timeout(RECEIVE_TIMEOUT, rx.recv()).await {
                Ok(Some(frame)) => {
                    yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(format_frame(&frame)));
                }
                Ok(None) => break,
                Err(_) => {
                    // Idle: keep the connection and any proxies alive.
                    let heartbeat = ProgressFrame::new(
                        "heartbeat",
                        json!({ "elapsed": rx.elapsed_secs() }),
                    );
                    yield Ok(Bytes::from(format_frame(&heartbeat)));
                }
            }
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        // Disable proxy buffering so events stream in real time.
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProgressBus;
    use futures::StreamExt;

    #[test]
    fn frames_format_as_sse_messages() {
        let frame = ProgressFrame::new("fetch_start", json!({"url": "https://x.com"}));
        let formatted = format_frame(&frame);
        assert!(formatted.starts_with("event: fetch_start\ndata: "));
        assert!(formatted.ends_with("\n\n"));
        assert!(!formatted.contains("_padding"));
    }

    #[test]
    fn ping_frames_carry_padding() {
        let frame = ProgressFrame::new("ping", json!({"message": "hi"}));
        let formatted = format_frame(&frame);
        assert!(formatted.contains("_padding"));
        assert!(formatted.len() > crate::events::FLUSH_PADDING_BYTES);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_heartbeats_within_window() {
        let (tx, rx) = ProgressBus::channel();
        let cancel = CancellationToken::new();
        let response = sse_response(rx, cancel);

        let mut body = response.into_body().into_data_stream();

        // No frames emitted: advancing past the receive timeout must
        // yield a heartbeat.
        let next = tokio::spawn(async move { body.next().await });
        tokio::time::advance(RECEIVE_TIMEOUT + Duration::from_millis(100)).await;
        let chunk = next.await.unwrap().unwrap().unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.starts_with("event: heartbeat"), "got: {}", text);

        tx.close();
    }

    #[tokio::test]
    async fn dropping_body_cancels_context() {
        let (_tx, rx) = ProgressBus::channel();
        let cancel = CancellationToken::new();
        let response = sse_response(rx, cancel.clone());

        drop(response);
        // The stream was never polled, but dropping the body drops the
        // guard and cancels the context.
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn sentinel_ends_the_body() {
        let (tx, rx) = ProgressBus::channel();
        let cancel = CancellationToken::new();
        tx.emit("started", json!({})).await;
        tx.close();

        let response = sse_response(rx, cancel);
        let mut body = response.into_body().into_data_stream();

        let first = body.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&first).starts_with("event: started"));
        assert!(body.next().await.is_none());
    }
}
