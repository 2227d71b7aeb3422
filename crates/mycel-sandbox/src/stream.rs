// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The NDJSON status protocol between the tool-runner child and its parent.
//!
//! One JSON object per line, `{type, payload, timestamp}` with
//! `type ∈ {status, result, error, heartbeat}`. Lines are capped at 64 KiB;
//! readers tolerate partial reads and resume at the next newline.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Send a heartbeat (or synthesise one on the reading side) when the pipe
/// has been silent this long.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Maximum frame size; longer lines are dropped, the reader resumes at the
/// next newline.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Tagged frame body. The tag and payload land side by side on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum StreamBody {
    Status { message: String },
    Result { tool_result: Value },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    Heartbeat {},
}

/// One frame of the status stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    #[serde(flatten)]
    pub body: StreamBody,
    pub timestamp: f64,
}

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl StreamMessage {
    pub fn status(message: impl Into<String>) -> Self {
        Self {
            body: StreamBody::Status {
                message: message.into(),
            },
            timestamp: now_unix(),
        }
    }

    pub fn result(tool_result: Value) -> Self {
        Self {
            body: StreamBody::Result { tool_result },
            timestamp: now_unix(),
        }
    }

    pub fn error(error: impl Into<String>, error_code: Option<String>) -> Self {
        Self {
            body: StreamBody::Error {
                error: error.into(),
                error_code,
            },
            timestamp: now_unix(),
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            body: StreamBody::Heartbeat {},
            timestamp: now_unix(),
        }
    }

    /// One NDJSON line, newline included.
    pub fn to_ndjson_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            // A frame that cannot be encoded must not silently vanish.
            format!(
                r#"{{"type":"error","payload":{{"error":"unencodable frame"}},"timestamp":{}}}"#,
                now_unix()
            )
        });
        line.push('\n');
        line
    }

    pub fn parse_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Read NDJSON frames from the child's status pipe until EOF or an
/// unrecoverable read error.
///
/// Every parsed frame is forwarded to `tx`. Until the first real frame
/// arrives, an idle window of [`HEARTBEAT_INTERVAL`] injects a synthetic
/// heartbeat so downstream consumers can distinguish "tool still starting"
/// from "dead pipe". Once real traffic has been seen the child is known to
/// be alive and its own cadence is trusted — no further synthesis, however
/// slow it emits. Unparseable or oversized lines are logged and skipped.
pub async fn consume_status_pipe<R: AsyncRead + Unpin>(
    reader: R,
    tx: mpsc::UnboundedSender<StreamMessage>,
) {
    let mut lines = BufReader::with_capacity(MAX_LINE_BYTES, reader).lines();
    let mut seen_real_frame = false;
    loop {
        match tokio::time::timeout(HEARTBEAT_INTERVAL, lines.next_line()).await {
            Err(_elapsed) => {
                if !seen_real_frame {
                    debug!("status pipe idle before first frame, synthesising heartbeat");
                    if tx.send(StreamMessage::heartbeat()).is_err() {
                        return;
                    }
                }
            }
            Ok(Ok(Some(line))) => {
                if line.len() > MAX_LINE_BYTES {
                    warn!(bytes = line.len(), "oversized status frame dropped");
                    continue;
                }
                if line.trim().is_empty() {
                    continue;
                }
                match StreamMessage::parse_line(&line) {
                    Ok(frame) => {
                        seen_real_frame = true;
                        if tx.send(frame).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "unparseable status frame dropped"),
                }
            }
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                warn!(error = %e, "status pipe read failed");
                return;
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn wire_shape_matches_protocol() {
        let frame = StreamMessage::status("Loading data...");
        let v: Value = serde_json::from_str(frame.to_ndjson_line().trim()).unwrap();
        assert_eq!(v["type"], "status");
        assert_eq!(v["payload"]["message"], "Loading data...");
        assert!(v["timestamp"].is_f64() || v["timestamp"].is_u64());

        let frame = StreamMessage::heartbeat();
        let v: Value = serde_json::from_str(frame.to_ndjson_line().trim()).unwrap();
        assert_eq!(v["type"], "heartbeat");
        assert_eq!(v["payload"], json!({}));

        let frame = StreamMessage::error("boom", Some("SANDBOX_TIMEOUT".into()));
        let v: Value = serde_json::from_str(frame.to_ndjson_line().trim()).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["payload"]["error_code"], "SANDBOX_TIMEOUT");
    }

    #[test]
    fn ndjson_reserialisation_is_bit_identical() {
        let frames = vec![
            StreamMessage::status("step 1"),
            StreamMessage::heartbeat(),
            StreamMessage::result(json!({"status": "success", "message": "ok"})),
            StreamMessage::error("failed", None),
        ];
        let stream: String = frames.iter().map(|f| f.to_ndjson_line()).collect();
        let reparsed: Vec<StreamMessage> = stream
            .lines()
            .map(|l| StreamMessage::parse_line(l).unwrap())
            .collect();
        let restream: String = reparsed.iter().map(|f| f.to_ndjson_line()).collect();
        assert_eq!(stream, restream);
    }

    #[tokio::test]
    async fn consumer_forwards_frames_in_order() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume_status_pipe(reader, tx));

        writer
            .write_all(StreamMessage::status("one").to_ndjson_line().as_bytes())
            .await
            .unwrap();
        writer
            .write_all(StreamMessage::status("two").to_ndjson_line().as_bytes())
            .await
            .unwrap();
        drop(writer);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.body, StreamBody::Status { message: "one".into() });
        let second = rx.recv().await.unwrap();
        assert_eq!(second.body, StreamBody::Status { message: "two".into() });
        assert!(rx.recv().await.is_none());
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn partial_line_is_completed_on_next_write() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(consume_status_pipe(reader, tx));

        let line = StreamMessage::status("split frame").to_ndjson_line();
        let (head, tail) = line.split_at(10);
        writer.write_all(head.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.write_all(tail.as_bytes()).await.unwrap();
        drop(writer);

        let frame = rx.recv().await.unwrap();
        assert_eq!(
            frame.body,
            StreamBody::Status { message: "split frame".into() }
        );
    }

    #[tokio::test]
    async fn garbage_line_is_skipped_not_fatal() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(consume_status_pipe(reader, tx));

        writer.write_all(b"not json\n").await.unwrap();
        writer
            .write_all(StreamMessage::status("after garbage").to_ndjson_line().as_bytes())
            .await
            .unwrap();
        drop(writer);

        let frame = rx.recv().await.unwrap();
        assert_eq!(
            frame.body,
            StreamBody::Status { message: "after garbage".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_pipe_synthesises_heartbeat() {
        let (_writer, reader) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(consume_status_pipe(reader, tx));

        // Nothing written; after the heartbeat interval a synthetic frame
        // appears.
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.body, StreamBody::Heartbeat {});
    }

    #[tokio::test(start_paused = true)]
    async fn slow_but_alive_tool_gets_no_synthetic_heartbeats() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(consume_status_pipe(reader, tx));

        // First real status arrives within 10 s of start; afterwards the
        // tool emits exactly one status per 11 s. No heartbeat synthesis.
        tokio::time::sleep(Duration::from_secs(2)).await;
        writer
            .write_all(StreamMessage::status("tick 0").to_ndjson_line().as_bytes())
            .await
            .unwrap();
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame.body, StreamBody::Status { .. }));

        for i in 1..4 {
            tokio::time::sleep(Duration::from_secs(11)).await;
            writer
                .write_all(StreamMessage::status(format!("tick {i}")).to_ndjson_line().as_bytes())
                .await
                .unwrap();
            let frame = rx.recv().await.unwrap();
            assert!(
                matches!(frame.body, StreamBody::Status { .. }),
                "expected only status frames, got {frame:?}"
            );
        }
    }
}
