//! Chunked response protocol as an explicit state machine.
//!
//! `Init -> Streaming -> {Final, Error}`; terminal states are absorbing and
//! any chunk submitted afterwards is a named protocol violation, never a
//! silent merge. Deltas and snapshots are an advisory latency-hiding preview;
//! the `final` chunk is the single source of truth for the returned result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::envelope::{Envelope, EnvelopeError, FailureEnvelope, parse_response, success_from_data};
use crate::error::EngineError;

/// Wire chunk shapes, tagged by `type`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Chunk {
    /// Opening meta chunk; must carry `streaming: true` and a session id.
    Init {
        streaming: bool,
        #[serde(default)]
        session_id: String,
    },
    /// Append `delta` to the buffer at the dotted `field` path.
    Delta { seq: u64, field: String, delta: String },
    /// Replace the accumulated value at `field` outright.
    Snapshot { seq: u64, field: String, data: Value },
    /// Informational only; forwarded to the caller, never merged.
    Progress {
        percent: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Authoritative result; supersedes everything accumulated so far.
    Final {
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
    /// Terminal failure, optionally carrying partial accumulated data.
    Error {
        error: EnvelopeError,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_data: Option<Value>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Awaiting the opening init chunk.
    Init,
    Streaming,
    Final,
    Error,
}

/// Event surfaced to the caller for each accepted chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Opened {
        session_id: String,
    },
    /// A delta or snapshot was folded into the preview buffers.
    Accumulated,
    Progress {
        percent: f64,
        stage: Option<String>,
        message: Option<String>,
    },
    /// Terminal chunk processed; the session is closed.
    Completed(Envelope),
}

/// One chunked response in flight.
///
/// Created on the init chunk, destroyed on `final`/`error` (or abandoned on
/// cancellation, in which case its buffers are discarded, never merged).
#[derive(Debug)]
pub struct StreamSession {
    session_id: Option<String>,
    /// 0 before the first delta; accepted seqs are strictly increasing.
    last_seq: u64,
    buffers: BTreeMap<String, Value>,
    state: StreamState,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            session_id: None,
            last_seq: 0,
            buffers: BTreeMap::new(),
            state: StreamState::Init,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, StreamState::Final | StreamState::Error)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Feed one chunk through the state machine.
    pub fn apply(&mut self, chunk: Chunk) -> Result<StreamEvent, EngineError> {
        if self.is_terminal() {
            return Err(violation("chunk received after terminal state"));
        }
        match self.state {
            StreamState::Init => self.apply_init(chunk),
            StreamState::Streaming => self.apply_streaming(chunk),
            StreamState::Final | StreamState::Error => unreachable!("terminal handled above"),
        }
    }

    fn apply_init(&mut self, chunk: Chunk) -> Result<StreamEvent, EngineError> {
        match chunk {
            Chunk::Init {
                streaming,
                session_id,
            } => {
                if !streaming {
                    return Err(violation("init chunk must declare streaming: true"));
                }
                if session_id.is_empty() {
                    return Err(violation("init chunk missing session id"));
                }
                debug!(session_id, "stream session opened");
                self.session_id = Some(session_id.clone());
                self.state = StreamState::Streaming;
                Ok(StreamEvent::Opened { session_id })
            }
            other => Err(violation(format!(
                "expected init chunk, got {}",
                chunk_label(&other)
            ))),
        }
    }

    fn apply_streaming(&mut self, chunk: Chunk) -> Result<StreamEvent, EngineError> {
        match chunk {
            Chunk::Init { .. } => Err(violation("duplicate init chunk")),
            Chunk::Delta { seq, field, delta } => {
                self.accept_seq(seq)?;
                match self.buffers.get_mut(&field) {
                    Some(Value::String(buffer)) => buffer.push_str(&delta),
                    // A delta over a snapshot value restarts the preview
                    // buffer from the delta text.
                    _ => {
                        self.buffers.insert(field, Value::String(delta));
                    }
                }
                Ok(StreamEvent::Accumulated)
            }
            Chunk::Snapshot { seq, field, data } => {
                self.accept_seq(seq)?;
                self.buffers.insert(field, data);
                Ok(StreamEvent::Accumulated)
            }
            Chunk::Progress {
                percent,
                stage,
                message,
            } => Ok(StreamEvent::Progress {
                percent,
                stage,
                message,
            }),
            Chunk::Final { data, meta: _ } => {
                self.state = StreamState::Final;
                debug!(session_id = ?self.session_id, "stream session closed with final");
                let data = match data {
                    Value::Object(data) => data,
                    _ => Map::new(),
                };
                Ok(StreamEvent::Completed(Envelope::Success(success_from_data(
                    data,
                ))))
            }
            Chunk::Error {
                error,
                partial_data,
            } => {
                self.state = StreamState::Error;
                debug!(session_id = ?self.session_id, code = %error.code, "stream session closed with error");
                let partial_data = partial_data.or_else(|| {
                    (!self.buffers.is_empty()).then(|| self.partial_data())
                });
                Ok(StreamEvent::Completed(Envelope::Failure(FailureEnvelope {
                    error,
                    partial_data,
                })))
            }
        }
    }

    fn accept_seq(&mut self, seq: u64) -> Result<(), EngineError> {
        if seq <= self.last_seq {
            return Err(violation(format!(
                "non-increasing seq {seq} after {}",
                self.last_seq
            )));
        }
        self.last_seq = seq;
        Ok(())
    }

    /// Nested object assembled from the dotted-path preview buffers.
    pub fn partial_data(&self) -> Value {
        let mut root = Map::new();
        for (path, value) in &self.buffers {
            insert_dotted(&mut root, path, value.clone());
        }
        Value::Object(root)
    }
}

/// Synthesize the three-chunk sequence for a gateway without streaming
/// support, so stream consumers never special-case one-shot providers.
pub fn synthesize_stream(session_id: &str, content: &str) -> Result<Vec<Chunk>, EngineError> {
    let envelope = parse_response(content)?;
    let mut chunks = vec![
        Chunk::Init {
            streaming: true,
            session_id: session_id.to_string(),
        },
        Chunk::Delta {
            seq: 1,
            field: "content".to_string(),
            delta: content.to_string(),
        },
    ];
    chunks.push(match envelope {
        Envelope::Success(success) => Chunk::Final {
            data: Value::Object(success.wire_data()),
            meta: None,
        },
        Envelope::Failure(failure) => Chunk::Error {
            error: failure.error,
            partial_data: failure.partial_data,
        },
    });
    Ok(chunks)
}

fn insert_dotted(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut current = root;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().expect("just ensured object");
    }
}

fn violation(message: impl Into<String>) -> EngineError {
    EngineError::StreamProtocolViolation(message.into())
}

fn chunk_label(chunk: &Chunk) -> &'static str {
    match chunk {
        Chunk::Init { .. } => "init",
        Chunk::Delta { .. } => "delta",
        Chunk::Snapshot { .. } => "snapshot",
        Chunk::Progress { .. } => "progress",
        Chunk::Final { .. } => "final",
        Chunk::Error { .. } => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn init(session_id: &str) -> Chunk {
        Chunk::Init {
            streaming: true,
            session_id: session_id.to_string(),
        }
    }

    fn delta(seq: u64, field: &str, text: &str) -> Chunk {
        Chunk::Delta {
            seq,
            field: field.to_string(),
            delta: text.to_string(),
        }
    }

    #[test]
    fn init_without_session_id_is_rejected() {
        let mut session = StreamSession::new();
        let err = session.apply(init("")).expect_err("should reject");
        assert!(err.to_string().contains("missing session id"));
        assert_eq!(session.state(), StreamState::Init);
    }

    #[test]
    fn delta_before_init_is_rejected() {
        let mut session = StreamSession::new();
        let err = session
            .apply(delta(1, "data.x", "ab"))
            .expect_err("should reject");
        assert!(err.to_string().contains("expected init chunk"));
    }

    #[test]
    fn duplicate_seq_is_rejected() {
        let mut session = StreamSession::new();
        session.apply(init("s1")).expect("init");
        session.apply(delta(1, "data.x", "ab")).expect("first delta");
        let err = session
            .apply(delta(1, "data.x", "cd"))
            .expect_err("duplicate seq");
        assert!(err.to_string().contains("non-increasing seq 1"));
    }

    #[test]
    fn deltas_accumulate_per_field() {
        let mut session = StreamSession::new();
        session.apply(init("s1")).expect("init");
        session.apply(delta(1, "data.x", "ab")).expect("delta");
        session.apply(delta(2, "data.x", "cd")).expect("delta");
        session.apply(delta(3, "data.y", "z")).expect("delta");
        assert_eq!(
            session.partial_data(),
            json!({"data": {"x": "abcd", "y": "z"}})
        );
    }

    #[test]
    fn snapshot_replaces_accumulated_value() {
        let mut session = StreamSession::new();
        session.apply(init("s1")).expect("init");
        session.apply(delta(1, "data.x", "partial")).expect("delta");
        session
            .apply(Chunk::Snapshot {
                seq: 2,
                field: "data.x".to_string(),
                data: json!({"whole": true}),
            })
            .expect("snapshot");
        assert_eq!(session.partial_data(), json!({"data": {"x": {"whole": true}}}));
    }

    #[test]
    fn progress_is_forwarded_not_merged() {
        let mut session = StreamSession::new();
        session.apply(init("s1")).expect("init");
        let event = session
            .apply(Chunk::Progress {
                percent: 40.0,
                stage: Some("draft".to_string()),
                message: None,
            })
            .expect("progress");
        assert_eq!(
            event,
            StreamEvent::Progress {
                percent: 40.0,
                stage: Some("draft".to_string()),
                message: None
            }
        );
        assert_eq!(session.partial_data(), json!({}));
    }

    #[test]
    fn final_supersedes_accumulated_preview() {
        let mut session = StreamSession::new();
        session.apply(init("s1")).expect("init");
        session.apply(delta(1, "result", "pre")).expect("delta");
        let event = session
            .apply(Chunk::Final {
                data: json!({"result": "authoritative", "confidence": 0.9}),
                meta: None,
            })
            .expect("final");
        match event {
            StreamEvent::Completed(Envelope::Success(success)) => {
                assert_eq!(success.data.get("result"), Some(&json!("authoritative")));
                assert_eq!(success.confidence, 0.9);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(session.is_terminal());
    }

    #[test]
    fn chunk_after_terminal_is_rejected() {
        let mut session = StreamSession::new();
        session.apply(init("s1")).expect("init");
        session
            .apply(Chunk::Final {
                data: json!({}),
                meta: None,
            })
            .expect("final");
        let err = session
            .apply(delta(2, "data.x", "late"))
            .expect_err("post-terminal");
        assert!(err.to_string().contains("after terminal state"));
    }

    #[test]
    fn error_chunk_builds_partial_data_from_buffers() {
        let mut session = StreamSession::new();
        session.apply(init("s1")).expect("init");
        session.apply(delta(1, "data.x", "half")).expect("delta");
        let event = session
            .apply(Chunk::Error {
                error: EnvelopeError {
                    code: "E4001".to_string(),
                    message: "upstream died".to_string(),
                    recoverable: Some(true),
                },
                partial_data: None,
            })
            .expect("error chunk");
        match event {
            StreamEvent::Completed(Envelope::Failure(failure)) => {
                assert_eq!(failure.error.code, "E4001");
                assert_eq!(failure.partial_data, Some(json!({"data": {"x": "half"}})));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(session.state(), StreamState::Error);
    }

    #[test]
    fn synthesized_stream_matches_sync_parse() {
        let content = r#"{"ok":true,"data":{"result":"done"}}"#;
        let chunks = synthesize_stream("oneshot-1", content).expect("synthesize");
        assert_eq!(chunks.len(), 3);

        let mut session = StreamSession::new();
        let mut completed = None;
        for chunk in chunks {
            if let StreamEvent::Completed(envelope) = session.apply(chunk).expect("apply") {
                completed = Some(envelope);
            }
        }
        let envelope = completed.expect("terminal chunk");
        assert_eq!(envelope, parse_response(content).expect("sync parse"));
    }

    #[test]
    fn synthesized_stream_surfaces_failure_as_error_chunk() {
        let content = r#"{"ok":false,"error":{"code":"E4001","message":"no"}}"#;
        let chunks = synthesize_stream("oneshot-2", content).expect("synthesize");
        assert!(matches!(chunks.last(), Some(Chunk::Error { .. })));
    }

    #[test]
    fn chunk_wire_format_round_trips() {
        let chunk = delta(3, "data.summary", "text");
        let wire = serde_json::to_string(&chunk).expect("serialize");
        assert!(wire.contains(r#""type":"delta""#));
        let back: Chunk = serde_json::from_str(&wire).expect("deserialize");
        assert_eq!(back, chunk);
    }
}
