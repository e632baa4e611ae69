//! Provider gateway abstraction.
//!
//! The [`ProviderGateway`] trait decouples orchestration from vendor HTTP
//! clients; the engine consumes only the `invoke`/`invoke_stream` shapes and
//! is agnostic to vendor request formats. Gateways are injected into the
//! orchestrator explicitly, never selected from ambient global state. Tests
//! use scripted gateways that return predetermined content.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::stream::{Chunk, synthesize_stream};
use crate::error::EngineError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Vendor-agnostic invocation options.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InvokeOptions {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One-shot gateway result.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

pub type ChunkStream = Box<dyn Iterator<Item = Result<Chunk, EngineError>>>;

/// External LLM provider collaborator.
pub trait ProviderGateway {
    /// Send messages and return the provider's raw text content.
    fn invoke(
        &self,
        messages: &[Message],
        options: &InvokeOptions,
    ) -> Result<ProviderResponse, EngineError>;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Chunked invocation. The default synthesizes an init + whole-content
    /// delta + terminal sequence from the one-shot result, so stream
    /// consumers never special-case non-streaming providers.
    fn invoke_stream(
        &self,
        messages: &[Message],
        options: &InvokeOptions,
    ) -> Result<ChunkStream, EngineError> {
        let response = self.invoke(messages, options)?;
        let chunks = synthesize_stream(&next_synthetic_session_id(), &response.content)?;
        Ok(Box::new(chunks.into_iter().map(Ok)))
    }
}

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_synthetic_session_id() -> String {
    format!("oneshot-{}", SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::{StreamEvent, StreamSession};
    use crate::core::envelope::Envelope;

    struct OneShotGateway {
        content: String,
    }

    impl ProviderGateway for OneShotGateway {
        fn invoke(
            &self,
            _messages: &[Message],
            _options: &InvokeOptions,
        ) -> Result<ProviderResponse, EngineError> {
            Ok(ProviderResponse {
                content: self.content.clone(),
                usage: None,
            })
        }
    }

    /// A non-streaming gateway still satisfies the streaming interface via
    /// the synthesized three-chunk sequence.
    #[test]
    fn default_invoke_stream_synthesizes_chunks() {
        let gateway = OneShotGateway {
            content: r#"{"ok":true,"data":{"result":"done"}}"#.to_string(),
        };
        assert!(!gateway.supports_streaming());

        let mut session = StreamSession::new();
        let mut envelope = None;
        for chunk in gateway
            .invoke_stream(&[Message::user("hi")], &InvokeOptions::default())
            .expect("stream")
        {
            if let StreamEvent::Completed(done) =
                session.apply(chunk.expect("chunk")).expect("apply")
            {
                envelope = Some(done);
            }
        }
        match envelope.expect("completed") {
            Envelope::Success(success) => {
                assert_eq!(
                    success.data.get("result").and_then(|v| v.as_str()),
                    Some("done")
                );
            }
            Envelope::Failure(_) => panic!("expected success"),
        }
    }

    #[test]
    fn synthetic_session_ids_are_unique_and_non_empty() {
        let a = next_synthetic_session_id();
        let b = next_synthetic_session_id();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }
}
