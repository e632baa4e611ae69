//! Typed error taxonomy for engine invocations.
//!
//! Every terminal outcome of a top-level invocation is expressed as exactly
//! one envelope; these variants exist so failures carry stable wire codes
//! (`E[1-4][0-9]{3}`) on their way to that envelope. Resolution and parse
//! errors abort the invocation that triggered them; child failures abort the
//! full ancestor chain unless the parent opts into continue-on-failure;
//! provider errors are forwarded unchanged, never retried here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// No search path contains a valid module under this name.
    #[error("module not found: {name}")]
    NotFound { name: String },

    /// A manifest was found but could not be parsed.
    #[error("manifest parse error in {path}: {reason}")]
    ManifestParse { path: String, reason: String },

    /// Provider output could not be interpreted as a response envelope.
    #[error("unparseable provider response ({reason}): {snippet}")]
    ResponseParse { reason: String, snippet: String },

    /// Bad stream sequencing, missing session id, or a post-terminal chunk.
    #[error("stream protocol violation: {0}")]
    StreamProtocolViolation(String),

    /// A module's directive chain references a module already on its own
    /// ancestor chain.
    #[error("cycle detected: '{name}' already appears in call chain [{chain}]")]
    CycleDetected { name: String, chain: String },

    #[error("max call depth {max} exceeded invoking '{name}'")]
    MaxDepthExceeded { name: String, max: usize },

    /// A child invocation failed and the parent did not declare
    /// continue-on-failure. `call_site` is the byte offset of the directive
    /// in the parent's prompt text.
    #[error("child module '{child}' failed at offset {call_site}: {message}")]
    ChildInvocationFailed {
        child: String,
        call_site: usize,
        message: String,
    },

    /// Data failed validation against a module schema.
    #[error("{label} failed schema validation for '{module}': {}", errors.join("; "))]
    SchemaValidationFailed {
        module: String,
        label: String,
        errors: Vec<String>,
    },

    /// Network/auth failure from the external gateway, forwarded unchanged.
    #[error("provider invocation failed: {0}")]
    ProviderInvocation(String),

    /// The top-level invocation deadline passed; the active chain is aborted
    /// and open stream sessions are discarded without merging buffers.
    #[error("invocation deadline exceeded")]
    DeadlineExceeded,
}

impl EngineError {
    /// Stable wire code for this error, matching `E[1-4][0-9]{3}`.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "E1001",
            EngineError::ManifestParse { .. } => "E1002",
            EngineError::ResponseParse { .. } => "E2001",
            EngineError::StreamProtocolViolation(_) => "E2002",
            EngineError::CycleDetected { .. } => "E3001",
            EngineError::MaxDepthExceeded { .. } => "E3002",
            EngineError::ChildInvocationFailed { .. } => "E3003",
            EngineError::SchemaValidationFailed { .. } => "E3004",
            EngineError::ProviderInvocation(_) => "E4001",
            EngineError::DeadlineExceeded => "E4002",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_wire_pattern() {
        let pattern = regex::Regex::new("^E[1-4][0-9]{3}$").expect("pattern");
        let errors = [
            EngineError::NotFound {
                name: "x".to_string(),
            },
            EngineError::ManifestParse {
                path: "m/module.md".to_string(),
                reason: "bad yaml".to_string(),
            },
            EngineError::ResponseParse {
                reason: "not json".to_string(),
                snippet: "oops".to_string(),
            },
            EngineError::StreamProtocolViolation("dup seq".to_string()),
            EngineError::CycleDetected {
                name: "a".to_string(),
                chain: "a".to_string(),
            },
            EngineError::MaxDepthExceeded {
                name: "b".to_string(),
                max: 5,
            },
            EngineError::ChildInvocationFailed {
                child: "c".to_string(),
                call_site: 0,
                message: "boom".to_string(),
            },
            EngineError::SchemaValidationFailed {
                module: "c".to_string(),
                label: "output".to_string(),
                errors: vec![],
            },
            EngineError::ProviderInvocation("timeout".to_string()),
            EngineError::DeadlineExceeded,
        ];
        for err in errors {
            assert!(pattern.is_match(err.code()), "bad code {}", err.code());
        }
    }

    #[test]
    fn cycle_message_names_the_chain() {
        let err = EngineError::CycleDetected {
            name: "review".to_string(),
            chain: "review > summarize".to_string(),
        };
        assert!(err.to_string().contains("review > summarize"));
    }
}
