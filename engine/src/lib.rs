//! Protocol engine for LLM-backed task modules.
//!
//! A module is a named unit of declarative work: a manifest, a prompt
//! template, and optional JSON Schemas. This crate resolves modules from
//! disk, renders their prompts deterministically, brokers the response
//! envelope protocol (one-shot and chunked), and orchestrates depth-first
//! subagent invocation with cycle and depth guards. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (prompt assembly, directive
//!   scanning, envelope parsing, the stream state machine). No I/O, fully
//!   testable in isolation.
//! - **[`io`]**: Side-effecting operations (manifest loading, module
//!   resolution, config). Isolated to enable tempdir-backed tests.
//!
//! [`orchestrate`] coordinates core logic with I/O and an injected
//! [`provider::ProviderGateway`] to run full invocation trees.

pub mod core;
pub mod error;
pub mod io;
pub mod logging;
pub mod module;
pub mod orchestrate;
pub mod provider;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validator;

pub use crate::core::context::{CallContext, MAX_CALL_DEPTH};
pub use crate::core::envelope::{Envelope, parse_response};
pub use crate::core::prompt::InvocationInput;
pub use crate::error::EngineError;
pub use crate::io::resolver::Resolver;
pub use crate::module::ModuleDescriptor;
pub use crate::orchestrate::Orchestrator;
