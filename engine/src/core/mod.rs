//! Deterministic, pure logic of the module engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod context;
pub mod directive;
pub mod envelope;
pub mod prompt;
pub mod stream;
