//! Filesystem access: configuration, manifests, module lookup.

pub mod config;
pub mod manifest;
pub mod resolver;
pub mod verify;
