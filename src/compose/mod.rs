//! Docker Compose manifest parsing and validation.
//!
//! This module provides support for parsing docker-compose.yml manifests
//! (v3 format) and reducing them to the descriptor the quota enforcer and
//! deployment manager consume.

pub mod parser;
pub mod types;

pub use parser::ComposeParser;
pub use types::*;
