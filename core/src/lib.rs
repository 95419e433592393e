//! Buildplane Core - Foundational Types
//!
//! Shared error types used across the buildplane image metadata
//! and rebase engine.

pub mod error;

// Re-export commonly used types
pub use error::{BuildError, Result};

/// Buildplane version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
