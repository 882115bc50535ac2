//! ProposalForge Common Library
//!
//! Shared code for ProposalForge services including:
//! - Error types and handling
//! - Live configuration sources
//! - Time-boxed response caching
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use config::{AppConfig, ConfigSource, ModelProfile};
pub use errors::{AppError, PipelineStage, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
