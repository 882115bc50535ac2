//! ProposalForge Context Engine
//!
//! Retrieval-orchestrated structured generation:
//! - Mode registry and dispatcher
//! - Multi-query retrieval with identity-keyed merging
//! - Citation-labelled prompt assembly
//! - Structured generation with salvage and budget escalation
//! - Structured record → prose rendering

pub mod citation;
pub mod generation;
pub mod modes;
pub mod query_set;
pub mod render;
pub mod retrieval;
pub mod schema;
pub mod server;

pub use modes::{DispatchArgs, ModeRegistry, Pipeline, PipelineOutcome};
