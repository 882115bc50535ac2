//! Mode Registry
//!
//! The compiled mode table is the only place mode names are enumerated.
//! Each profile fixes the retrieval scope and output contract of a mode and
//! names the handler that runs it.

mod dispatcher;
pub mod prompts;

pub use dispatcher::{
    Answer, DispatchArgs, GenerationSummary, Pipeline, PipelineOutcome, NO_EVIDENCE_MESSAGE,
};

use crate::schema::SchemaKind;
use proposalforge_common::{AppError, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeCategory {
    Answer,
    Proposal,
    Revision,
}

/// Handler that runs a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    QuestionAnswering,
    Proposal,
    ExperimentalDetail,
    /// Revises a previous record of the given base shape
    Revision(SchemaKind),
}

impl HandlerKind {
    /// Output schema the handler generates against, if structured
    pub fn schema(&self) -> Option<SchemaKind> {
        match self {
            HandlerKind::QuestionAnswering => None,
            HandlerKind::Proposal => Some(SchemaKind::Proposal),
            HandlerKind::ExperimentalDetail => Some(SchemaKind::ExperimentalDetail),
            HandlerKind::Revision(base) => Some(base.revision()),
        }
    }
}

/// Behaviour profile of one mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeProfile {
    pub name: &'static str,
    pub description: &'static str,
    /// Passages retrieved when the request gives no `k`
    pub default_k: usize,
    pub requires_secondary_index: bool,
    /// Whether the answer may go beyond what the excerpts state
    pub allows_inference: bool,
    pub structured_output: bool,
    pub category: ModeCategory,
    pub handler: HandlerKind,
}

impl ModeProfile {
    pub fn schema(&self) -> Option<SchemaKind> {
        if self.structured_output {
            self.handler.schema()
        } else {
            None
        }
    }
}

const MODE_TABLE: &[ModeProfile] = &[
    ModeProfile {
        name: "strict_sourcing",
        description: "Answer strictly from retrieved excerpts, citing each claim",
        default_k: 8,
        requires_secondary_index: false,
        allows_inference: false,
        structured_output: false,
        category: ModeCategory::Answer,
        handler: HandlerKind::QuestionAnswering,
    },
    ModeProfile {
        name: "sourced_reasoning",
        description: "Answer from excerpts, with clearly marked reasoning beyond them",
        default_k: 8,
        requires_secondary_index: false,
        allows_inference: true,
        structured_output: false,
        category: ModeCategory::Answer,
        handler: HandlerKind::QuestionAnswering,
    },
    ModeProfile {
        name: "literature_scan",
        description: "Survey what both corpora report on a topic",
        default_k: 12,
        requires_secondary_index: true,
        allows_inference: false,
        structured_output: false,
        category: ModeCategory::Answer,
        handler: HandlerKind::QuestionAnswering,
    },
    ModeProfile {
        name: "new_proposal",
        description: "Draft a structured research proposal",
        default_k: 10,
        requires_secondary_index: true,
        allows_inference: true,
        structured_output: true,
        category: ModeCategory::Proposal,
        handler: HandlerKind::Proposal,
    },
    ModeProfile {
        name: "experimental_plan",
        description: "Draft a structured experimental plan",
        default_k: 10,
        requires_secondary_index: false,
        allows_inference: true,
        structured_output: true,
        category: ModeCategory::Proposal,
        handler: HandlerKind::ExperimentalDetail,
    },
    ModeProfile {
        name: "revise_proposal",
        description: "Revise a proposal against reviewer feedback",
        default_k: 6,
        requires_secondary_index: false,
        allows_inference: true,
        structured_output: true,
        category: ModeCategory::Revision,
        handler: HandlerKind::Revision(SchemaKind::Proposal),
    },
    ModeProfile {
        name: "revise_experimental_plan",
        description: "Revise an experimental plan against reviewer feedback",
        default_k: 6,
        requires_secondary_index: false,
        allows_inference: true,
        structured_output: true,
        category: ModeCategory::Revision,
        handler: HandlerKind::Revision(SchemaKind::ExperimentalDetail),
    },
];

/// Read-only view over the mode table
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    profiles: &'static [ModeProfile],
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeRegistry {
    pub fn new() -> Self {
        Self {
            profiles: MODE_TABLE,
        }
    }

    /// All profiles in table order
    pub fn list_modes(&self) -> &[ModeProfile] {
        self.profiles
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.name.to_string()).collect()
    }

    pub fn validate(&self, mode: &str) -> bool {
        self.profile(mode).is_some()
    }

    pub fn profile(&self, mode: &str) -> Option<&ModeProfile> {
        self.profiles.iter().find(|p| p.name == mode)
    }

    /// Profile for `mode`, or a validation error listing every registered mode
    pub fn describe(&self, mode: &str) -> Result<&ModeProfile> {
        self.profile(mode).ok_or_else(|| AppError::UnknownMode {
            mode: mode.to_string(),
            available: self.names(),
        })
    }
}
