//! Mode Dispatcher
//!
//! Runs one request through the pipeline:
//! 1. Resolve the mode profile and check its arguments
//! 2. Derive the Query Set
//! 3. Retrieve from the primary (and, if flagged, secondary) index
//! 4. Assemble citations and the labelled context
//! 5. Build the schema for structured modes
//! 6. Generate
//! 7. Render structured output back to prose
//!
//! Errors leave with the mode and stage attached; their kind is unchanged.

use super::prompts::{self, RevisionInput};
use super::{HandlerKind, ModeProfile, ModeRegistry};
use crate::citation::{cited_labels, Citation, CitationAssembler};
use crate::generation::{GenerationOutput, GenerationRequest, GenerationResult, StructuredClient};
use crate::query_set::{QueryExpander, QueryExpanderConfig};
use crate::render::render;
use crate::retrieval::{merge_lists, retrieve, Passage, RetrievalParams, SemanticIndex};
use crate::schema::SchemaRegistry;
use chrono::{DateTime, Utc};
use proposalforge_common::metrics::DispatchMetrics;
use proposalforge_common::{AppError, ConfigSource, PipelineStage, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const NO_EVIDENCE_MESSAGE: &str = "No relevant material found";

/// Per-call arguments
#[derive(Debug, Clone, Default)]
pub struct DispatchArgs {
    /// Overrides the profile's default `k`
    pub k: Option<usize>,
    /// Record being revised (revision modes)
    pub previous: Option<Value>,
    /// Reviewer feedback (revision modes)
    pub feedback: Option<String>,
    /// Overrides the configured model
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSummary {
    pub model: String,
    pub attempts: u32,
    pub salvaged: bool,
    pub budgets: Vec<u32>,
}

/// A generated answer with its evidence
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub request_id: Uuid,
    pub mode: String,
    pub prose: String,
    /// Structured record, for structured modes
    pub record: Option<Value>,
    pub citations: Vec<Citation>,
    /// Labels the prose actually cites
    pub cited_labels: Vec<String>,
    pub passages: Vec<Passage>,
    pub generation: GenerationSummary,
    pub generated_at: DateTime<Utc>,
}

/// Outcome of a dispatch that did not fail
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Answered(Answer),
    /// Retrieval found nothing; generation was not invoked
    NoEvidence {
        mode: String,
        queries: Vec<String>,
        message: String,
    },
}

impl PipelineOutcome {
    pub fn prose(&self) -> &str {
        match self {
            PipelineOutcome::Answered(answer) => &answer.prose,
            PipelineOutcome::NoEvidence { message, .. } => message,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            PipelineOutcome::Answered(_) => "answered",
            PipelineOutcome::NoEvidence { .. } => "no_evidence",
        }
    }
}

/// Everything a dispatch needs, built once at startup
pub struct Pipeline {
    registry: ModeRegistry,
    primary: Arc<dyn SemanticIndex>,
    secondary: Option<Arc<dyn SemanticIndex>>,
    config: Arc<dyn ConfigSource>,
    client: StructuredClient,
    expander: QueryExpander,
    schemas: SchemaRegistry,
    assembler: CitationAssembler,
}

impl Pipeline {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        primary: Arc<dyn SemanticIndex>,
        client: StructuredClient,
    ) -> Self {
        Self {
            registry: ModeRegistry::new(),
            primary,
            secondary: None,
            schemas: SchemaRegistry::new(config.clone()),
            config,
            client,
            expander: QueryExpander::new(QueryExpanderConfig::default()),
            assembler: CitationAssembler::new(),
        }
    }

    pub fn with_secondary(mut self, index: Arc<dyn SemanticIndex>) -> Self {
        self.secondary = Some(index);
        self
    }

    pub fn with_expander(mut self, expander: QueryExpander) -> Self {
        self.expander = expander;
        self
    }

    pub fn registry(&self) -> &ModeRegistry {
        &self.registry
    }

    /// Run `question` through `mode`
    pub async fn dispatch(
        &self,
        mode: &str,
        question: &str,
        args: DispatchArgs,
    ) -> Result<PipelineOutcome> {
        let metrics = DispatchMetrics::start(mode);
        let result = self.run(mode, question, args).await;

        match &result {
            Ok(outcome) => metrics.finish(outcome.label()),
            Err(e) => {
                warn!(mode, stage = ?e.stage(), error = %e, "Dispatch failed");
                metrics.finish("error");
            }
        }
        result
    }

    async fn run(&self, mode: &str, question: &str, args: DispatchArgs) -> Result<PipelineOutcome> {
        let tag = |stage: PipelineStage| move |e: AppError| e.in_stage(mode, stage);

        let profile = self
            .registry
            .describe(mode)
            .map_err(tag(PipelineStage::Dispatch))?;
        let revision = revision_input(profile, &args).map_err(tag(PipelineStage::Dispatch))?;
        let k = match args.k {
            Some(0) => {
                let err = AppError::Validation {
                    message: "k must be at least 1".to_string(),
                    field: Some("k".to_string()),
                };
                return Err(err.in_stage(mode, PipelineStage::Dispatch));
            }
            Some(k) => k,
            None => profile.default_k,
        };

        let config = self.config.snapshot().map_err(tag(PipelineStage::Dispatch))?;
        let model = args.model.clone().unwrap_or_else(|| config.llm.model.clone());
        let model_profile = config
            .model_profile(&model)
            .map_err(tag(PipelineStage::Generation))?;

        // 1. Query Set
        let queries = self
            .expander
            .expand(question)
            .map_err(tag(PipelineStage::QueryExpansion))?;

        // 2. Retrieval
        let params = RetrievalParams {
            k,
            fetch_k: config.retrieval.fetch_k.max(k),
            score_threshold: config.retrieval.score_threshold,
        };
        let passages = self
            .gather(profile, &queries, params)
            .await
            .map_err(tag(PipelineStage::Retrieval))?;

        if passages.is_empty() {
            info!(mode, queries = queries.len(), "No evidence; skipping generation");
            return Ok(PipelineOutcome::NoEvidence {
                mode: mode.to_string(),
                queries: queries.into_vec(),
                message: NO_EVIDENCE_MESSAGE.to_string(),
            });
        }

        // 3. Citations
        let assembled = self.assembler.build(&passages);

        // 4. Schema (rebuilt per call so bounds track live config)
        let schema = profile
            .schema()
            .map(|kind| self.schemas.build(kind.as_str()))
            .transpose()
            .map_err(tag(PipelineStage::Schema))?;

        // 5. Generation
        let request = GenerationRequest {
            system_prompt: prompts::system_prompt(profile),
            user_prompt: prompts::user_prompt(profile, question, &assembled.context_text, revision),
            schema,
            model: model.clone(),
            profile: model_profile,
        };
        let report = self.client.generate(&request).await;
        let summary = GenerationSummary {
            model,
            attempts: report.attempts,
            salvaged: matches!(report.result, GenerationResult::Salvaged(_)),
            budgets: report.budgets.clone(),
        };
        let output = report.into_output().map_err(tag(PipelineStage::Generation))?;

        // 6. Rendering
        let (prose, record) = match (profile.schema(), output) {
            (Some(kind), GenerationOutput::Record(record)) => (render(&record, kind), Some(record)),
            (None, GenerationOutput::Text(text)) => (text, None),
            _ => {
                let err = AppError::Internal {
                    message: "generation output does not match the mode's output contract".to_string(),
                };
                return Err(err.in_stage(mode, PipelineStage::Rendering));
            }
        };

        let cited = cited_labels(&prose, &assembled.citations);
        info!(
            mode,
            passages = passages.len(),
            citations = assembled.citations.len(),
            cited = cited.len(),
            attempts = summary.attempts,
            "Dispatch complete"
        );

        Ok(PipelineOutcome::Answered(Answer {
            request_id: Uuid::new_v4(),
            mode: mode.to_string(),
            prose,
            record,
            citations: assembled.citations,
            cited_labels: cited,
            passages,
            generation: summary,
            generated_at: Utc::now(),
        }))
    }

    /// Primary passages, then secondary ones for modes that need both
    async fn gather(
        &self,
        profile: &ModeProfile,
        queries: &crate::query_set::QuerySet,
        params: RetrievalParams,
    ) -> Result<Vec<Passage>> {
        let primary = retrieve(self.primary.as_ref(), queries, params).await?;
        if !profile.requires_secondary_index {
            return Ok(primary);
        }

        let secondary_index = self.secondary.as_ref().ok_or_else(|| {
            AppError::configuration(format!(
                "mode '{}' requires a secondary index but none is configured",
                profile.name
            ))
        })?;
        let secondary = retrieve(secondary_index.as_ref(), queries, params).await?;

        Ok(merge_lists(vec![primary, secondary]))
    }
}

fn revision_input<'a>(
    profile: &ModeProfile,
    args: &'a DispatchArgs,
) -> Result<Option<RevisionInput<'a>>> {
    if !matches!(profile.handler, HandlerKind::Revision(_)) {
        return Ok(None);
    }

    let previous = match &args.previous {
        Some(record) if record.is_object() => record,
        Some(_) => {
            return Err(AppError::Validation {
                message: "previous must be a structured record".to_string(),
                field: Some("previous".to_string()),
            })
        }
        None => {
            return Err(AppError::MissingArgument {
                field: "previous".to_string(),
            })
        }
    };
    let feedback = args
        .feedback
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| AppError::MissingArgument {
            field: "feedback".to_string(),
        })?;

    Ok(Some(RevisionInput { previous, feedback }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::{transport_error, ScriptedBackend};
    use crate::generation::{InferenceResponse, RetryPolicy};
    use crate::retrieval::testing::{hit, FakeIndex};
    use crate::retrieval::IndexHit;
    use proposalforge_common::config::StaticConfigSource;
    use serde_json::json;
    use std::time::Duration;

    const QUESTION: &str = "humidity stability of amine sorbents";

    struct Harness {
        primary: Arc<FakeIndex>,
        secondary: Arc<FakeIndex>,
        backend: Arc<ScriptedBackend>,
        config: Arc<StaticConfigSource>,
    }

    impl Harness {
        fn new(primary_hits: Vec<IndexHit>, script: Vec<Result<InferenceResponse>>) -> Self {
            Self {
                primary: Arc::new(FakeIndex::new("papers").with(QUESTION, primary_hits)),
                secondary: Arc::new(FakeIndex::new("patents")),
                backend: Arc::new(ScriptedBackend::new(script)),
                config: Arc::new(StaticConfigSource::default()),
            }
        }

        fn with_secondary_hits(mut self, hits: Vec<IndexHit>) -> Self {
            self.secondary = Arc::new(FakeIndex::new("patents").with(QUESTION, hits));
            self
        }

        fn pipeline(&self, with_secondary: bool) -> Pipeline {
            let client = StructuredClient::new(
                self.backend.clone(),
                RetryPolicy {
                    backoff: Duration::ZERO,
                    ..RetryPolicy::default()
                },
            );
            let pipeline = Pipeline::new(self.config.clone(), self.primary.clone(), client);
            if with_secondary {
                pipeline.with_secondary(self.secondary.clone())
            } else {
                pipeline
            }
        }
    }

    fn two_hits() -> Vec<IndexHit> {
        vec![
            hit("a", "sorbents.pdf", 3, "Amine loss above 60% RH."),
            hit("b", "sorbents.pdf", 4, "Grafted amines retain capacity."),
        ]
    }

    fn proposal_record() -> Value {
        json!({
            "title": "Grafted amine sorbents",
            "need": "Capacity fades in humid air [1]",
            "solution": "Covalent grafting [2]",
            "differentiation": "No leaching",
            "benefit": "Longer sorbent life",
            "experimental_overview": null,
            "materials": null,
        })
    }

    #[tokio::test]
    async fn test_empty_index_yields_no_evidence_without_generation() {
        let harness = Harness::new(vec![], vec![]);
        let outcome = harness
            .pipeline(false)
            .dispatch("strict_sourcing", QUESTION, DispatchArgs::default())
            .await
            .unwrap();

        match &outcome {
            PipelineOutcome::NoEvidence { mode, queries, .. } => {
                assert_eq!(mode, "strict_sourcing");
                assert_eq!(queries[0], QUESTION);
            }
            other => panic!("expected no evidence, got {:?}", other),
        }
        assert_eq!(outcome.prose(), NO_EVIDENCE_MESSAGE);
        assert!(harness.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_mode_is_validation_error_listing_modes() {
        let harness = Harness::new(vec![], vec![]);
        let pipeline = harness.pipeline(false);

        let err = pipeline
            .dispatch("foo", QUESTION, DispatchArgs::default())
            .await
            .unwrap_err();

        assert!(err.is_validation());
        match err.root() {
            AppError::UnknownMode { mode, available } => {
                assert_eq!(mode, "foo");
                assert_eq!(available, &pipeline.registry().names());
                assert_eq!(available.len(), 7);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(harness.primary.calls(), 0);
    }

    #[tokio::test]
    async fn test_strict_sourcing_answers_with_citations() {
        let harness = Harness::new(
            two_hits(),
            vec![Ok(InferenceResponse::completed("Amines leach in humid air [1]."))],
        );

        let outcome = harness
            .pipeline(false)
            .dispatch("strict_sourcing", QUESTION, DispatchArgs::default())
            .await
            .unwrap();

        let PipelineOutcome::Answered(answer) = outcome else {
            panic!("expected an answer");
        };
        assert_eq!(answer.prose, "Amines leach in humid air [1].");
        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.cited_labels, vec!["[1]"]);
        assert!(answer.record.is_none());

        let calls = harness.backend.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].json_schema.is_none());
        assert!(calls[0].input[1]
            .content
            .contains("[1] sorbents.pdf | 3\nAmine loss above 60% RH.\n\n"));
    }

    #[tokio::test]
    async fn test_k_override_limits_passages() {
        let harness = Harness::new(two_hits(), vec![Ok(InferenceResponse::completed("ok"))]);

        let outcome = harness
            .pipeline(false)
            .dispatch(
                "sourced_reasoning",
                QUESTION,
                DispatchArgs {
                    k: Some(1),
                    ..DispatchArgs::default()
                },
            )
            .await
            .unwrap();

        let PipelineOutcome::Answered(answer) = outcome else {
            panic!("expected an answer");
        };
        assert_eq!(answer.passages.len(), 1);
    }

    #[tokio::test]
    async fn test_secondary_mode_without_secondary_index() {
        let harness = Harness::new(two_hits(), vec![]);

        let err = harness
            .pipeline(false)
            .dispatch("new_proposal", QUESTION, DispatchArgs::default())
            .await
            .unwrap_err();

        assert!(matches!(err.root(), AppError::Configuration { .. }));
        assert_eq!(err.stage(), Some(PipelineStage::Retrieval));
        assert!(harness.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_new_proposal_merges_indexes_and_renders() {
        let harness = Harness::new(
            two_hits(),
            vec![Ok(InferenceResponse::completed(proposal_record().to_string()))],
        )
        .with_secondary_hits(vec![hit("p1", "US123.pdf", 1, "Patent claim on grafting.")]);

        let outcome = harness
            .pipeline(true)
            .dispatch("new_proposal", QUESTION, DispatchArgs::default())
            .await
            .unwrap();

        let PipelineOutcome::Answered(answer) = outcome else {
            panic!("expected an answer");
        };
        let sources: Vec<_> = answer.passages.iter().map(|p| p.source.as_str()).collect();
        assert_eq!(sources, vec!["sorbents.pdf", "sorbents.pdf", "US123.pdf"]);
        assert!(answer.prose.starts_with("## Title\nGrafted amine sorbents\n\n## Need\n"));
        assert_eq!(answer.cited_labels, vec!["[1]", "[2]"]);
        assert_eq!(answer.record, Some(proposal_record()));
        assert_eq!(harness.secondary.calls(), 1);

        let calls = harness.backend.calls();
        let format = calls[0].json_schema.as_ref().unwrap();
        assert_eq!(format.name, "proposal");
        assert_eq!(calls[0].max_output_tokens, 6000);
    }

    #[tokio::test]
    async fn test_schema_bounds_read_per_dispatch() {
        let harness = Harness::new(
            two_hits(),
            vec![
                Ok(InferenceResponse::completed(
                    json!({
                        "title": "Plan", "objective": "Measure uptake",
                        "materials": [], "equipment": [], "procedure": [],
                        "characterization": null, "safety_notes": null,
                        "expected_outcomes": "Isotherms",
                    })
                    .to_string(),
                )),
            ],
        );
        harness
            .config
            .update(|c| c.schema.max_length = 2500)
            .unwrap();

        harness
            .pipeline(false)
            .dispatch("experimental_plan", QUESTION, DispatchArgs::default())
            .await
            .unwrap();

        let calls = harness.backend.calls();
        let schema = &calls[0].json_schema.as_ref().unwrap().schema;
        assert_eq!(schema["properties"]["objective"]["maxLength"], 2500);
    }

    #[tokio::test]
    async fn test_revision_requires_previous_and_feedback() {
        let harness = Harness::new(two_hits(), vec![]);
        let pipeline = harness.pipeline(false);

        let err = pipeline
            .dispatch("revise_proposal", QUESTION, DispatchArgs::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.stage(), Some(PipelineStage::Dispatch));

        let err = pipeline
            .dispatch(
                "revise_proposal",
                QUESTION,
                DispatchArgs {
                    previous: Some(proposal_record()),
                    feedback: Some("   ".to_string()),
                    ..DispatchArgs::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err.root(), AppError::MissingArgument { field } if field == "feedback"));
        assert_eq!(harness.primary.calls(), 0);
    }

    #[tokio::test]
    async fn test_revision_uses_revision_schema() {
        let mut revised = proposal_record();
        revised["revision_explanation"] = json!("Focused on grafting chemistry");
        let harness = Harness::new(
            two_hits(),
            vec![Ok(InferenceResponse::completed(revised.to_string()))],
        );

        let outcome = harness
            .pipeline(false)
            .dispatch(
                "revise_proposal",
                QUESTION,
                DispatchArgs {
                    previous: Some(proposal_record()),
                    feedback: Some("Explain the grafting chemistry".to_string()),
                    ..DispatchArgs::default()
                },
            )
            .await
            .unwrap();

        assert!(outcome
            .prose()
            .ends_with("## Revision Notes\nFocused on grafting chemistry"));
        let calls = harness.backend.calls();
        assert_eq!(calls[0].json_schema.as_ref().unwrap().name, "proposal_revision");
        assert!(calls[0].input[1].content.contains("Explain the grafting chemistry"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_tagged() {
        let harness = Harness::new(
            two_hits(),
            vec![Err(transport_error()), Err(transport_error()), Err(transport_error())],
        );

        let err = harness
            .pipeline(false)
            .dispatch("strict_sourcing", QUESTION, DispatchArgs::default())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(PipelineStage::Generation));
        assert!(matches!(err.root(), AppError::Generation { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_unknown_model_is_configuration_error() {
        let harness = Harness::new(two_hits(), vec![]);

        let err = harness
            .pipeline(false)
            .dispatch(
                "strict_sourcing",
                QUESTION,
                DispatchArgs {
                    model: Some("davinci".to_string()),
                    ..DispatchArgs::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err.root(), AppError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_retrieval_failure_is_tagged() {
        let mut harness = Harness::new(vec![], vec![]);
        harness.primary = Arc::new(FakeIndex::new("papers").failing());

        let err = harness
            .pipeline(false)
            .dispatch("strict_sourcing", QUESTION, DispatchArgs::default())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(PipelineStage::Retrieval));
        assert!(matches!(err.root(), AppError::Retrieval { .. }));
    }
}
