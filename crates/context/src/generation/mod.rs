//! Structured Generation Client
//!
//! Drives one generation request through the inference backend:
//! - Token budget grows by a fixed step on every attempt
//! - Truncated structured responses are salvaged when a complete record
//!   precedes the cut
//! - Transport errors back off before the next attempt; other retries don't
//!
//! The loop always ends in a [`GenerationResult`]; no error escapes it.

mod backend;
mod salvage;

pub use backend::{
    InferenceBackend, InferenceCall, InferenceResponse, InputTurn, JsonSchemaFormat,
    OpenAiResponsesBackend, ResponseStatus, Role,
};
pub use salvage::{closing_points, parse_record, salvage};

use crate::schema::{validate_deep, Schema};
use proposalforge_common::config::LlmConfig;
use proposalforge_common::{metrics, AppError, ModelProfile, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const REASON_EXHAUSTED: &str = "all retries exhausted";
pub const REASON_UNSALVAGEABLE: &str = "incomplete, unsalvageable";
pub const REASON_UNPARSEABLE: &str = "structured output could not be parsed";

/// Attempt limits and budget escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub budget_step: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            budget_step: 1000,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            budget_step: config.budget_step,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Attempts actually made; at least one
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Output token budget for zero-based attempt `n`
    pub fn budget(&self, base: u32, n: u32) -> u32 {
        base.saturating_add(n.saturating_mul(self.budget_step.max(1)))
    }
}

/// One generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Present for structured output
    pub schema: Option<Schema>,
    pub model: String,
    pub profile: ModelProfile,
}

impl GenerationRequest {
    fn call(&self, attempt: u32, max_output_tokens: u32) -> InferenceCall {
        InferenceCall {
            model: self.model.clone(),
            input: vec![
                InputTurn {
                    role: Role::System,
                    content: self.system_prompt.clone(),
                },
                InputTurn {
                    role: Role::User,
                    content: self.user_prompt.clone(),
                },
            ],
            max_output_tokens,
            json_schema: self.schema.as_ref().map(|schema| JsonSchemaFormat {
                name: schema.name().to_string(),
                schema: schema.to_json_schema(),
                strict: true,
            }),
            reasoning_effort: self.profile.reasoning_effort.clone(),
            verbosity: self.profile.verbosity.clone(),
            timeout: self.profile.timeout(),
            attempt,
        }
    }
}

/// Successful payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum GenerationOutput {
    Text(String),
    Record(Value),
}

/// Terminal state of the retry loop
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    Complete(GenerationOutput),
    /// Recovered from a truncated response; always structured
    Salvaged(Value),
    Failed(String),
}

impl GenerationResult {
    pub fn label(&self) -> &'static str {
        match self {
            GenerationResult::Complete(_) => "complete",
            GenerationResult::Salvaged(_) => "salvaged",
            GenerationResult::Failed(_) => "failed",
        }
    }
}

/// Result plus the attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub result: GenerationResult,
    pub attempts: u32,
    /// Output token budget of each attempt, in order
    pub budgets: Vec<u32>,
}

impl GenerationReport {
    /// Payload of a successful run, or a generation error
    pub fn into_output(self) -> Result<GenerationOutput> {
        match self.result {
            GenerationResult::Complete(output) => Ok(output),
            GenerationResult::Salvaged(record) => Ok(GenerationOutput::Record(record)),
            GenerationResult::Failed(reason) => Err(AppError::Generation {
                reason,
                attempts: self.attempts,
            }),
        }
    }
}

/// Retry/salvage state machine over an [`InferenceBackend`]
pub struct StructuredClient {
    backend: Arc<dyn InferenceBackend>,
    policy: RetryPolicy,
}

impl StructuredClient {
    pub fn new(backend: Arc<dyn InferenceBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run attempts in sequence until one yields a result or none remain
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationReport {
        let max_attempts = self.policy.attempts();
        let mut budgets = Vec::with_capacity(max_attempts as usize);
        let mut failure = REASON_EXHAUSTED;

        for attempt in 0..max_attempts {
            let budget = self.policy.budget(request.profile.token_budget, attempt);
            budgets.push(budget);
            let has_next = attempt + 1 < max_attempts;

            debug!(
                model = %request.model,
                attempt = attempt + 1,
                budget,
                structured = request.schema.is_some(),
                "Inference attempt"
            );

            let response = match self.backend.complete(&request.call(attempt, budget)).await {
                Ok(response) if response.status != ResponseStatus::Other => response,
                Ok(response) => {
                    metrics::record_generation_attempt(&request.model, "error");
                    warn!(
                        attempt = attempt + 1,
                        status = ?response.status,
                        "Inference returned unusable status"
                    );
                    failure = REASON_EXHAUSTED;
                    if has_next {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                    continue;
                }
                Err(e) => {
                    metrics::record_generation_attempt(&request.model, "error");
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "Inference request failed"
                    );
                    failure = REASON_EXHAUSTED;
                    if has_next {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                    continue;
                }
            };

            let text = response.text();

            if response.status == ResponseStatus::Incomplete {
                metrics::record_generation_attempt(&request.model, "incomplete");
                if let Some(schema) = &request.schema {
                    if let Some(record) = salvage(&text, schema) {
                        info!(attempt = attempt + 1, "Salvaged truncated structured output");
                        self.report_violations(&record, schema);
                        return self.finish(request, GenerationResult::Salvaged(record), attempt + 1, budgets);
                    }
                }
                warn!(attempt = attempt + 1, budget, "Inference output truncated");
                failure = REASON_UNSALVAGEABLE;
                continue;
            }

            let Some(schema) = &request.schema else {
                metrics::record_generation_attempt(&request.model, "complete");
                let output = GenerationOutput::Text(text.trim().to_string());
                return self.finish(request, GenerationResult::Complete(output), attempt + 1, budgets);
            };

            match parse_record(&text, schema) {
                Some(record) => {
                    metrics::record_generation_attempt(&request.model, "complete");
                    self.report_violations(&record, schema);
                    let output = GenerationOutput::Record(record);
                    return self.finish(request, GenerationResult::Complete(output), attempt + 1, budgets);
                }
                None => {
                    metrics::record_generation_attempt(&request.model, "unparseable");
                    warn!(
                        attempt = attempt + 1,
                        schema = schema.name(),
                        "Structured output failed to parse"
                    );
                    failure = REASON_UNPARSEABLE;
                }
            }
        }

        self.finish(
            request,
            GenerationResult::Failed(failure.to_string()),
            max_attempts,
            budgets,
        )
    }

    fn report_violations(&self, record: &Value, schema: &Schema) {
        let violations = validate_deep(record, schema);
        if !violations.is_empty() {
            debug!(
                schema = schema.name(),
                count = violations.len(),
                first = %violations[0].field,
                "Structured output outside schema bounds"
            );
        }
    }

    fn finish(
        &self,
        request: &GenerationRequest,
        result: GenerationResult,
        attempts: u32,
        budgets: Vec<u32>,
    ) -> GenerationReport {
        metrics::record_generation_result(&request.model, result.label(), attempts);
        if let GenerationResult::Failed(reason) = &result {
            warn!(model = %request.model, attempts, reason = %reason, "Generation failed");
        }
        GenerationReport {
            result,
            attempts,
            budgets,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{profile, transport_error, ScriptedBackend};
    use super::*;
    use crate::schema::{SchemaBounds, SchemaKind, SCHEMA_VERSION};
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Instant;

    const BASE: u32 = 4000;

    fn policy(backoff: Duration) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            budget_step: 1000,
            backoff,
        }
    }

    fn request(schema: Option<SchemaKind>) -> GenerationRequest {
        GenerationRequest {
            system_prompt: "You write research proposals.".to_string(),
            user_prompt: "Propose something.".to_string(),
            schema: schema.map(|kind| Schema {
                kind,
                version: SCHEMA_VERSION,
                bounds: SchemaBounds {
                    min_length: 5,
                    max_length: 100,
                },
            }),
            model: "gpt-5-mini".to_string(),
            profile: profile(BASE),
        }
    }

    fn proposal_json() -> String {
        json!({
            "title": "X", "need": "Y", "solution": "S",
            "differentiation": "D", "benefit": "B",
            "experimental_overview": null, "materials": null,
        })
        .to_string()
    }

    fn client(backend: Arc<ScriptedBackend>, backoff: Duration) -> StructuredClient {
        StructuredClient::new(backend, policy(backoff))
    }

    #[test]
    fn test_budget_schedule() {
        let p = policy(Duration::ZERO);
        assert_eq!(p.budget(BASE, 0), 4000);
        assert_eq!(p.budget(BASE, 1), 5000);
        assert_eq!(p.budget(BASE, 2), 6000);
    }

    #[tokio::test]
    async fn test_unsalvageable_truncation_retries_with_larger_budget() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(InferenceResponse::incomplete(r#"{"title":"X","need":"Y"#)),
            Ok(InferenceResponse::completed(proposal_json())),
        ]));
        let client = client(backend.clone(), Duration::from_secs(10));

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            client.generate(&request(Some(SchemaKind::Proposal))),
        )
        .await
        .expect("incomplete responses must not back off");

        assert_eq!(report.attempts, 2);
        assert_eq!(report.budgets, vec![BASE, BASE + 1000]);
        match report.result {
            GenerationResult::Complete(GenerationOutput::Record(record)) => {
                assert_eq!(record["title"], "X");
            }
            other => panic!("unexpected result {:?}", other),
        }

        let calls = backend.calls();
        assert_eq!(calls[1].max_output_tokens, BASE + 1000);
        assert_eq!(calls[1].attempt, 1);
        assert!(calls[0].json_schema.as_ref().is_some_and(|f| f.strict));
    }

    #[tokio::test]
    async fn test_salvage_returns_without_retry() {
        let truncated = format!("{} {{\"materials\": [{{\"name\": \"Zn", proposal_json());
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(InferenceResponse::incomplete(truncated))]));

        let report = client(backend.clone(), Duration::ZERO)
            .generate(&request(Some(SchemaKind::Proposal)))
            .await;

        assert!(matches!(report.result, GenerationResult::Salvaged(_)));
        assert_eq!(report.attempts, 1);
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_free_text_truncation_is_never_salvaged() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(InferenceResponse::incomplete(proposal_json())),
            Ok(InferenceResponse::incomplete(proposal_json())),
            Ok(InferenceResponse::incomplete(proposal_json())),
        ]));

        let report = client(backend, Duration::ZERO).generate(&request(None)).await;

        assert_eq!(report.result, GenerationResult::Failed(REASON_UNSALVAGEABLE.to_string()));
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn test_free_text_is_trimmed() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(InferenceResponse::completed(
            "  MOFs degrade in humid air [1].\n",
        ))]));

        let report = client(backend, Duration::ZERO).generate(&request(None)).await;

        assert_eq!(
            report.result,
            GenerationResult::Complete(GenerationOutput::Text("MOFs degrade in humid air [1].".to_string()))
        );
    }

    #[tokio::test]
    async fn test_transport_errors_back_off_then_exhaust() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(transport_error()),
            Err(transport_error()),
            Err(transport_error()),
        ]));
        let backoff = Duration::from_millis(20);

        let started = Instant::now();
        let report = client(backend.clone(), backoff).generate(&request(None)).await;

        assert_eq!(report.result, GenerationResult::Failed(REASON_EXHAUSTED.to_string()));
        assert_eq!(report.attempts, 3);
        assert_eq!(backend.calls().len(), 3);
        // Two waits: none after the final attempt
        assert!(started.elapsed() >= backoff * 2);
    }

    #[tokio::test]
    async fn test_error_then_success() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(transport_error()),
            Ok(InferenceResponse::completed("answer")),
        ]));

        let report = client(backend, Duration::ZERO).generate(&request(None)).await;

        assert_eq!(report.attempts, 2);
        assert_eq!(report.into_output().unwrap(), GenerationOutput::Text("answer".to_string()));
    }

    #[tokio::test]
    async fn test_unparseable_structured_output_fails() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(InferenceResponse::completed("not json")),
            Ok(InferenceResponse::completed(r#"{"title":"only"}"#)),
            Ok(InferenceResponse::completed("[]")),
        ]));

        let report = client(backend, Duration::ZERO)
            .generate(&request(Some(SchemaKind::Proposal)))
            .await;

        assert_eq!(report.result, GenerationResult::Failed(REASON_UNPARSEABLE.to_string()));
        let err = report.into_output().unwrap_err();
        assert!(matches!(err, AppError::Generation { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_zero_max_retries_still_makes_one_attempt() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(InferenceResponse::completed("ok"))]));
        let client = StructuredClient::new(
            backend,
            RetryPolicy {
                max_retries: 0,
                ..RetryPolicy::default()
            },
        );

        let report = client.generate(&request(None)).await;
        assert_eq!(report.attempts, 1);
    }

    proptest! {
        #[test]
        fn prop_budget_strictly_increases(
            base in 1u32..100_000,
            step in 0u32..5_000,
            attempts in 1u32..8,
        ) {
            let backend = Arc::new(ScriptedBackend::new(
                (0..attempts).map(|_| Ok(InferenceResponse::incomplete("cut"))).collect(),
            ));
            let client = StructuredClient::new(
                backend,
                RetryPolicy { max_retries: attempts, budget_step: step, backoff: Duration::ZERO },
            );
            let mut req = request(None);
            req.profile = profile(base);

            let report = tokio_test::block_on(client.generate(&req));

            prop_assert_eq!(report.budgets.len(), attempts as usize);
            prop_assert_eq!(report.budgets[0], base);
            for pair in report.budgets.windows(2) {
                prop_assert!(pair[1] > pair[0]);
            }
        }
    }
}
