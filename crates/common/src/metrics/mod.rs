//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the retrieval and generation pipeline
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ProposalForge metrics
pub const METRICS_PREFIX: &str = "proposalforge";

/// Buckets for pipeline latency (LLM calls dominate)
pub const PIPELINE_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 1m
    120.0,  // 2m
    300.0,  // 5m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Dispatch metrics
    describe_counter!(
        format!("{}_dispatch_total", METRICS_PREFIX),
        Unit::Count,
        "Total pipeline dispatches by mode and outcome"
    );

    describe_histogram!(
        format!("{}_dispatch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end pipeline latency in seconds"
    );

    // Retrieval metrics
    describe_counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total semantic index queries"
    );

    describe_counter!(
        format!("{}_retrieval_passages_total", METRICS_PREFIX),
        Unit::Count,
        "Passages kept after merge and truncation"
    );

    // Generation metrics
    describe_counter!(
        format!("{}_generation_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "Inference calls by attempt outcome"
    );

    describe_counter!(
        format!("{}_generation_results_total", METRICS_PREFIX),
        Unit::Count,
        "Generation requests by final result"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record one pipeline dispatch
pub struct DispatchMetrics {
    start: Instant,
    mode: String,
}

impl DispatchMetrics {
    /// Start tracking a dispatch
    pub fn start(mode: &str) -> Self {
        Self {
            start: Instant::now(),
            mode: mode.to_string(),
        }
    }

    /// Record dispatch completion
    pub fn finish(self, outcome: &str) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_dispatch_total", METRICS_PREFIX),
            "mode" => self.mode.clone(),
            "outcome" => outcome.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_dispatch_duration_seconds", METRICS_PREFIX),
            "mode" => self.mode
        )
        .record(duration);
    }
}

/// Helper to record retrieval metrics
pub fn record_retrieval(index: &str, queries: usize, passages: usize) {
    counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        "index" => index.to_string()
    )
    .increment(queries as u64);

    counter!(
        format!("{}_retrieval_passages_total", METRICS_PREFIX),
        "index" => index.to_string()
    )
    .increment(passages as u64);
}

/// Helper to record a single inference attempt
pub fn record_generation_attempt(model: &str, outcome: &str) {
    counter!(
        format!("{}_generation_attempts_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Helper to record the final result of a generation request
pub fn record_generation_result(model: &str, result: &str, attempts: u32) {
    counter!(
        format!("{}_generation_results_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "result" => result.to_string(),
        "attempts" => attempts.to_string()
    )
    .increment(1);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}
