//! ProposalForge Context Engine service
//!
//! Builds the pipeline once from configuration and serves it over HTTP.

use anyhow::Context as _;
use metrics_exporter_prometheus::PrometheusBuilder;
use proposalforge_common::config::{LayeredConfigSource, ObservabilityConfig};
use proposalforge_common::metrics::{self, PIPELINE_BUCKETS};
use proposalforge_common::{AppConfig, ConfigSource, VERSION};
use proposalforge_context::generation::{OpenAiResponsesBackend, RetryPolicy, StructuredClient};
use proposalforge_context::query_set::{QueryExpander, QueryExpanderConfig};
use proposalforge_context::retrieval::{CachedIndex, HttpSemanticIndex, SemanticIndex};
use proposalforge_context::server::{self, AppState};
use proposalforge_context::Pipeline;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let source = Arc::new(LayeredConfigSource::new());
    let config = source.snapshot().context("failed to load configuration")?;

    init_tracing(&config.observability);
    info!(
        service = %config.observability.service_name,
        "Starting ProposalForge Context Engine v{}", VERSION
    );

    // Metrics exporter
    if config.observability.metrics_port > 0 {
        PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port)))
            .add_global_label("service", config.observability.service_name.clone())
            .set_buckets(PIPELINE_BUCKETS)?
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(port = config.observability.metrics_port, "Metrics exporter listening");
    }
    metrics::register_metrics();

    let pipeline = build_pipeline(&config, source.clone())?;

    let state = AppState {
        pipeline: Arc::new(pipeline),
        request_timeout: config.request_timeout(),
    };
    let app = server::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let outcome = server::serve(listener, app, shutdown_signal(), config.shutdown_timeout()).await?;

    info!(?outcome, "Context Engine shutdown complete");
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_pipeline(config: &AppConfig, source: Arc<dyn ConfigSource>) -> anyhow::Result<Pipeline> {
    let retrieval = &config.retrieval;
    let cache_ttl = Duration::from_secs(retrieval.cache_ttl_secs);
    let timeout = Duration::from_secs(retrieval.timeout_secs);

    let primary_url = retrieval
        .primary_index_url
        .as_deref()
        .context("retrieval.primary_index_url is not configured")?;
    let primary = build_index("primary", primary_url, timeout, cache_ttl)?;

    // Validate the active model up front; later changes are picked up per call
    config.active_model_profile()?;

    let backend = OpenAiResponsesBackend::new(config.llm.endpoint.clone(), config.llm.api_key.clone())?;
    let client = StructuredClient::new(Arc::new(backend), RetryPolicy::from_config(&config.llm));

    let expander = QueryExpander::new(QueryExpanderConfig {
        enable_expansion: retrieval.max_expansions > 0,
        max_expansions: retrieval.max_expansions,
    });

    let mut pipeline = Pipeline::new(source, primary, client).with_expander(expander);

    match retrieval.secondary_index_url.as_deref() {
        Some(url) => {
            pipeline = pipeline.with_secondary(build_index("secondary", url, timeout, cache_ttl)?);
        }
        None => warn!("No secondary index configured; modes that need one will fail"),
    }

    info!(
        model = %config.llm.model,
        max_retries = config.llm.max_retries,
        "Pipeline ready"
    );
    Ok(pipeline)
}

fn build_index(
    name: &str,
    url: &str,
    timeout: Duration,
    cache_ttl: Duration,
) -> anyhow::Result<Arc<dyn SemanticIndex>> {
    let index = HttpSemanticIndex::new(name, url, timeout)?;
    if cache_ttl.is_zero() {
        return Ok(Arc::new(index));
    }
    Ok(Arc::new(CachedIndex::new(index, cache_ttl)))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
