//! HTTP surface of the context service

use crate::modes::{DispatchArgs, ModeProfile, Pipeline, PipelineOutcome};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use proposalforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::warn;
use validator::Validate;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub request_timeout: Duration,
}

/// Ask request
#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(length(min = 1, max = 64))]
    pub mode: String,

    #[validate(length(min = 1, max = 4000))]
    pub question: String,

    /// Overrides the mode's default passage count
    #[validate(range(min = 1, max = 100))]
    pub k: Option<usize>,

    /// Record being revised
    pub previous: Option<Value>,

    #[validate(length(max = 8000))]
    pub feedback: Option<String>,

    /// Model override
    pub model: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ModesResponse {
    pub modes: Vec<ModeProfile>,
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        .route("/modes", get(list_modes))
        .route("/modes/{name}", get(describe_mode))
        .route("/ask", post(ask));

    Router::new()
        .route("/health", get(health))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// How the server stopped after the shutdown signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Every in-flight request finished within the grace period
    Drained,
    /// The grace period ran out with connections still open
    Forced,
}

/// Serve `app` until `signal` resolves, then give in-flight requests at
/// most `grace` to finish.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    signal: F,
    grace: Duration,
) -> std::io::Result<Shutdown>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    let deadline = async move {
        match signalled_rx.await {
            Ok(()) => tokio::time::sleep(grace).await,
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = server => result.map(|()| Shutdown::Drained),
        () = deadline => {
            warn!(grace = ?grace, "Shutdown grace period elapsed; dropping open connections");
            Ok(Shutdown::Forced)
        }
    }
}

/// Liveness check
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: proposalforge_common::VERSION.to_string(),
    })
}

pub async fn list_modes(State(state): State<AppState>) -> Json<ModesResponse> {
    Json(ModesResponse {
        modes: state.pipeline.registry().list_modes().to_vec(),
    })
}

pub async fn describe_mode(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ModeProfile>> {
    let profile = state.pipeline.registry().describe(&name)?;
    Ok(Json(profile.clone()))
}

/// Dispatch a question through a mode
pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<PipelineOutcome>> {
    request
        .validate()
        .map_err(|e| AppError::validation(e.to_string()))?;

    let args = DispatchArgs {
        k: request.k,
        previous: request.previous,
        feedback: request.feedback,
        model: request.model,
    };

    let dispatch = state.pipeline.dispatch(&request.mode, &request.question, args);
    let outcome = tokio::time::timeout(state.request_timeout, dispatch)
        .await
        .map_err(|_| AppError::Internal {
            message: format!("request exceeded {:?}", state.request_timeout),
        })??;

    Ok(Json(outcome))
}
