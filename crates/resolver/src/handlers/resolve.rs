//! Query resolution handler

use axum::{extract::State, Json};
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use validator::Validate;

use crate::AppState;
use lexforge_common::{
    errors::{AppError, Result},
    metrics::RequestMetrics,
    models::NormLevel,
};
use lexforge_resolver::{ResolutionResult, ResolveRequest};

/// Resolve request body
#[derive(Debug, Deserialize, Validate)]
pub struct ResolveBody {
    #[validate(length(min = 1, max = 10000))]
    pub query: String,

    /// Restrict retrieval to one norm level
    #[serde(default)]
    pub norm_level: Option<NormLevel>,

    /// Candidates to retrieve (defaults to `resolution.top_k`)
    #[validate(range(min = 1, max = 100))]
    pub top_k: Option<usize>,
}

/// Resolve response
#[derive(Serialize)]
pub struct ResolveResponse {
    #[serde(flatten)]
    pub result: ResolutionResult,
    pub rule_version: u64,
    pub processing_time_ms: u64,
}

/// Resolve a legal question.
///
/// Retryable pipeline failures are retried with exponential backoff until
/// `resolution.retry_max_elapsed_ms`; the whole request is cancelled once the
/// server request timeout passes.
pub async fn resolve(
    State(state): State<AppState>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<ResolveResponse>> {
    let start = Instant::now();
    let request_metrics = RequestMetrics::start("POST", "/v1/resolve");

    let outcome = run(&state, body).await;

    let status = match &outcome {
        Ok(_) => 200,
        Err(e) => e.status_code().as_u16(),
    };
    request_metrics.finish(status);

    let (result, rule_version) = outcome?;
    Ok(Json(ResolveResponse {
        result,
        rule_version,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}

async fn run(state: &AppState, body: ResolveBody) -> Result<(ResolutionResult, u64)> {
    body.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let request = ResolveRequest {
        query: body.query,
        norm_level: body.norm_level,
        top_k: body.top_k,
    };

    let policy = ExponentialBackoff {
        max_elapsed_time: Some(state.config.resolution.retry_max_elapsed()),
        ..ExponentialBackoff::default()
    };
    let deadline = tokio::time::Instant::now() + state.config.request_timeout();
    let orchestrator = &state.orchestrator;
    let request = &request;

    retry(policy, || async move {
        orchestrator
            .resolve_until_versioned(request, tokio::time::sleep_until(deadline))
            .await
            .map_err(|e| {
                if e.is_retryable() {
                    tracing::warn!(error = %e, "Retryable resolution failure, backing off");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
    })
    .await
}
