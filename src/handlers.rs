use std::{convert::Infallible, time::Instant};

use axum::{
    extract::{Path, Query, State},
    http::header::CONTENT_TYPE,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    engine::{orchestrate, EmitMode},
    errors::AppError,
    models::{CancelResponse, RewriteRequest, RewriteResponse, StreamEvent},
    state::AppState,
};

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(error) => AppError::Internal(format!("metrics render failed: {error}")).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub example_format: bool,
}

pub async fn rewrite(State(state): State<AppState>, Json(request): Json<RewriteRequest>) -> Response {
    let started = Instant::now();
    let response = match process_rewrite(&state, request).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    };
    state.metrics.observe_request(
        "/rewrite",
        "POST",
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

async fn process_rewrite(state: &AppState, request: RewriteRequest) -> Result<Response, AppError> {
    let normalized = request.into_normalized().map_err(AppError::BadRequest)?;
    info!(
        request_id = %normalized.request_id,
        styles = ?normalized.styles,
        chars = normalized.input_text.chars().count(),
        "rewrite request accepted"
    );

    let results = state
        .service
        .rephrase_all_full(&normalized.styles, &normalized.input_text)
        .await
        .map_err(|error| {
            state.metrics.observe_backend_error("rewrite_full");
            AppError::from(error)
        })?;

    Ok(Json(RewriteResponse {
        request_id: normalized.request_id,
        results,
    })
    .into_response())
}

pub async fn rewrite_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
    Json(request): Json<RewriteRequest>,
) -> Response {
    let started = Instant::now();
    let response = match start_stream(&state, params, request) {
        Ok(response) => response,
        Err(error) => error.into_response(),
    };
    state.metrics.observe_request(
        "/rewrite/stream",
        "POST",
        response.status().as_u16(),
        started.elapsed(),
    );
    response
}

fn start_stream(
    state: &AppState,
    params: StreamParams,
    request: RewriteRequest,
) -> Result<Response, AppError> {
    let normalized = request.into_normalized().map_err(AppError::BadRequest)?;
    let mode = if params.example_format {
        EmitMode::Staged
    } else {
        EmitMode::Direct
    };
    info!(
        request_id = %normalized.request_id,
        styles = ?normalized.styles,
        mode = ?mode,
        "rewrite stream accepted"
    );

    let guard = state.cancels.create(&normalized.request_id);
    let events = orchestrate(
        state.service.clone(),
        normalized,
        Some(guard),
        mode,
        state.pacing,
    );

    let stream_guard = state.metrics.stream_guard();
    let metrics = state.metrics.clone();
    let outbound = events.map(move |event| {
        let _keep_open = &stream_guard;
        if matches!(event, StreamEvent::StyleError { .. }) {
            metrics.observe_backend_error("rewrite_stream");
        }
        Ok::<Event, Infallible>(Event::default().event(event.name()).data(event.payload()))
    });

    Ok(Sse::new(outbound)
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(10)))
        .into_response())
}

pub async fn cancel_rewrite(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = state.cancels.signal(&request_id);
    info!(request_id = %request_id, cancelled, "cancellation requested");
    Json(CancelResponse {
        request_id,
        cancelled,
    })
}
