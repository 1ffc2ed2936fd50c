use crate::api::api_error::APIError;
use crate::api::model::{RenewResult, StatusResult};
use crate::api::server::AppState;
use crate::error::Error;
use crate::notify::CERTIFICATE_RENEWED;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the admin API router. `/ssl/renew` is added after the timeout layer so a forced
/// renewal is never cut short.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/ssl/status", get(ssl_status))
        .route("/sse", get(sse))
        .layer(TimeoutLayer::new(state.config.api_timeout))
        .route("/ssl/renew", post(renew))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[allow(clippy::unused_async)]
async fn health_check() -> impl IntoResponse {
    Json(json!({"ok":"healthy"}))
}

#[allow(clippy::unused_async)]
async fn ssl_status(State(state): State<AppState>) -> Json<StatusResult> {
    let status = state
        .scheduler
        .current()
        .status(state.config.renewal_threshold_days, state.clock.now());
    Json(StatusResult::new(
        &state.config.domain,
        status,
        state.scheduler.state(),
    ))
}

async fn renew(State(state): State<AppState>) -> Result<Json<RenewResult>, APIError> {
    tracing::info!("forced renewal requested");
    if !state.scheduler.force_renewal().await {
        return Err(Error::RenewalFailed.into());
    }
    let record = state
        .scheduler
        .current()
        .load()
        .ok_or(Error::RenewalFailed)?;
    Ok(Json(RenewResult {
        message: "renewed",
        not_before: record.not_before,
        not_after: record.not_after,
    }))
}

#[allow(clippy::unused_async)]
async fn sse(State(state): State<AppState>) -> impl IntoResponse {
    let events = BroadcastStream::new(state.notifier.subscribe()).filter_map(|msg| match msg {
        Ok(renewed) => Some(
            Event::default()
                .event(CERTIFICATE_RENEWED)
                .json_data(renewed),
        ),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::debug!(skipped, "SSE client lagging, events dropped");
            None
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
