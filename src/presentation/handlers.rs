// HTTP request handlers
use crate::application::current_values::CurrentValues;
use crate::application::session::SessionStatus;
use crate::application::session_runner::SessionGone;
use crate::domain::channel::Channel;
use crate::domain::render::Scene;
use crate::infrastructure::scene_stream::sse_from_watch;
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct ResizeRequest {
    pub width: f64,
    pub height: f64,
}

#[derive(Serialize)]
pub struct ToggleResponse {
    pub channel: Channel,
    pub visible: bool,
}

fn unavailable(e: SessionGone) -> StatusCode {
    tracing::error!(error = %e, "Session task unavailable");
    StatusCode::SERVICE_UNAVAILABLE
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Latest scene as drawn so far
pub async fn get_chart(State(state): State<Arc<AppState>>) -> Json<Scene> {
    Json(state.scene.borrow().clone())
}

/// Follow the scene as server-sent events; the stream closes on shutdown.
pub async fn stream_chart(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    sse_from_watch(state.scene.clone(), state.shutdown.clone())
}

pub async fn chart_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionStatus>, StatusCode> {
    state.session.status().await.map(Json).map_err(unavailable)
}

pub async fn current_values(State(state): State<Arc<AppState>>) -> Json<CurrentValues> {
    Json(state.current_values.get())
}

pub async fn start_chart(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionStatus>, StatusCode> {
    state.session.start().await.map_err(unavailable)?;
    chart_status(State(state)).await
}

pub async fn stop_chart(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionStatus>, StatusCode> {
    state.session.stop().await.map_err(unavailable)?;
    chart_status(State(state)).await
}

pub async fn restart_chart(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionStatus>, StatusCode> {
    state.session.restart().await.map_err(unavailable)?;
    chart_status(State(state)).await
}

pub async fn toggle_channel(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ToggleResponse>, StatusCode> {
    let channel: Channel = id.parse().map_err(|e| {
        tracing::debug!(error = %e, "Toggle for unknown channel");
        StatusCode::NOT_FOUND
    })?;

    let visible = state
        .session
        .toggle_channel(channel)
        .await
        .map_err(unavailable)?;
    Ok(Json(ToggleResponse { channel, visible }))
}

/// Resizes are debounced by the session task, so this only acknowledges.
pub async fn resize_chart(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResizeRequest>,
) -> StatusCode {
    let valid = [request.width, request.height]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0);
    if !valid {
        return StatusCode::UNPROCESSABLE_ENTITY;
    }

    match state.session.resize(request.width, request.height).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => unavailable(e),
    }
}

pub async fn clear_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.session.clear_cache().await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => unavailable(e),
    }
}

/// Publish a raw payload onto the signal topic. The body is forwarded as is;
/// malformed readings are dropped on the receiving side.
pub async fn publish_signal(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    match state.session.publish(body).await {
        Ok(Ok(())) => StatusCode::ACCEPTED,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Signal publish rejected");
            StatusCode::BAD_GATEWAY
        }
        Err(e) => unavailable(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::current_values::CurrentValueMirror;
    use crate::application::session_runner;
    use crate::application::shutdown;

    /// State whose session task never runs; only handlers that fail fast or
    /// never touch the session are exercised here.
    fn detached_state() -> Arc<AppState> {
        let (session, commands) = session_runner::channel();
        drop(commands);
        let (_tx, scene) = tokio::sync::watch::channel(Scene::default());
        let (_trigger, shutdown) = shutdown::channel();
        Arc::new(AppState {
            session,
            scene,
            current_values: CurrentValueMirror::new(CurrentValues::default()),
            shutdown,
        })
    }

    #[tokio::test]
    async fn test_unknown_channel_is_not_found() {
        let result = toggle_channel(Path("uv999".to_string()), State(detached_state())).await;
        assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_gone_session_is_unavailable() {
        let state = detached_state();
        assert_eq!(clear_cache(State(state.clone())).await, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            chart_status(State(state)).await.err(),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[tokio::test]
    async fn test_resize_rejects_degenerate_sizes() {
        let request = ResizeRequest {
            width: 0.0,
            height: f64::NAN,
        };
        let status = resize_chart(State(detached_state()), Json(request)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
