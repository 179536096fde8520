use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use serde::Serialize;
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;

use crate::app::order_notifier::NotifierSnapshot;
use crate::http::AppError;
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    notifier_running: bool,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db = state.db.ping().await.is_ok();
    let notifier_running = state.notifier.is_running();
    let status = if db { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        notifier_running,
    })
}

/// Server-sent stream of dashboard alerts (`toast` and `chime` events).
pub async fn alert_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.alerts.subscribe();
    tracing::debug!(
        listeners = state.alerts.listener_count(),
        "dashboard connected to alert stream"
    );

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                    Ok(sse) => return Some((Ok::<_, Infallible>(sse), receiver)),
                    Err(err) => tracing::error!(error = ?err, "failed to encode alert event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "alert stream lagging, skipping ahead");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

pub async fn notifier_status(State(state): State<AppState>) -> Json<NotifierSnapshot> {
    Json(state.notifier.snapshot())
}

pub async fn restart_notifier(State(state): State<AppState>) -> Json<NotifierSnapshot> {
    tracing::info!("notifier restart requested");
    state.start_notifier();
    Json(state.notifier.snapshot())
}

pub async fn stop_notifier(State(state): State<AppState>) -> Json<NotifierSnapshot> {
    tracing::info!("notifier stop requested");
    state.notifier.stop();
    Json(state.notifier.snapshot())
}

pub async fn not_found() -> AppError {
    AppError::not_found("route not found")
}
