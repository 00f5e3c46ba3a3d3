// HTTP front of the session registry.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, info};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use super::{SessionRecord, SessionRegistry};
use crate::PitwallError;
use crate::telemetry::stint::StintSummary;

pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/telemetry", post(receive_telemetry))
        .route("/session/:session_id", get(get_session))
        .route("/session/:session_id/stints", get(get_stints))
        .with_state(registry)
}

async fn health() -> Json<Value> {
    Json(json!({ "message": "Session registry running" }))
}

async fn receive_telemetry(
    State(registry): State<Arc<SessionRegistry>>,
    Json(record): Json<SessionRecord>,
) -> Json<Value> {
    debug!(
        "Received lap {} from {} for session {}",
        record.lap, record.driver, record.session_id
    );
    registry.append(record);
    Json(json!({ "status": "ok" }))
}

async fn get_session(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
) -> Json<Vec<SessionRecord>> {
    Json(registry.session(&session_id))
}

async fn get_stints(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
) -> Json<Vec<StintSummary>> {
    Json(registry.stints(&session_id))
}

/// Serve the registry until `shutdown` resolves or the listener fails.
pub async fn serve<F>(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    shutdown: F,
) -> Result<(), PitwallError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Session registry listening on {addr}");
    }
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| PitwallError::RegistryServeError { source: e })?;
    info!("Session registry stopped");
    Ok(())
}

pub async fn bind(bind: &str) -> Result<TcpListener, PitwallError> {
    TcpListener::bind(bind)
        .await
        .map_err(|e| PitwallError::RegistryBindError {
            bind: bind.to_string(),
            source: e,
        })
}
