//! Printer connection and control handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::error::{PreconditionError, VinciError};
use crate::session::{Session, SessionState};
use crate::transport;

use super::super::state::AppState;
use super::{ApiError, success};

/// GET /api/ports - List serial ports, likely printers first.
pub async fn ports() -> Result<Json<Value>, ApiError> {
    let ports = tokio::task::spawn_blocking(transport::list_ports)
        .await?
        .map_err(VinciError::from)?;
    Ok(success(json!({ "ports": ports })))
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub port: String,
}

/// POST /api/connect - Connect to a printer, replacing any current session.
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.port.trim().is_empty() {
        return Err(ApiError::bad_request("port cannot be empty"));
    }
    let previous = state.session.write().await.take();
    let config = state.config.session.clone();
    let port = req.port.clone();
    let session = tokio::task::spawn_blocking(move || {
        if let Some(old) = previous {
            old.disconnect();
        }
        Session::connect(&port, config)
    })
    .await??;

    let status = session.status();
    let model = session.model();
    info!(port = %req.port, model = session.model_id(), "printer connected over HTTP");
    *state.session.write().await = Some(Arc::new(session));
    Ok(success(json!({
        "port": req.port,
        "model_id": status.model_id,
        "model": model,
        "status": *status,
    })))
}

/// POST /api/disconnect - Always succeeds.
pub async fn disconnect(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    if let Some(session) = state.session.write().await.take() {
        tokio::task::spawn_blocking(move || session.disconnect()).await?;
    }
    Ok(success(json!({ "message": "disconnected" })))
}

/// GET /api/status - Latest snapshot, session state and job progress.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let job = state.job().clone();
    let Some(session) = state.session().await else {
        return success(json!({
            "connected": false,
            "state": SessionState::Disconnected,
            "job": job,
        }));
    };
    let snapshot = session.status();
    success(json!({
        "connected": !matches!(session.state(), SessionState::Disconnected | SessionState::Error),
        "port": session.port(),
        "state": session.state(),
        "failure": session.failure(),
        "model": session.model(),
        "state_name": snapshot.state_name(),
        "status": *snapshot,
        "job": job,
    }))
}

/// POST /api/control/:action - home, load, unload, pause, resume, cancel.
pub async fn control(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state.session().await.ok_or(PreconditionError::NotConnected)?;
    let op: fn(&Session) -> Result<(), VinciError> = match action.as_str() {
        "home" => Session::home,
        "load" | "load_filament" => Session::load_filament,
        "unload" | "unload_filament" => Session::unload_filament,
        "pause" => Session::pause,
        "resume" => Session::resume,
        "cancel" => Session::cancel,
        other => return Err(ApiError::bad_request(format!("unknown action {other:?}"))),
    };
    tokio::task::spawn_blocking(move || op(&session)).await??;
    Ok(success(json!({ "message": format!("{action} sent") })))
}
