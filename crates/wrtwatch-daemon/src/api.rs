//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use wrtwatch_core::Mac;

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// List all tracked devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let devices = state.devices().await;
    Json(devices)
}

/// Get one device by any of its member MACs
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(mac): Path<String>,
) -> impl IntoResponse {
    let Some(mac) = Mac::parse(&mac) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(format!("Not a valid MAC address: {mac}"))),
        )
            .into_response();
    };
    match state.get_device(&mac).await {
        Some(device) => Json(device).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("Device not found")),
        )
            .into_response(),
    }
}

/// List MACs awaiting operator confirmation
pub async fn list_pending(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pending = state.pending().await;
    Json(pending)
}

/// Associate request body
#[derive(Deserialize)]
pub struct AssociateRequest {
    /// The identity to merge into
    primary_mac: String,
    /// The MAC joining it
    mac: String,
}

/// Merge a MAC into an identity
pub async fn associate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AssociateRequest>,
) -> impl IntoResponse {
    let Some(primary) = Mac::parse(&req.primary_mac) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(format!(
                "Not a valid MAC address: {}",
                req.primary_mac
            ))),
        )
            .into_response();
    };
    let Some(candidate) = Mac::parse(&req.mac) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(format!("Not a valid MAC address: {}", req.mac))),
        )
            .into_response();
    };

    info!(primary = %primary, mac = %candidate, "Association requested");

    match state.associate(&primary, &candidate).await {
        Ok(()) => Json(serde_json::json!({
            "status": "associated",
            "primary_mac": primary,
            "mac": candidate,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(format!("Association failed: {}", e))),
        )
            .into_response(),
    }
}

/// Trigger a polling cycle
pub async fn trigger_poll(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Manual poll triggered");

    match state.run_cycle().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new(format!("Poll failed: {}", e))),
        )
            .into_response(),
    }
}

/// Get current configuration (credentials redacted)
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.redacted())
}
