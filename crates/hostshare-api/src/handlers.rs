//! HTTP handlers: read-only JSON views of the shared node set.
//!
//! Every body is an [`Envelope`]. Non-GET methods are refused by
//! [`require_get`] before routing, so a POST to an unknown path is a 405,
//! not a 404.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use hostshare_core::wire::{HealthPayload, NodesPayload};
use hostshare_core::{now_ms, DeviceInfo, Envelope};
use hostshare_services::SharedNodeStore;

#[derive(Clone)]
pub struct ApiState {
    pub device: Arc<DeviceInfo>,
    pub nodes: SharedNodeStore,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(&'static str),
    MethodNotAllowed,
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::NotFound(message) => message,
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "share handler failed");
                "Internal Server Error"
            }
        };
        (status, Json(Envelope::<()>::err(status.as_u16(), message))).into_response()
    }
}

type ApiResult = Result<Json<Envelope<serde_json::Value>>, ApiError>;

fn respond<T: Serialize>(data: T) -> ApiResult {
    let value = serde_json::to_value(data).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(Envelope::ok(value)))
}

// ── /nodes ────────────────────────────────────────────────────────────────────

pub async fn handle_nodes(State(state): State<ApiState>) -> ApiResult {
    respond(NodesPayload {
        nodes: state.nodes.list(),
        owner: (*state.device).clone(),
        timestamp: now_ms(),
    })
}

// ── /node/{id} ────────────────────────────────────────────────────────────────

pub async fn handle_node(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let node = state
        .nodes
        .get(&id)
        .ok_or(ApiError::NotFound("Node not found"))?;
    respond(node)
}

// ── /health ───────────────────────────────────────────────────────────────────

pub async fn handle_health(State(state): State<ApiState>) -> ApiResult {
    respond(HealthPayload {
        status: "online".to_string(),
        timestamp: now_ms(),
        device: (*state.device).clone(),
        shared_count: state.nodes.len(),
    })
}

pub async fn handle_not_found() -> ApiError {
    ApiError::NotFound("Not Found")
}

/// Refuse anything but GET (OPTIONS is answered by the CORS layer outside
/// this one) and advertise the allowed methods on every response.
pub async fn require_get(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::GET {
        next.run(req).await
    } else {
        tracing::debug!(method = %req.method(), uri = %req.uri(), "rejected method");
        ApiError::MethodNotAllowed.into_response()
    };

    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type"),
    );
    response
}
