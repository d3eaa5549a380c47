//! ==============================================================================
//! server.rs - dashboard json api
//! ==============================================================================
//!
//! routes:
//!     GET  /api                  -> current snapshot
//!     POST /api/mode             {"mode": "auto" | "manual"}
//!     POST /api/actuators/:key   {"isOn": bool}
//!     POST /api/actuators        {"isOn": bool}  (all actuators)
//!
//! status codes:
//!     429 rate limited, 502 store write failed, 503 engine stopped,
//!     404 unknown actuator
//!
//! relationships:
//!     - uses: engine.rs (SyncEngine is the router state)
//!     - started by: main.rs
//!
//! ==============================================================================

use crate::domain::{ActuatorKey, Mode, Snapshot};
use crate::engine::SyncEngine;
use crate::error::SyncError;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

pub fn router(engine: SyncEngine) -> Router {
    Router::new()
        .route("/api", get(api_handler))
        .route("/api/mode", post(mode_handler))
        .route("/api/actuators", post(all_actuators_handler))
        .route("/api/actuators/:key", post(actuator_handler))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

/// bind `addr` and serve until the listener fails
pub async fn run_server(addr: &str, engine: SyncEngine) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("[SERVER] Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

// ==============================================================================
// handlers
// ==============================================================================

/// current snapshot as json
async fn api_handler(State(engine): State<SyncEngine>) -> Json<Snapshot> {
    Json(engine.snapshot())
}

#[derive(Deserialize)]
struct ModeBody {
    mode: Mode,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchBody {
    is_on: bool,
}

async fn mode_handler(
    State(engine): State<SyncEngine>,
    Json(body): Json<ModeBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    engine.set_mode(body.mode).await?;
    Ok(Json(json!({"status": "ok", "mode": body.mode})))
}

async fn actuator_handler(
    State(engine): State<SyncEngine>,
    Path(key): Path<String>,
    Json(body): Json<SwitchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = ActuatorKey::parse(&key).ok_or(ApiError::UnknownActuator(key))?;
    engine.set_actuator(key, body.is_on).await?;
    Ok(Json(json!({"status": "ok", "actuator": key, "isOn": body.is_on})))
}

async fn all_actuators_handler(
    State(engine): State<SyncEngine>,
    Json(body): Json<SwitchBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    engine.set_all_actuators(body.is_on).await?;
    Ok(Json(json!({"status": "ok", "isOn": body.is_on})))
}

// ==============================================================================
// errors
// ==============================================================================

pub enum ApiError {
    UnknownActuator(String),
    Sync(SyncError),
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError::Sync(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::UnknownActuator(key) => (
                StatusCode::NOT_FOUND,
                json!({"status": "error", "message": format!("unknown actuator: {}", key)}),
            ),
            ApiError::Sync(SyncError::RateLimited { retry_after }) => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "status": "error",
                    "message": "rate limited",
                    "retryAfterMs": retry_after.as_millis() as u64,
                }),
            ),
            ApiError::Sync(SyncError::Stopped) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"status": "error", "message": "sync engine stopped"}),
            ),
            ApiError::Sync(e) => (
                StatusCode::BAD_GATEWAY,
                json!({"status": "error", "message": e.to_string()}),
            ),
        };
        (status, Json(body)).into_response()
    }
}
