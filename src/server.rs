//! JSON HTTP API.
//!
//! The server is a thin shell around the command dispatcher: the session
//! travels to and from the client as a sealed token, and every response
//! carries the next token plus the view to render.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/commands` | Run one command: `{session?, command}` → `{session, view}` |
//!
//! # Error Contract
//!
//! Request-level failures use the envelope
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "session token signature mismatch" } }
//! ```
//!
//! Bodies larger than `[server].max_body_bytes` get `413` with code
//! `payload_too_large`. An expired session token is not an error: the
//! command runs against a fresh session and the login view comes back.
//!
//! Command-level failures (validation, missing repositories, provider
//! errors) are not HTTP errors; they come back as an `alert` view with
//! status 200.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::dispatch::{App, Command, View};
use crate::progress::NoProgress;
use crate::session::{Session, SessionError, SessionSealer};

#[derive(Clone)]
struct AppState {
    app: Arc<App>,
    sealer: Arc<SessionSealer>,
}

/// Serve `app` on `[server].bind` until the process is terminated.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config().server.bind.clone();
    let sealer = SessionSealer::from_secret(app.config().server.session_secret.as_deref())
        .with_ttl(app.config().server.session_ttl_secs);
    if app.config().server.session_secret.is_none() {
        tracing::info!("no session_secret configured; sessions end when the server restarts");
    }

    let router = router(Arc::new(app), Arc::new(sealer));

    println!("Server listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

pub fn router(app: Arc<App>, sealer: Arc<SessionSealer>) -> Router {
    let max_body_bytes = app.config().server.max_body_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/commands",
            post(handle_command).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { app, sealer })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn rejected(rejection: JsonRejection) -> AppError {
    let status = rejection.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "bad_request"
    };
    AppError {
        status,
        code: code.to_string(),
        message: rejection.body_text(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /commands ============

#[derive(Deserialize)]
struct CommandRequest {
    #[serde(default)]
    session: Option<String>,
    command: Command,
}

#[derive(Serialize)]
struct CommandResponse {
    session: String,
    view: View,
}

/// Open the caller's session (or start a fresh one), dispatch the command,
/// and seal the next session into the response.
async fn handle_command(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<CommandResponse>, AppError> {
    let Json(body) = body.map_err(|rejection| {
        tracing::warn!(status = %rejection.status(), "rejected request body");
        rejected(rejection)
    })?;
    let request: CommandRequest = serde_json::from_value(body)
        .map_err(|e| bad_request(format!("invalid command: {}", e)))?;

    let session = match request.session.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => match state.sealer.open(token) {
            Ok(session) => session,
            Err(e) if matches!(e.downcast_ref::<SessionError>(), Some(SessionError::Expired)) => {
                tracing::info!("session token expired");
                Session::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "rejected session token");
                return Err(bad_request(e.to_string()));
            }
        },
        None => Session::default(),
    };

    let dispatch = state.app.dispatch(session, request.command, &NoProgress).await;
    let token = state
        .sealer
        .seal(&dispatch.session)
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(CommandResponse {
        session: token,
        view: dispatch.view,
    }))
}
