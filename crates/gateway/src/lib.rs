//! HTTP gateway for storyloom.
//!
//! Exposes health, model listing, streamed chat turns and thread deletion.
//! Chat output is streamed as raw bytes exactly as the model produces it;
//! thread and turn ids travel in response headers so a client knows them
//! before the first byte arrives.
//!
//! Built on Axum for high performance async HTTP.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    http::{HeaderName, Method, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use storyloom_agent::ChatService;
use storyloom_core::{Error, RepositoryError};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Response header carrying the thread id.
pub const THREAD_ID_HEADER: &str = "x-thread-id";
/// Response header carrying the assistant turn id.
pub const TURN_ID_HEADER: &str = "x-turn-id";
/// Response header carrying the thread title.
pub const THREAD_TITLE_HEADER: &str = "x-thread-title";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub chat: ChatService,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - CORS open to any origin, exposing the id headers
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([
            HeaderName::from_static(THREAD_ID_HEADER),
            HeaderName::from_static(TURN_ID_HEADER),
            HeaderName::from_static(THREAD_TITLE_HEADER),
        ])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api::api_router())
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: storyloom_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let chat = storyloom_agent::build_chat_service(&config).await?;
    let models = chat.router().list().len();
    let state = Arc::new(GatewayState { chat });

    let app = build_router(state);

    info!(addr = %addr, models, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// --- Errors ---

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// An error rendered as a JSON body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Repository(RepositoryError::NotFound { .. }) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %err, "Request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}
