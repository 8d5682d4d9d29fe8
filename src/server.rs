//! Same-origin relay server.
//!
//! Browsers cannot call the vector index or the document store directly
//! because of cross-origin restrictions, so the client sends every upstream
//! request to this relay instead. The relay forwards it verbatim and returns
//! the upstream response unchanged — it carries no business logic.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/relay` | Forward `{url, method, headers, body}` upstream |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Relay-side failures use the error schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unsupported scheme: ftp" } }
//! ```
//!
//! Error codes: `bad_request` (400), `upstream_error` (502). Upstream HTTP
//! errors are not relay errors — their status and body pass through as-is.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the relay exists for
//! browser clients.

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;

/// Shared state: one upstream client reused by every relayed request.
#[derive(Clone)]
struct AppState {
    client: reqwest::Client,
}

/// Starts the relay server on the configured bind address.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.dispatch.timeout_secs))
        .build()?;

    let app = relay_app(client);

    println!("relay listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the relay router around an upstream client.
///
/// Split out of [`run_server`] so tests can serve it on an ephemeral port.
pub fn relay_app(client: reqwest::Client) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/relay", post(handle_relay))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { client })
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

fn upstream_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_error".to_string(),
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

// ============ POST /relay ============

/// JSON request body for `POST /relay`.
#[derive(Deserialize)]
struct RelayRequest {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Forward one request upstream and return the response verbatim.
async fn handle_relay(
    State(state): State<AppState>,
    Json(request): Json<RelayRequest>,
) -> Result<Response, AppError> {
    let url = reqwest::Url::parse(&request.url)
        .map_err(|e| bad_request(format!("invalid url: {}", e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(bad_request(format!("unsupported scheme: {}", other))),
    }

    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|_| bad_request(format!("invalid method: {}", request.method)))?;

    println!("relay: {} {}", method, url);

    let mut upstream = state.client.request(method, url);
    for (name, value) in &request.headers {
        upstream = upstream.header(name, value);
    }
    if let Some(body) = &request.body {
        upstream = upstream.json(body);
    }

    let response = upstream
        .send()
        .await
        .map_err(|e| upstream_error(e.to_string()))?;

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| upstream_error(e.to_string()))?;

    Ok((status, [("content-type", content_type)], bytes).into_response())
}
