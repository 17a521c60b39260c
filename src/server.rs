//! HTTP gateway in front of the workflow engine.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::chat::ChatClient;
use crate::config::ServerSettings;
use crate::span::TraceSink;
use crate::workflow::{Variant, WorkflowEngine};
use crate::Error;

/// Shared handles every request needs to build its engine.
#[derive(Debug, Clone)]
pub struct AppState {
    client: Arc<dyn ChatClient>,
    model: String,
    sink: Arc<dyn TraceSink>,
}

impl AppState {
    pub fn new(client: Arc<dyn ChatClient>, model: impl Into<String>, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            client,
            model: model.into(),
            sink,
        }
    }

    /// An engine for `variant` sharing this state's client and sink.
    pub fn engine(&self, variant: Variant) -> WorkflowEngine {
        WorkflowEngine::new(self.client.clone(), self.model.clone())
            .with_variant(variant)
            .with_sink(self.sink.clone())
    }
}

/// Query parameters of `POST /chat/`.
#[derive(Debug, Deserialize)]
pub struct ChatParams {
    pub user_message: String,
    #[serde(rename = "type", default)]
    pub variant: Variant,
}

/// Error response with a `detail` message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = if err.is_upstream() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "detail": self.detail })),
        )
            .into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.detail)
    }
}

impl std::error::Error for ApiError {}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/chat/", post(chat))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<&'static str> {
    Json("Welcome!")
}

async fn chat(
    State(state): State<AppState>,
    params: Result<Query<ChatParams>, QueryRejection>,
) -> Result<Json<String>, ApiError> {
    let Query(params) = params?;
    info!(variant = %params.variant, "chat request");
    let reply = state
        .engine(params.variant)
        .run(&params.user_message)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "chat request failed");
            ApiError::from(e)
        })?;
    Ok(Json(reply))
}

/// Serve the gateway until Ctrl+C or SIGTERM.
pub async fn serve(config: &ServerSettings, state: AppState) -> anyhow::Result<()> {
    let addr = SocketAddr::from((config.host.parse::<std::net::IpAddr>()?, config.port));
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
