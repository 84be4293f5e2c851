//! Router assembly and server lifecycle.

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{request_id_middleware, security_headers_middleware};
use std::path::PathBuf;
use std::sync::Arc;
use time::Duration;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::config::{Credentials, Settings};
use crate::handlers::{
    app::{health_check, index},
    chat::chat_handler,
    metrics::metrics,
    session::reset_handler,
};
use crate::middleware::metrics_middleware;
use crate::services::assistant::OpenAiAssistantClient;
use crate::services::{AssistantApi, ChatRelay};
use crate::AppState;

const CRATE_DIR: &str = "assistant-relay";

/// Location of the stylesheet and scripts, relative to the workspace root or
/// the crate directory.
fn static_directory() -> PathBuf {
    match std::env::current_dir() {
        Ok(base) if base.ends_with(CRATE_DIR) => base.join("static"),
        Ok(base) => base.join(CRATE_DIR).join("static"),
        Err(_) => PathBuf::from(CRATE_DIR).join("static"),
    }
}

pub fn build_router(state: AppState) -> Router {
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false) // Set to true in production with HTTPS
        .with_expiry(Expiry::OnInactivity(Duration::hours(24)));

    Router::new()
        .route("/", get(index))
        .route("/chat", post(chat_handler))
        .route("/reset", post(reset_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .nest_service("/static", ServeDir::new(static_directory()))
        .layer(session_layer)
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Wire the relay and page settings into a router around the given API.
pub fn app_router(
    settings: &Settings,
    credentials: &Credentials,
    api: Arc<dyn AssistantApi>,
) -> Result<Router, AppError> {
    let relay_config = settings.relay.relay_config(&credentials.assistant_id)?;

    tracing::info!(
        assistant_id = %credentials.assistant_id,
        project_scoped = credentials.project.is_some(),
        has_instructions = relay_config.instructions.is_some(),
        "Configured chat relay"
    );

    let relay = Arc::new(ChatRelay::new(api, relay_config));
    let state = AppState::new(relay, settings.ui.clone(), settings.openai.status());
    Ok(build_router(state))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Validate credentials, build the OpenAI client and bind the listener.
    ///
    /// Fails before any remote call when a required credential is missing.
    pub async fn build(settings: Settings) -> Result<Self, AppError> {
        let credentials = settings.openai.credentials()?;
        let client = OpenAiAssistantClient::new(settings.openai.client_config(&credentials))
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to build assistant client: {}", e))
            })?;

        Self::assemble(settings, credentials, Arc::new(client)).await
    }

    /// Same as [`Application::build`] with a caller-supplied assistant API.
    pub async fn build_with_api(
        settings: Settings,
        api: Arc<dyn AssistantApi>,
    ) -> Result<Self, AppError> {
        let credentials = settings.openai.credentials()?;
        Self::assemble(settings, credentials, api).await
    }

    async fn assemble(
        settings: Settings,
        credentials: Credentials,
        api: Arc<dyn AssistantApi>,
    ) -> Result<Self, AppError> {
        let router = app_router(&settings, &credentials, api)?;

        // Port 0 binds an ephemeral port for tests.
        let address = settings.server.address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// The port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!(port = self.port, "Starting assistant-relay");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
