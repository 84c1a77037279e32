//! Server assembly: shared state, router, and the serve loop.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use mimiq_core::{OidcSigner, Result, SystemClock};
use mimiq_flow::{HttpDispatcher, QueueConfig, Registry};

use crate::config::Config;
use crate::routes;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The queue registry.
    pub registry: Arc<Registry>,
    /// The process-lifetime OIDC signer.
    pub signer: Arc<OidcSigner>,
    /// Server configuration.
    pub config: Arc<Config>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("registry", &self.registry)
            .field("signer", &"<OidcSigner>")
            .field("config", &self.config)
            .finish()
    }
}

/// The emulator server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Builds the server: generates key material and wires the engine to
    /// the wall clock and the real HTTP dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error when OIDC key generation fails.
    pub fn new(config: Config) -> Result<Self> {
        let signer = Arc::new(OidcSigner::new(config.openid_issuer.clone())?);
        let registry = Arc::new(Registry::new(
            Arc::new(SystemClock),
            Arc::new(HttpDispatcher::new()),
            Arc::clone(&signer),
            config.registry_options(),
        ));
        Ok(Self {
            state: AppState {
                registry,
                signer,
                config: Arc::new(config),
            },
        })
    }

    /// Returns the shared state, for tests that drive the registry
    /// directly.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Creates the configured initial queues.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed names or duplicates.
    pub fn bootstrap(&self) -> Result<()> {
        for name in self.state.config.initial_queue_names()? {
            tracing::info!(queue = %name, "creating initial queue");
            self.state
                .registry
                .create_queue(name, QueueConfig::default())?;
        }
        Ok(())
    }

    /// Full router with request tracing.
    #[must_use]
    pub fn router(&self) -> Router {
        self.test_router().layer(TraceLayer::new_for_http())
    }

    /// Router without middleware, for in-process tests.
    #[must_use]
    pub fn test_router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route(
                "/.well-known/openid-configuration",
                get(routes::oidc::discovery),
            )
            .route("/jwks", get(routes::oidc::jwks))
            .route(
                "/v2/projects/{project}/locations/{location}/queues",
                post(routes::queues::create_queue).get(routes::queues::list_queues),
            )
            .route(
                "/v2/projects/{project}/locations/{location}/queues/{queue}",
                get(routes::queues::get_queue)
                    .patch(routes::queues::update_queue)
                    .delete(routes::queues::delete_queue)
                    .post(routes::queues::queue_verb),
            )
            .route(
                "/v2/projects/{project}/locations/{location}/queues/{queue}/tasks",
                post(routes::tasks::create_task).get(routes::tasks::list_tasks),
            )
            .route(
                "/v2/projects/{project}/locations/{location}/queues/{queue}/tasks/{task}",
                get(routes::tasks::get_task)
                    .delete(routes::tasks::delete_task)
                    .post(routes::tasks::task_verb),
            )
            .with_state(self.state.clone())
    }

    /// Binds the listener and serves until ctrl-c, then stops every
    /// dispatch loop.
    ///
    /// # Errors
    ///
    /// Returns an error when binding or serving fails.
    pub async fn serve(self) -> anyhow::Result<()> {
        self.bootstrap()?;

        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "cloud tasks emulator listening");

        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("shutting down dispatch loops");
        self.state.registry.shutdown().await;
        Ok(())
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
