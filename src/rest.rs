//! REST surface.
//!
//! All routes live under the configured URL path (default `/tests/`):
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `rest/get_methods/<fullname>` | `{"method_names", "load_errors"}` |
//! | GET | `rest/object_type/<fullname>` | `{"object_type"}` |
//! | POST | `rest/start_batch/<fullname>` | `{"batch_id"}` or `{"batch_info", "results"}` |
//! | GET | `rest/batch_info/<batch_id>` | `{"num_units", "test_unit_methods", "load_errors"}` |
//! | GET | `rest/batch_results/<batch_id>?start=<n>` | `[<unit result>, ...]` |
//! | POST | `deferred/` | runs one deferred call (task queue only) |
//!
//! A trailing slash with no fullname addresses every configured package.
//! Errors are `{"error": message}` with a 400, 403, 404 or 500 status.
//!
//! [`start`] wires everything for `aeta serve`: storage, the in-process
//! queue, a [`WorkerPool`] draining it, and the HTTP server.

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::catalog::ModuleLoader;
use crate::config::{Config, ServerConfig};
use crate::discovery::Discovery;
use crate::orchestrator::Orchestrator;
use crate::queue::{MemoryQueue, WorkerPool, worker::RetryPolicy};
use crate::store::Storage;

pub use handlers::ApiError;

/// Header the task queue sets on deferred call requests.
pub const TASK_NAME_HEADER: &str = "x-aeta-taskname";

/// Shared state of every handler.
pub struct AppState {
    pub orchestrator: Orchestrator,
}

/// Builds the router for `server`'s paths.
pub fn router(orchestrator: Orchestrator, server: &ServerConfig) -> Router {
    let state = Arc::new(AppState { orchestrator });
    let rest = &server.rest_path;

    Router::new()
        .route(&format!("{}get_methods/", rest), get(handlers::get_all_methods))
        .route(
            &format!("{}get_methods/{{*fullname}}", rest),
            get(handlers::get_methods),
        )
        .route(
            &format!("{}object_type/", rest),
            get(handlers::root_object_type),
        )
        .route(
            &format!("{}object_type/{{*fullname}}", rest),
            get(handlers::object_type),
        )
        .route(
            &format!("{}start_batch/", rest),
            post(handlers::start_full_batch),
        )
        .route(
            &format!("{}start_batch/{{*fullname}}", rest),
            post(handlers::start_batch),
        )
        .route(
            &format!("{}batch_info/{{batch_id}}", rest),
            get(handlers::batch_info),
        )
        .route(
            &format!("{}batch_results/{{batch_id}}", rest),
            get(handlers::batch_results),
        )
        .route(&server.deferred_path, post(handlers::run_deferred))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running server and its workers.
pub struct ServerHandle {
    addr: SocketAddr,
    url_path: String,
    token: CancellationToken,
    server: JoinHandle<std::io::Result<()>>,
    workers: WorkerPool,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL the remote client takes, e.g. `http://127.0.0.1:8080/tests`.
    pub fn base_url(&self) -> String {
        format!(
            "http://{}{}",
            self.addr,
            self.url_path.trim_end_matches('/')
        )
    }

    /// A token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits until the server stops, then stops the workers.
    pub async fn wait(self) -> anyhow::Result<()> {
        let served = self.server.await.context("Server task panicked")?;
        self.workers.shutdown().await;
        served.context("Server failed")?;
        info!("Server stopped");
        Ok(())
    }

    /// Stops the server and workers.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.token.cancel();
        self.wait().await
    }
}

/// Starts the server described by `config` over `loader`.
///
/// Binds `server.listen` (port 0 picks a free port), spawns
/// `server.workers` workers and serves until the handle is shut down.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the store cannot be
/// opened or the address cannot be bound.
pub async fn start(config: &Config, loader: Arc<dyn ModuleLoader>) -> anyhow::Result<ServerHandle> {
    let queue = Arc::new(MemoryQueue::new());
    let storage =
        Storage::from_config(&config.storage, queue.clone()).context("Failed to open store")?;
    let discovery =
        Discovery::from_config(loader, config).context("Invalid tests.module_pattern")?;
    let orchestrator = Orchestrator::new(discovery, storage);

    let token = CancellationToken::new();
    let workers = WorkerPool::spawn(
        queue,
        Arc::new(orchestrator.clone()),
        config.server.workers,
        RetryPolicy::default(),
        token.child_token(),
    );

    let app = router(orchestrator, &config.server);
    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;
    let addr = listener.local_addr()?;

    let shutdown = token.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    info!(
        "Serving tests on http://{}{} with {} workers",
        addr,
        config.server.url_path,
        workers.len()
    );

    Ok(ServerHandle {
        addr,
        url_path: config.server.url_path.clone(),
        token,
        server,
        workers,
    })
}
