//! JSON API server.

mod handlers;

pub use handlers::*;

use crate::breaker::BreakerRegistry;
use crate::scheduler::Scheduler;
use crate::state::MonitorState;

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<MonitorState>,
    pub scheduler: Arc<Scheduler>,
    pub breakers: Arc<BreakerRegistry>,
}

pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, state: AppState) -> Self {
        Self { port, state }
    }

    fn routes(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/health", get(handlers::handle_health))
        // Sites and live status
        .route("/api/sites", get(handlers::handle_get_sites))
        .route("/api/status", get(handlers::handle_get_status))
        .route("/api/overview", get(handlers::handle_get_overview))
        .route("/api/logs", get(handlers::handle_get_logs))
        // Per-site reports
        .route("/api/sites/{id}/stats", get(handlers::handle_get_site_stats))
        .route("/api/sites/{id}/charts", get(handlers::handle_get_site_charts))
        .route("/api/sites/{id}/charts/{chart}", get(handlers::handle_get_site_chart))
        .route("/api/sites/{id}/events", get(handlers::handle_get_site_events))
        .route("/api/sites/{id}/test", post(handlers::handle_test_site))
        // Internals
        .route("/api/breakers", get(handlers::handle_get_breakers))
        .route("/api/metrics", get(handlers::handle_get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
