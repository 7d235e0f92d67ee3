//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the status handlers
//! - Wire up middleware (tracing, timeout, admin rate limit)
//! - Bind server to listener and stop on the shutdown broadcast

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{GovernorConfig, TrafficClass};
use crate::governance::{Governance, GovernanceStatus};
use crate::security::rate_limit::{rate_limit_middleware, QuotaStatus, RateLimitGuard};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub governance: Arc<Governance>,
}

/// HTTP server for the governance status surface.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server over an already-constructed governance root.
    pub fn new(config: &GovernorConfig, governance: Arc<Governance>) -> Self {
        let router = Self::build_router(config, AppState { governance });
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(config: &GovernorConfig, state: AppState) -> Router {
        let admin = RateLimitGuard::new(state.governance.limiter(TrafficClass::Admin).clone());
        let governance_routes = protect(
            Router::new()
                .route("/governance/status", get(get_status))
                .route("/governance/limits/{class}/{identifier}", get(get_limits)),
            admin,
        );

        Router::new()
            .route("/healthz", get(healthz))
            .merge(governance_routes)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.listener.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Router for in-process use (tests, embedding).
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Put every route of `router` behind the guard's limiter.
pub fn protect<S>(router: Router<S>, guard: RateLimitGuard) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(guard, rate_limit_middleware))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_status(State(state): State<AppState>) -> Json<GovernanceStatus> {
    Json(state.governance.status())
}

#[derive(Serialize)]
struct LimitsResponse {
    class: TrafficClass,
    identifier: String,
    blocked: bool,
    #[serde(flatten)]
    quota: QuotaStatus,
}

async fn get_limits(
    State(state): State<AppState>,
    Path((class, identifier)): Path<(String, String)>,
) -> Response {
    let class = match class.parse::<TrafficClass>() {
        Ok(class) => class,
        Err(message) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "unknown_class", "message": message })),
            )
                .into_response();
        }
    };

    let limiter = state.governance.limiter(class);
    let quota = limiter.status(&identifier);
    Json(LimitsResponse {
        class,
        identifier,
        blocked: quota.blocked_for_ms.is_some(),
        quota,
    })
    .into_response()
}
