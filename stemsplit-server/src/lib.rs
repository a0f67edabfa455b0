//! stemsplit-server library interface for testing
//!
//! Exposes public APIs for integration testing

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::Router;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::services::SplitOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub orchestrator: Arc<SplitOrchestrator>,
    /// Cancellation tokens of jobs whose engine run is in flight
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> Self {
        let orchestrator = SplitOrchestrator::from_config(&config);
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn register_job(&self, job_id: Uuid, token: CancellationToken) {
        self.cancellation_tokens.write().await.insert(job_id, token);
    }

    pub async fn unregister_job(&self, job_id: Uuid) {
        self.cancellation_tokens.write().await.remove(&job_id);
    }

    pub async fn active_jobs(&self) -> usize {
        self.cancellation_tokens.read().await.len()
    }

    pub async fn record_error(&self, message: String) {
        *self.last_error.write().await = Some(message);
    }

    /// Cancel every in-flight job; returns how many were signalled
    pub async fn cancel_all_jobs(&self) -> usize {
        let tokens = self.cancellation_tokens.read().await;
        for (job_id, token) in tokens.iter() {
            info!(job_id = %job_id, "Cancelling job");
            token.cancel();
        }
        tokens.len()
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .merge(api::split_routes())
        .merge(api::output_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .expose_headers([axum::http::HeaderName::from_static(api::JOB_ID_HEADER)])
}
