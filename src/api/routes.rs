//! API route definitions
//!
//! - /api/v1/data - export table and chart series
//! - /api/v1/status - synchronizer status mirror
//! - /health, /download, / - root-level endpoints

use axum::{routing::get, Router};

use super::handlers::{self, DashboardState};

/// Versioned JSON endpoints
pub fn api_routes(state: DashboardState) -> Router {
    Router::new()
        .route("/data", get(handlers::get_data))
        .route("/status", get(handlers::get_status))
        .with_state(state)
}

/// Root-level endpoints
pub fn root_routes(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route("/download", get(handlers::download_csv))
        .with_state(state)
}
