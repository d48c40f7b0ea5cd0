//! Read-only dashboard over the CSV export and the synchronizer status.

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::DashboardState;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Environment variable listing extra allowed CORS origins.
pub const CORS_ENV_VAR: &str = "OWEN_SYNC_CORS_ORIGINS";

/// Build a CORS layer that is restrictive by default (same-origin only).
///
/// Set `OWEN_SYNC_CORS_ORIGINS` to a comma-separated list of allowed origins
/// to open the read endpoints to other front-ends.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    match std::env::var(CORS_ENV_VAR) {
        Ok(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the dashboard router.
pub fn create_app(state: DashboardState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(routes::root_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::shared_status;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn create_test_state(csv: &std::path::Path) -> DashboardState {
        DashboardState::new(shared_status(), csv, 100)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, axum::body::Bytes) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(create_app(create_test_state(&dir.path().join("x.csv"))), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["status"], "ok");
    }

    #[tokio::test]
    async fn index_page_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(create_app(create_test_state(&dir.path().join("x.csv"))), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&body).contains("/api/v1/data"));
    }

    #[tokio::test]
    async fn status_is_enveloped() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get(create_app(create_test_state(&dir.path().join("x.csv"))), "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["data"]["state"], "starting");
        assert!(v["meta"].is_object());
    }
}
