pub mod analyze;
pub mod chat;
pub mod error;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::analysis::{AnalyzeError, Analyzer};
use crate::cache::CacheStats;
use crate::config::Config;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to initialise services: {0}")]
    Setup(#[from] AnalyzeError),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared handler state. Cloning is cheap: the analyzer is reference-counted
/// inside.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Analyzer,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    cache: CacheStats,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/analyze", post(analyze::handle_analyze))
        .route("/api/chat", post(chat::handle_chat))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        cache: state.analyzer.cache_stats(),
    })
}

/// Bind `config.server.bind` and serve until Ctrl-C.
pub async fn run(config: &Config) -> Result<(), ServerError> {
    let analyzer = Analyzer::from_config(config)?;
    let app = router(AppState { analyzer });

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "wikinalysis listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!(error = %e, "cannot listen for Ctrl-C; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{send, test_app};
    use crate::completion::testing::MockCompletion;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use mockito::Server;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_health() {
        let server = Server::new_async().await;
        let app = test_app(&server, Arc::new(MockCompletion::replying("wiki")));

        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, _, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["cache"]["len"], 0);
        assert_eq!(json["cache"]["capacity"], 8);
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_any_origin() {
        let server = Server::new_async().await;
        let app = test_app(&server, Arc::new(MockCompletion::replying("wiki")));

        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/analyze")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(app, request).await;

        assert!(status.is_success());
        assert_eq!(headers["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let server = Server::new_async().await;
        let app = test_app(&server, Arc::new(MockCompletion::replying("wiki")));

        let request = Request::get("/api/nope").body(Body::empty()).unwrap();
        let (status, _, _) = send(app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
