//! HTTP API.
//!
//! ## Routes
//! - `GET  /health`
//! - `GET  /staking/pools`
//! - `GET  /staking/pools/eligible?assetId=&amount=`
//! - `GET  /staking/pools/:pool_id/stats`
//! - `GET  /staking/positions?owner=`
//! - `POST /staking/stake`
//! - `POST /staking/unstake`
//! - `POST /staking/claim`
//! - `GET  /staking/stats?owner=`

pub mod handlers;
pub mod types;

use std::future::Future;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware::map_response;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;

pub use handlers::AppState;
pub use types::{ApiError, ApiResponse};

pub fn router(state: AppState, server: &ServerConfig) -> Router {
    let routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/staking/pools", get(handlers::list_pools))
        .route("/staking/pools/eligible", get(handlers::eligible_pools))
        .route("/staking/pools/:pool_id/stats", get(handlers::pool_stats))
        .route("/staking/positions", get(handlers::list_positions))
        .route("/staking/stake", post(handlers::stake))
        .route("/staking/unstake", post(handlers::unstake))
        .route("/staking/claim", post(handlers::claim))
        .route("/staking/stats", get(handlers::owner_stats));

    with_layers(routes, server).with_state(state)
}

fn with_layers<S>(routes: Router<S>, server: &ServerConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    routes
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs)))
        .layer(map_response(timeout_envelope))
        .layer(DefaultBodyLimit::max(server.max_body_bytes))
}

/// The timeout layer answers with a bare 408; callers get the usual
/// envelope as a retryable internal error instead.
async fn timeout_envelope(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        return ApiError::internal("Request timed out").into_response();
    }
    response
}

/// Serves `app` on `listener` until `shutdown` resolves, then drains
/// in-flight requests.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Staking API listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Staking API stopped");
    Ok(())
}
