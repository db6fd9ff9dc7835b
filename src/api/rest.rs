// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
//   GET /api/health            liveness + counters
//   GET /api/pairs             summary of every trading pair
//   GET /api/candles/{symbol}  closed-candle history, 404 if unknown
//   GET /ws/{symbol}           live update stream (see `ws`)
//
// CORS is permissive: the chart front-end may be served from anywhere.
// Plain HTTP requests that take longer than REQUEST_TIMEOUT get a 408.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::app_state::AppState;
use crate::error::CoreError;
use crate::market_data::Candle;
use crate::types::PairSummary;

// =============================================================================
// Router construction
// =============================================================================

/// Upper bound on one HTTP request/response exchange.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the full router with CORS and timeout middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/pairs", get(pairs))
        .route("/api/candles/:symbol", get(candles))
        .route("/ws/:symbol", get(crate::api::ws::ws_handler));

    with_middleware(routes, REQUEST_TIMEOUT).with_state(state)
}

/// Wrap every route already on `routes` in CORS and a request timeout.
/// WebSocket sessions outlive the upgrade response, so only the handshake
/// is bounded.
fn with_middleware(routes: Router<Arc<AppState>>, timeout: Duration) -> Router<Arc<AppState>> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes.layer(TimeoutLayer::new(timeout)).layer(cors)
}

// =============================================================================
// Handlers
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

async fn pairs(State(state): State<Arc<AppState>>) -> Json<Vec<PairSummary>> {
    Json(state.registry.list_pairs())
}

async fn candles(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<Vec<Candle>>, CoreError> {
    let candles = state.registry.get_history(&symbol)?;
    info!(symbol = %symbol, count = candles.len(), "sending candles");
    Ok(Json(candles))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::market_data::Entropy;
    use crate::registry::Registry;
    use crate::runtime_config::SimConfig;

    fn app_state() -> Arc<AppState> {
        let config = SimConfig::default();
        let registry = Registry::initialize_with(&config, |_| Entropy::seeded(11));
        Arc::new(AppState::new(registry, config))
    }

    async fn get(state: &Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn pairs_lists_every_symbol() {
        let state = app_state();
        let (status, body) = get(&state, "/api/pairs").await;
        assert_eq!(status, StatusCode::OK);

        let pairs: Vec<PairSummary> = serde_json::from_value(body).unwrap();
        assert_eq!(pairs.len(), 5);
        assert_eq!(pairs[0].symbol, "BTCUSDT");
        assert!(pairs.iter().all(|p| p.last_price > 0.0));

        state.registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn candles_returns_history() {
        let state = app_state();
        let (status, body) = get(&state, "/api/candles/BTCUSDT").await;
        assert_eq!(status, StatusCode::OK);

        let candles: Vec<Candle> = serde_json::from_value(body).unwrap();
        assert_eq!(candles.len(), 288);
        state.registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn candles_unknown_symbol_is_404() {
        let state = app_state();
        let (status, body) = get(&state, "/api/candles/DOGEUSDT").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Trading pair not found");
        state.registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_request_times_out() {
        let state = app_state();
        let slow = Router::new().route(
            "/slow",
            axum::routing::get(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "done"
            }),
        );
        let app = with_middleware(slow, REQUEST_TIMEOUT).with_state(state.clone());

        let response = app
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

        state.registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn health_reports_counts() {
        let state = app_state();
        let (status, body) = get(&state, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["pairs"], 5);
        assert_eq!(body["subscribers"], 0);
        state.registry.shutdown(Duration::from_secs(1)).await;
    }
}
