// =============================================================================
// Core Error Taxonomy
// =============================================================================
//
// Only `NotFound` ever crosses the core boundary. Delivery and entropy
// failures are recovered where they happen (drop the subscriber, substitute a
// neutral draw) and exist as variants so they can be logged uniformly.
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested symbol is not one of the configured trading pairs.
    #[error("trading pair not found: {0}")]
    NotFound(String),

    /// A subscriber endpoint rejected a push.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The OS entropy source could not produce a value.
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(String),
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "Trading pair not found"),
            Self::Delivery(_) | Self::EntropyUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };
        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
