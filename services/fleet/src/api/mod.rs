//! HTTP API handlers and routing.
//!
//! Read-only: the lifecycle itself is driven through [`VmImage`] by the
//! embedding request layer, not over HTTP. These routes only render provider
//! listings and instance state for display.

mod health;
mod images;
mod subscriptions;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use cirrus_provider::{CloudClient, ProviderError};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::image::VmImage;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn CloudClient>,
    pub images: Arc<HashMap<String, Arc<VmImage>>>,
}

/// Create the API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .nest("/v1", images::routes().merge(subscriptions::routes()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error response for listing handlers.
pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
