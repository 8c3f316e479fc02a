//! Subscription listing endpoint.
//!
//! Renders the provider's subscriptions as a flat id/display-name list for
//! configuration UIs. Pure query; no lifecycle state is touched.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use cirrus_provider::Subscription;
use serde::Serialize;

use super::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub subscriptions: Vec<Subscription>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/subscriptions", get(list_subscriptions))
}

async fn list_subscriptions(
    State(state): State<AppState>,
) -> Result<Json<SubscriptionsResponse>, ApiError> {
    let subscriptions = state.client.list_subscriptions().await?;
    Ok(Json(SubscriptionsResponse { subscriptions }))
}
