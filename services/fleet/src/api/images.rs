//! Image and instance listing endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::image::ClonePolicy;
use crate::instance::InstanceSnapshot;

use super::{ApiError, AppState};

/// Summary of one image for display.
#[derive(Debug, Serialize)]
pub struct ImageSummary {
    pub name: String,
    pub clone_policy: ClonePolicy,
    pub generalized: bool,
    pub instance_count: usize,
    /// Whether a new instance could start right now (queue-lock check).
    pub can_start_new_instance: bool,
}

#[derive(Debug, Serialize)]
pub struct ImagesResponse {
    pub images: Vec<ImageSummary>,
}

#[derive(Debug, Serialize)]
pub struct InstancesResponse {
    pub instances: Vec<InstanceSnapshot>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/images", get(list_images))
        .route("/images/{name}/instances", get(list_instances))
}

async fn list_images(State(state): State<AppState>) -> Json<ImagesResponse> {
    let mut images: Vec<ImageSummary> = state
        .images
        .values()
        .map(|image| ImageSummary {
            name: image.name().to_string(),
            clone_policy: image.details().clone_policy,
            generalized: image.generalized(),
            instance_count: image.instance_count(),
            can_start_new_instance: image.can_start_new_instance(),
        })
        .collect();
    images.sort_by(|a, b| a.name.cmp(&b.name));
    Json(ImagesResponse { images })
}

async fn list_instances(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<InstancesResponse>, ApiError> {
    let image = state
        .images
        .get(&name)
        .ok_or_else(|| ApiError::not_found(format!("unknown image: {name}")))?;

    let mut instances: Vec<InstanceSnapshot> = image
        .instances()
        .iter()
        .map(|instance| instance.snapshot())
        .collect();
    instances.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(InstancesResponse { instances }))
}
