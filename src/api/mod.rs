//! HTTP API Module
//!
//! Thin axum layer over the [`Pipeline`]:
//! - `POST /api/v1/upload`: multipart upload (field `image`), answers `201` once the task is queued.
//! - `GET /api/v1/images/:id`: current status, with a download link once completed.
//! - `GET /artifacts/:container/:object?expires=..&signature=..`: presigned download.
//! - `GET /health`.

pub mod handlers;
pub mod protocol;
pub mod upload;

#[cfg(test)]
mod tests;

use crate::pipeline::orchestrator::Pipeline;
use handlers::*;
use protocol::*;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;

pub fn router(pipeline: Arc<Pipeline>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route(ENDPOINT_UPLOAD, post(handle_upload))
        .route(ENDPOINT_IMAGE, get(handle_get_image))
        .route(ENDPOINT_ARTIFACT, get(handle_get_artifact))
        .route(ENDPOINT_HEALTH, get(handle_health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(Extension(pipeline))
}
