use super::protocol::*;
use super::upload::{UploadError, resolve_upload};
use crate::artifact::ArtifactStore;
use crate::artifact::link::LinkError;
use crate::artifact::store::content_type_for;
use crate::cache::types::ImageResponse;
use crate::error::PipelineError;
use crate::ledger::types::ImageId;
use crate::pipeline::orchestrator::Pipeline;

use axum::extract::{Multipart, Path, Query};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

/// Error half of every handler: a status code and a JSON `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = if err.is_not_found() {
            StatusCode::NOT_FOUND
        } else if err.is_deadline() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, err.to_string())
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, err.to_string())
    }
}

pub async fn handle_upload(
    Extension(pipeline): Extension<Arc<Pipeline>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let kind = resolve_upload(&filename, field.content_type())?;
        let payload = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(e.status(), e.body_text()))?;
        if payload.is_empty() {
            return Err(UploadError::Empty.into());
        }

        let record = pipeline
            .ingest(payload.to_vec(), &filename, &kind.extension, kind.media_type)
            .await
            .inspect_err(|e| tracing::error!("Failed to ingest {}: {}", filename, e))?;

        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                id: record.id,
                filename: record.filename,
                status: record.status,
                message: "Image uploaded successfully and queued for processing".to_string(),
            }),
        ));
    }

    Err(UploadError::MissingField(UPLOAD_FIELD).into())
}

pub async fn handle_get_image(
    Extension(pipeline): Extension<Arc<Pipeline>>,
    Path(id): Path<String>,
) -> Result<Json<ImageResponse>, ApiError> {
    let id: ImageId = id
        .parse()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "invalid image id"))?;

    let response = pipeline.describe(id).await?;
    tracing::debug!("Image status query: {} -> {}", id, response.status);

    Ok(Json(response))
}

/// Serves a processed artifact behind a presigned link.
pub async fn handle_get_artifact(
    Extension(pipeline): Extension<Arc<Pipeline>>,
    Path((container, object)): Path<(String, String)>,
    Query(query): Query<ArtifactQuery>,
) -> Result<Response, ApiError> {
    pipeline
        .links()
        .verify(&container, &object, query.expires, &query.signature, Utc::now())
        .map_err(|e| match e {
            LinkError::Malformed(_) => ApiError::new(StatusCode::BAD_REQUEST, e.to_string()),
            LinkError::Expired | LinkError::BadSignature => {
                ApiError::new(StatusCode::FORBIDDEN, e.to_string())
            }
        })?;

    let bytes = pipeline
        .artifacts()
        .get(&container, &object)
        .await
        .map_err(|e| {
            let status = if e.is_not_found() {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            ApiError::new(status, e.to_string())
        })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type_for(&object))],
        bytes,
    )
        .into_response())
}

pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
