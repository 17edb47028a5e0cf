//! HTTP Protocol Definitions
//!
//! Endpoint paths and the JSON bodies exchanged with clients. The describe endpoint returns
//! [`ImageResponse`](crate::cache::types::ImageResponse) as is.

use crate::ledger::types::{ImageId, ImageStatus};
use serde::{Deserialize, Serialize};

pub const ENDPOINT_UPLOAD: &str = "/api/v1/upload";
pub const ENDPOINT_IMAGE: &str = "/api/v1/images/:id";
pub const ENDPOINT_ARTIFACT: &str = "/artifacts/:container/:object";
pub const ENDPOINT_HEALTH: &str = "/health";

/// Multipart field carrying the upload.
pub const UPLOAD_FIELD: &str = "image";

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: ImageId,
    pub filename: String,
    pub status: ImageStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArtifactQuery {
    pub expires: i64,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
