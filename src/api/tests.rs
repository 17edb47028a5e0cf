//! API Module Tests
//!
//! ## Test Scopes
//! - **Upload validation**: Extensions and media type fallback.
//! - **Handlers**: Status codes and bodies, called directly with extractors.

#[cfg(test)]
mod tests {
    use crate::api::handlers::*;
    use crate::api::protocol::{ArtifactQuery, ENDPOINT_IMAGE, ENDPOINT_UPLOAD};
    use crate::api::upload::*;
    use crate::artifact::link::LinkSigner;
    use crate::artifact::store::ObjectArtifactStore;
    use crate::cache::memory::MemoryCache;
    use crate::ledger::StatusLedger;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::types::{ImageId, ImageStatus};
    use crate::pipeline::orchestrator::Pipeline;
    use crate::pipeline::types::PipelineSettings;
    use crate::queue::local::LocalQueue;
    use crate::queue::types::TaskEnvelope;
    use crate::transform::ResizeGrayscale;

    use axum::body::Body;
    use axum::extract::{FromRequest, Multipart, Path, Query};
    use axum::http::{Request, StatusCode, header};
    use axum::Extension;
    use chrono::Utc;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;

    const BOUNDARY: &str = "X-IMAGE-PIPELINE-BOUNDARY";

    struct Setup {
        pipeline: Arc<Pipeline>,
        ledger: Arc<MemoryLedger>,
        queue: Arc<LocalQueue>,
    }

    fn setup() -> Setup {
        let ledger = Arc::new(MemoryLedger::new());
        let queue = Arc::new(LocalQueue::new(5));
        let pipeline = Arc::new(Pipeline::new(
            ledger.clone(),
            Arc::new(ObjectArtifactStore::in_memory()),
            queue.clone(),
            Arc::new(MemoryCache::new()),
            Arc::new(ResizeGrayscale::new(16)),
            LinkSigner::new("http://localhost:8081", [9u8; 32]),
            PipelineSettings::default(),
        ));

        Setup {
            pipeline,
            ledger,
            queue,
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    async fn multipart(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Multipart {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        let request = Request::builder()
            .method("POST")
            .uri(ENDPOINT_UPLOAD)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();

        Multipart::from_request(request, &()).await.unwrap()
    }

    fn split_link(url: &str) -> (String, String, ArtifactQuery) {
        let (path, query) = url.split_once('?').unwrap();
        let mut segments = path.rsplit('/');
        let object = segments.next().unwrap().to_string();
        let container = segments.next().unwrap().to_string();
        (container, object, parse_query(query))
    }

    fn parse_query(query: &str) -> ArtifactQuery {
        let mut expires = 0;
        let mut signature = String::new();
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse().unwrap(),
                Some(("signature", v)) => signature = v.to_string(),
                _ => {}
            }
        }
        ArtifactQuery { expires, signature }
    }

    // ============================================================
    // TEST 1: Upload validation
    // ============================================================

    #[test]
    fn test_resolve_upload_accepts_known_extensions() {
        assert_eq!(
            resolve_upload("cat.JPG", Some("image/jpeg")).unwrap(),
            UploadKind {
                extension: ".jpg".into(),
                media_type: "image/jpeg"
            }
        );
        assert_eq!(resolve_upload("cat.jpeg", None).unwrap().media_type, "image/jpeg");
        assert_eq!(resolve_upload("cat.png", None).unwrap().extension, ".png");
    }

    #[test]
    fn test_resolve_upload_falls_back_to_extension_type() {
        let kind = resolve_upload("cat.png", Some("application/octet-stream")).unwrap();
        assert_eq!(kind.media_type, "image/png");

        // A declared JPEG/PNG type wins over the extension.
        let kind = resolve_upload("cat.png", Some("image/jpeg")).unwrap();
        assert_eq!(kind.media_type, "image/jpeg");
    }

    #[test]
    fn test_resolve_upload_rejects_other_files() {
        assert_eq!(
            resolve_upload("cat.gif", Some("image/gif")),
            Err(UploadError::UnsupportedExtension(".gif".into()))
        );
        assert!(resolve_upload("noextension", None).is_err());
        assert!(resolve_upload("", None).is_err());
    }

    #[test]
    fn test_router_serves_versioned_paths() {
        assert_eq!(ENDPOINT_UPLOAD, "/api/v1/upload");
        assert_eq!(ENDPOINT_IMAGE, "/api/v1/images/:id");

        // Conflicting routes would panic here.
        let _router = crate::api::router(setup().pipeline, 1024);
    }

    // ============================================================
    // TEST 2: Upload handler
    // ============================================================

    #[tokio::test]
    async fn test_upload_returns_created_and_queues_task() {
        // ARRANGE
        let s = setup();
        let form = multipart("image", "pic.png", "image/png", &png(4, 4)).await;

        // ACT
        let (status, body) = handle_upload(Extension(s.pipeline.clone()), form)
            .await
            .unwrap();

        // ASSERT
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body.filename, "pic.png");
        assert_eq!(body.status, ImageStatus::Pending);
        let record = s.ledger.get(body.id).await.unwrap().unwrap();
        assert_eq!(record.status, ImageStatus::Pending);
        assert_eq!(s.queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_extension() {
        let s = setup();
        let form = multipart("image", "anim.gif", "image/gif", b"GIF89a").await;

        let err = handle_upload(Extension(s.pipeline.clone()), form)
            .await
            .unwrap_err();

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(s.ledger.is_empty());
        assert_eq!(s.queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_upload_requires_image_field() {
        let s = setup();
        let form = multipart("file", "pic.png", "image/png", &png(2, 2)).await;

        let err = handle_upload(Extension(s.pipeline.clone()), form)
            .await
            .unwrap_err();

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("image"));
    }

    // ============================================================
    // TEST 3: Describe handler
    // ============================================================

    #[tokio::test]
    async fn test_get_image_status_codes() {
        let s = setup();

        let bad = handle_get_image(Extension(s.pipeline.clone()), Path("not-a-uuid".into()))
            .await
            .unwrap_err();
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);

        let missing = handle_get_image(
            Extension(s.pipeline.clone()),
            Path(ImageId::new().to_string()),
        )
        .await
        .unwrap_err();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let record = s
            .pipeline
            .ingest(png(4, 4), "pic.png", ".png", "image/png")
            .await
            .unwrap();
        let found = handle_get_image(Extension(s.pipeline.clone()), Path(record.id.to_string()))
            .await
            .unwrap();
        assert_eq!(found.status, ImageStatus::Pending);
        assert!(found.download_url.is_none());
    }

    // ============================================================
    // TEST 4: Presigned artifact download
    // ============================================================

    async fn completed(s: &Setup) -> ImageId {
        let record = s
            .pipeline
            .ingest(png(32, 16), "pic.png", ".png", "image/png")
            .await
            .unwrap();
        let envelope = TaskEnvelope {
            image_id: record.id,
            bucket_name: record.bucket_name.clone(),
            object_name: record.id.raw_object_name(".png"),
        };
        s.pipeline.process(&envelope, false).await.unwrap();
        record.id
    }

    #[tokio::test]
    async fn test_download_link_serves_png() {
        // ARRANGE
        let s = setup();
        let id = completed(&s).await;
        let view = s.pipeline.describe(id).await.unwrap();
        let (container, object, query) = split_link(&view.download_url.unwrap());

        // ACT
        let response = handle_get_artifact(
            Extension(s.pipeline.clone()),
            Path((container, object)),
            Query(query),
        )
        .await
        .unwrap();

        // ASSERT
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (16, 8));
    }

    #[tokio::test]
    async fn test_download_rejects_tampered_and_expired_links() {
        let s = setup();
        let id = completed(&s).await;
        let object = id.derived_object_name();

        let tampered = ArtifactQuery {
            expires: Utc::now().timestamp() + 600,
            signature: "00".repeat(32),
        };
        let err = handle_get_artifact(
            Extension(s.pipeline.clone()),
            Path(("processed-images".into(), object.clone())),
            Query(tampered),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let stale = s.pipeline.links().presign(
            "processed-images",
            &object,
            Duration::from_secs(60),
            Utc::now() - chrono::Duration::hours(1),
        );
        let (container, object, query) = split_link(&stale.url);
        let err = handle_get_artifact(Extension(s.pipeline.clone()), Path((container, object)), Query(query))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_download_of_missing_artifact_is_not_found() {
        let s = setup();
        let link = s.pipeline.links().presign(
            "processed-images",
            "nothing-here.png",
            Duration::from_secs(60),
            Utc::now(),
        );
        let (container, object, query) = split_link(&link.url);

        let err = handle_get_artifact(Extension(s.pipeline.clone()), Path((container, object)), Query(query))
            .await
            .unwrap_err();

        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
