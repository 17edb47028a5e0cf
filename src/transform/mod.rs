//! Transform Module
//!
//! The pixel work done by a worker: decode the raw upload, apply a [`Transform`], encode the
//! result as PNG. All of it is CPU-bound and synchronous; callers run it off the async
//! runtime (`spawn_blocking`).


use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use std::io::Cursor;

/// Largest width or height accepted from an upload.
pub const MAX_DECODE_DIMENSION: u32 = 65_535;

/// Decoder allocation ceiling.
pub const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

/// Default ceiling on `width * height` of a transform's output.
pub const DEFAULT_MAX_OUTPUT_PIXELS: u64 = 100_000_000;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

/// A pluggable image-to-image operation.
pub trait Transform: Send + Sync {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, TransformError>;
}

/// Resize to a fixed width, keeping the aspect ratio, then convert to grayscale.
///
/// Very tall inputs scale to outputs the process could not allocate; anything above
/// `max_output_pixels` is rejected before resizing.
#[derive(Debug, Clone, Copy)]
pub struct ResizeGrayscale {
    pub target_width: u32,
    pub max_output_pixels: u64,
}

impl ResizeGrayscale {
    pub fn new(target_width: u32) -> Self {
        Self {
            target_width,
            max_output_pixels: DEFAULT_MAX_OUTPUT_PIXELS,
        }
    }

    pub fn with_max_output_pixels(mut self, max_output_pixels: u64) -> Self {
        self.max_output_pixels = max_output_pixels;
        self
    }

    /// Output dimensions for a `width x height` input. Height never rounds to zero.
    pub fn target_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let scaled = (height as f64 * self.target_width as f64 / width as f64).round() as u32;
        (self.target_width, scaled.max(1))
    }
}

impl Default for ResizeGrayscale {
    fn default() -> Self {
        Self::new(800)
    }
}

impl Transform for ResizeGrayscale {
    fn apply(&self, image: DynamicImage) -> Result<DynamicImage, TransformError> {
        if self.target_width == 0 {
            return Err(TransformError::Transform("target width is zero".into()));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(TransformError::Transform(format!(
                "cannot resize an empty {}x{} image",
                image.width(),
                image.height()
            )));
        }

        let (width, height) = self.target_dimensions(image.width(), image.height());
        let pixels = width as u64 * height as u64;
        if pixels > self.max_output_pixels {
            return Err(TransformError::Transform(format!(
                "{}x{} input would resize to {}x{}, above the {} pixel limit",
                image.width(),
                image.height(),
                width,
                height,
                self.max_output_pixels
            )));
        }

        Ok(image.resize_exact(width, height, FilterType::Lanczos3).grayscale())
    }
}

/// Decodes an upload under [`decode_limits`].
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, TransformError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| TransformError::Decode(image::ImageError::IoError(e)))?;
    reader.limits(decode_limits());
    reader.decode().map_err(TransformError::Decode)
}

pub fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DECODE_DIMENSION);
    limits.max_image_height = Some(MAX_DECODE_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    limits
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(TransformError::Encode)?;
    Ok(buffer.into_inner())
}

/// Decode, transform and encode in one call.
pub fn run(transform: &dyn Transform, raw: &[u8]) -> Result<Vec<u8>, TransformError> {
    let decoded = decode(raw)?;
    tracing::trace!("Decoded {}x{} image", decoded.width(), decoded.height());

    let transformed = transform.apply(decoded)?;
    encode_png(&transformed)
}
