//! Upload validation: accepted extensions and media type resolution.

const JPEG: &str = "image/jpeg";
const PNG: &str = "image/png";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("missing multipart field '{0}'")]
    MissingField(&'static str),

    #[error("invalid file type '{0}', only .jpg, .jpeg and .png are allowed")]
    UnsupportedExtension(String),

    #[error("uploaded file is empty")]
    Empty,
}

/// What a validated upload will be stored as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadKind {
    /// Lowercased, with the leading dot.
    pub extension: String,
    pub media_type: &'static str,
}

/// Checks the filename's extension and settles the media type.
///
/// A declared content type is kept only if it is JPEG or PNG; anything else (or nothing)
/// is replaced by the type implied by the extension.
pub fn resolve_upload(filename: &str, declared: Option<&str>) -> Result<UploadKind, UploadError> {
    let extension = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();

    let implied = match extension.as_str() {
        ".jpg" | ".jpeg" => JPEG,
        ".png" => PNG,
        _ => return Err(UploadError::UnsupportedExtension(extension)),
    };

    let media_type = match declared.map(str::trim) {
        Some(JPEG) => JPEG,
        Some(PNG) => PNG,
        _ => implied,
    };

    Ok(UploadKind {
        extension,
        media_type,
    })
}
