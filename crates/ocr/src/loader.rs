use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extensions accepted by [`load_image`] (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Image not found: {0}")]
    NotFound(PathBuf),
    #[error("Unsupported image type: '{0}'")]
    UnsupportedFormat(String),
    #[error("Unable to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check the extension, then that the file exists. Nothing is read.
pub fn validate_path(path: &Path) -> Result<ImageFormat, LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(LoadError::UnsupportedFormat(ext));
    }
    let format =
        ImageFormat::from_extension(&ext).ok_or_else(|| LoadError::UnsupportedFormat(ext.clone()))?;
    if !path.is_file() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    Ok(format)
}

/// Validate and decode a receipt image.
pub fn load_image(path: &Path) -> Result<DynamicImage, LoadError> {
    let format = validate_path(path)?;
    decode(path, format)
}

/// Decode a file already accepted by [`validate_path`].
pub fn decode(path: &Path, format: ImageFormat) -> Result<DynamicImage, LoadError> {
    let bytes = std::fs::read(path)?;
    let img = image::load_from_memory_with_format(&bytes, format)?;
    tracing::debug!(
        path = %path.display(),
        width = img.width(),
        height = img.height(),
        "decoded receipt image"
    );
    Ok(img)
}
