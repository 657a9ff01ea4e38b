use image::DynamicImage;

use crate::geometry;
use crate::recognizer::OcrBackend;

/// Undo gross page rotation reported by the engine's orientation detector.
///
/// Quarter turns are applied exactly; any other angle is rotated onto an
/// enlarged canvas with replicated edges. Detector failure is not an error:
/// the image is returned unchanged.
pub fn normalize_orientation<R: OcrBackend + ?Sized>(img: DynamicImage, backend: &R) -> DynamicImage {
    let degrees = match backend.detect_rotation(&img) {
        Ok(d) => d % 360,
        Err(e) => {
            tracing::warn!("orientation detection failed, keeping image as-is: {e}");
            return img;
        }
    };

    match degrees {
        0 => img,
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        other => {
            tracing::debug!(degrees = other, "rotating by non-quarter angle");
            DynamicImage::ImageLuma8(geometry::rotate_bound(&img.to_luma8(), other as f64))
        }
    }
}
