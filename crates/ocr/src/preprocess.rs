use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::{gaussian_blur_f32, median_filter};

use crate::geometry;
use crate::types::{Variant, VariantKind};

/// Knobs for [`generate_variants`]. Defaults match the receipt profile.
#[derive(Debug, Clone)]
pub struct VariantSettings {
    /// Images whose larger side is below this are upscaled to it.
    pub min_working_size: u32,
    /// White padding added around every variant.
    pub border: u32,
    /// Skew (degrees) tolerated before a variant is rotated straight.
    pub skew_threshold: f64,
    pub clahe_clip_limit: f32,
    pub clahe_grid: u32,
    /// Gaussian sigma of the local threshold window (31 px block).
    pub adaptive_sigma: f32,
    /// Offset subtracted from the local mean before comparing.
    pub adaptive_offset: f32,
}

impl Default for VariantSettings {
    fn default() -> Self {
        Self {
            min_working_size: 1900,
            border: 8,
            skew_threshold: 0.5,
            clahe_clip_limit: 2.5,
            clahe_grid: 8,
            adaptive_sigma: 5.0,
            adaptive_offset: 9.0,
        }
    }
}

/// Produce the eight preprocessed variants of an oriented image, in
/// [`VariantKind::ALL`] order.
pub fn generate_variants(img: &DynamicImage, settings: &VariantSettings) -> Vec<Variant> {
    let gray = upscale_to_working_size(img.to_luma8(), settings.min_working_size);

    let contrast = clahe(&gray, settings.clahe_clip_limit, settings.clahe_grid);
    let sharpened = unsharp(&median_filter(&contrast, 1, 1));
    let otsu = otsu_binarize(&sharpened);
    let adaptive = adaptive_binarize(&sharpened, settings.adaptive_sigma, settings.adaptive_offset);
    let otsu_inverted = inverted(&otsu);
    let adaptive_inverted = inverted(&adaptive);
    let gray_inverted = inverted(&gray);

    let rasters = [
        contrast,
        sharpened,
        otsu,
        adaptive,
        otsu_inverted,
        adaptive_inverted,
        gray,
        gray_inverted,
    ];

    VariantKind::ALL
        .into_iter()
        .zip(rasters)
        .map(|(kind, raster)| {
            let straight = geometry::deskew(&raster, settings.skew_threshold);
            Variant { kind, image: pad(&straight, settings.border) }
        })
        .collect()
}

/// Cubic upscale so the larger side reaches `min_size`. Never downscales.
fn upscale_to_working_size(gray: GrayImage, min_size: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let max_dim = w.max(h);
    if max_dim == 0 || max_dim >= min_size {
        return gray;
    }
    let scale = min_size as f64 / max_dim as f64;
    let new_w = ((w as f64 * scale).round() as u32).max(1);
    let new_h = ((h as f64 * scale).round() as u32).max(1);
    imageops::resize(&gray, new_w, new_h, FilterType::CatmullRom)
}

/// Contrast-limited adaptive histogram equalization.
///
/// Per-tile histograms are clipped at `clip_limit` times the mean bin count,
/// the excess is spread evenly, and each pixel's value is interpolated
/// bilinearly between the four nearest tile mappings.
fn clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let tiles_x = grid.min(w).max(1);
    let tiles_y = grid.min(h).max(1);
    let bounds = |i: u32, tiles: u32, len: u32| (i * len / tiles, (i + 1) * len / tiles);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        let (y0, y1) = bounds(ty, tiles_y, h);
        for tx in 0..tiles_x {
            let (x0, x1) = bounds(tx, tiles_x, w);
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            luts[(ty * tiles_x + tx) as usize] = clipped_equalization(&mut hist, area, clip_limit);
        }
    }

    // Tile centres, used as interpolation anchors.
    let centre = |i: u32, tiles: u32, len: u32| {
        let (a, b) = bounds(i, tiles, len);
        (a + b) as f32 / 2.0
    };
    let anchor = |pos: f32, tiles: u32, len: u32| -> (u32, u32, f32) {
        let first = centre(0, tiles, len);
        if tiles == 1 || pos <= first {
            return (0, 0, 0.0);
        }
        for i in 0..tiles - 1 {
            let (c0, c1) = (centre(i, tiles, len), centre(i + 1, tiles, len));
            if pos <= c1 {
                return (i, i + 1, (pos - c0) / (c1 - c0));
            }
        }
        (tiles - 1, tiles - 1, 0.0)
    };

    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y)[0] as usize;
        let (tx0, tx1, fx) = anchor(x as f32 + 0.5, tiles_x, w);
        let (ty0, ty1, fy) = anchor(y as f32 + 0.5, tiles_y, h);
        let lut = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][v] as f32;
        let top = lut(tx0, ty0) * (1.0 - fx) + lut(tx1, ty0) * fx;
        let bottom = lut(tx0, ty1) * (1.0 - fx) + lut(tx1, ty1) * fx;
        Luma([(top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8])
    })
}

fn clipped_equalization(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if area == 0 {
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = i as u8;
        }
        return lut;
    }

    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share + u32::from(i < remainder);
    }

    let scale = 255.0 / area as f32;
    let mut cumulative = 0u32;
    for (slot, &count) in lut.iter_mut().zip(hist.iter()) {
        cumulative += count;
        *slot = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// `1.5 * img - 0.5 * blur(img)` saturated to 8 bits, then stretched back to
/// the full range. Edge overshoot is clipped, so flat regions keep their level.
fn unsharp(gray: &GrayImage) -> GrayImage {
    let blurred = gaussian_blur_f32(gray, 1.0);
    let values: Vec<f32> = gray
        .pixels()
        .zip(blurred.pixels())
        .map(|(p, b)| (1.5 * p[0] as f32 - 0.5 * b[0] as f32).round().clamp(0.0, 255.0))
        .collect();
    stretch_contrast(gray.width(), gray.height(), &values)
}

/// Min-max stretch of raw intensities into `0..=255`.
fn stretch_contrast(width: u32, height: u32, values: &[f32]) -> GrayImage {
    let (min_px, max_px) = values
        .iter()
        .fold((f32::MAX, f32::MIN), |(mn, mx), &v| (mn.min(v), mx.max(v)));

    if values.is_empty() || max_px <= min_px {
        // Uniform image, nothing to stretch.
        return ImageBuffer::from_fn(width, height, |x, y| {
            let v = values.get((y * width + x) as usize).copied().unwrap_or(0.0);
            Luma([v.round().clamp(0.0, 255.0) as u8])
        });
    }

    let range = max_px - min_px;
    ImageBuffer::from_fn(width, height, |x, y| {
        let v = values[(y * width + x) as usize];
        Luma([((v - min_px) * 255.0 / range).round() as u8])
    })
}

/// Global binarization at the Otsu level: brighter than the level is white.
fn otsu_binarize(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    binarize_with(gray, |_, _| level as f32)
}

/// Local binarization against a Gaussian-weighted neighbourhood mean.
fn adaptive_binarize(gray: &GrayImage, sigma: f32, offset: f32) -> GrayImage {
    let local = gaussian_blur_f32(gray, sigma);
    binarize_with(gray, |x, y| local.get_pixel(x, y)[0] as f32 - offset)
}

fn binarize_with(gray: &GrayImage, threshold: impl Fn(u32, u32) -> f32) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0] as f32;
        Luma([if v > threshold(x, y) { 255 } else { 0 }])
    })
}

fn inverted(gray: &GrayImage) -> GrayImage {
    let mut out = gray.clone();
    imageops::invert(&mut out);
    out
}

fn pad(gray: &GrayImage, border: u32) -> GrayImage {
    if border == 0 {
        return gray.clone();
    }
    let mut canvas = GrayImage::from_pixel(
        gray.width() + 2 * border,
        gray.height() + 2 * border,
        Luma([255]),
    );
    imageops::replace(&mut canvas, gray, border as i64, border as i64);
    canvas
}
