//! Rotation and skew estimation on grayscale rasters.
//!
//! Angles are in degrees; positive values rotate content clockwise as seen
//! on screen (image y axis pointing down).

use image::{GrayImage, Luma};

/// Pixels strictly darker than this count as ink when estimating skew.
pub const INK_THRESHOLD: u8 = 128;

/// Rotate about the centre keeping the canvas size. Pixels sampled from
/// outside the source replicate the nearest edge.
pub fn rotate_same_size(img: &GrayImage, degrees: f64) -> GrayImage {
    let (w, h) = img.dimensions();
    rotate_into(img, degrees, w, h)
}

/// Rotate about the centre onto a canvas large enough to hold the whole
/// rotated source (no cropping), replicating edges into new border pixels.
pub fn rotate_bound(img: &GrayImage, degrees: f64) -> GrayImage {
    let (w, h) = img.dimensions();
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (sin, cos) = (sin.abs(), cos.abs());
    let new_w = (h as f64 * sin + w as f64 * cos).round().max(1.0) as u32;
    let new_h = (h as f64 * cos + w as f64 * sin).round().max(1.0) as u32;
    rotate_into(img, degrees, new_w, new_h)
}

fn rotate_into(img: &GrayImage, degrees: f64, out_w: u32, out_h: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (src_cx, src_cy) = ((w as f64 - 1.0) / 2.0, (h as f64 - 1.0) / 2.0);
    let (dst_cx, dst_cy) = ((out_w as f64 - 1.0) / 2.0, (out_h as f64 - 1.0) / 2.0);

    GrayImage::from_fn(out_w, out_h, |x, y| {
        let dx = x as f64 - dst_cx;
        let dy = y as f64 - dst_cy;
        // Inverse of the clockwise rotation.
        let sx = src_cx + dx * cos + dy * sin;
        let sy = src_cy - dx * sin + dy * cos;
        Luma([sample_bilinear_clamped(img, sx, sy)])
    })
}

fn sample_bilinear_clamped(img: &GrayImage, x: f64, y: f64) -> u8 {
    let (w, h) = img.dimensions();
    let x = x.clamp(0.0, (w - 1) as f64);
    let y = y.clamp(0.0, (h - 1) as f64);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p = |px: u32, py: u32| img.get_pixel(px, py)[0] as f64;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pt {
    x: f64,
    y: f64,
}

fn cross(o: Pt, a: Pt, b: Pt) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Andrew's monotone chain. Returns the hull counter-clockwise without
/// repeating the first point.
fn convex_hull(mut points: Vec<Pt>) -> Vec<Pt> {
    points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let mut lower: Vec<Pt> = Vec::new();
    for &p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Pt> = Vec::new();
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Angle (degrees, in `(-45, 45]`) of the minimum-area rectangle enclosing
/// the hull, found with rotating calipers over the hull edges.
fn min_area_rect_angle(hull: &[Pt]) -> Option<f64> {
    if hull.len() < 3 {
        return None;
    }
    let mut best: Option<(f64, f64)> = None;
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let theta = (b.y - a.y).atan2(b.x - a.x);
        let (sin, cos) = theta.sin_cos();

        let (mut min_u, mut max_u, mut min_v, mut max_v) =
            (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for p in hull {
            let u = p.x * cos + p.y * sin;
            let v = -p.x * sin + p.y * cos;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
        let area = (max_u - min_u) * (max_v - min_v);
        if best.map_or(true, |(best_area, _)| area < best_area - 1e-9) {
            best = Some((area, theta.to_degrees()));
        }
    }
    best.map(|(_, angle)| fold_quarter_turn(angle))
}

/// Fold any angle into `(-45, 45]`; a rectangle is symmetric under 90° turns.
fn fold_quarter_turn(mut angle: f64) -> f64 {
    while angle > 45.0 {
        angle -= 90.0;
    }
    while angle <= -45.0 {
        angle += 90.0;
    }
    angle
}

/// Estimate the clockwise tilt of the ink on the page.
///
/// Only the leftmost and rightmost ink pixel of each row feed the hull; the
/// hull of those extremes equals the hull of all ink.
pub fn estimate_skew(img: &GrayImage) -> Option<f64> {
    let (w, h) = img.dimensions();
    let mut points = Vec::new();
    for y in 0..h {
        let mut first = None;
        let mut last = None;
        for x in 0..w {
            if img.get_pixel(x, y)[0] < INK_THRESHOLD {
                first.get_or_insert(x);
                last = Some(x);
            }
        }
        if let (Some(f), Some(l)) = (first, last) {
            points.push(Pt { x: f as f64, y: y as f64 });
            if l != f {
                points.push(Pt { x: l as f64, y: y as f64 });
            }
        }
    }
    min_area_rect_angle(&convex_hull(points))
}

/// Straighten the image if its estimated skew exceeds `threshold` degrees.
pub fn deskew(img: &GrayImage, threshold: f64) -> GrayImage {
    match estimate_skew(img) {
        Some(angle) if angle.abs() > threshold => {
            tracing::debug!(angle, "deskewing variant");
            rotate_same_size(img, -angle)
        }
        _ => img.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white(w: u32, h: u32) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([255]))
    }

    /// A dark bar drawn along a line tilted clockwise by `degrees`.
    fn tilted_bar(degrees: f64) -> GrayImage {
        let mut img = white(400, 400);
        let slope = degrees.to_radians().tan();
        for x in 50..350u32 {
            let yc = 200.0 + (x as f64 - 200.0) * slope;
            for dy in -6..=6 {
                let y = (yc + dy as f64).round() as u32;
                img.put_pixel(x, y, Luma([0]));
            }
        }
        img
    }

    #[test]
    fn quarter_turn_fold() {
        assert_eq!(fold_quarter_turn(90.0), 0.0);
        assert_eq!(fold_quarter_turn(-90.0), 0.0);
        assert_eq!(fold_quarter_turn(80.0), -10.0);
        assert_eq!(fold_quarter_turn(-45.0), 45.0);
    }

    #[test]
    fn axis_aligned_block_has_no_skew() {
        let mut img = white(100, 60);
        for y in 20..40 {
            for x in 10..90 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let angle = estimate_skew(&img).unwrap();
        assert!(angle.abs() < 1e-6, "angle was {angle}");
    }

    #[test]
    fn tilted_bar_skew_is_recovered() {
        let angle = estimate_skew(&tilted_bar(5.0)).unwrap();
        assert!((angle - 5.0).abs() < 1.0, "angle was {angle}");
        let angle = estimate_skew(&tilted_bar(-4.0)).unwrap();
        assert!((angle + 4.0).abs() < 1.0, "angle was {angle}");
    }

    #[test]
    fn blank_page_has_no_estimate() {
        assert_eq!(estimate_skew(&white(50, 50)), None);
    }

    #[test]
    fn deskew_keeps_dimensions_and_straightens() {
        let straightened = deskew(&tilted_bar(6.0), 0.5);
        assert_eq!(straightened.dimensions(), (400, 400));
        let residual = estimate_skew(&straightened).unwrap();
        assert!(residual.abs() < 1.5, "residual {residual}");
    }

    #[test]
    fn small_skew_is_left_alone() {
        let img = tilted_bar(0.2);
        assert_eq!(deskew(&img, 0.5), img);
    }

    #[test]
    fn rotate_bound_quarter_turn_swaps_dimensions() {
        let img = white(30, 10);
        let rotated = rotate_bound(&img, 90.0);
        assert_eq!(rotated.dimensions(), (10, 30));
    }

    #[test]
    fn rotate_bound_replicates_edges() {
        let img = GrayImage::from_pixel(20, 20, Luma([77]));
        let rotated = rotate_bound(&img, 30.0);
        assert!(rotated.width() > 20 && rotated.height() > 20);
        assert!(rotated.pixels().all(|p| p[0] == 77));
    }

    #[test]
    fn clockwise_convention() {
        // A dark pixel near the top-right corner moves to the bottom-right
        // after a clockwise quarter turn.
        let mut img = white(11, 11);
        img.put_pixel(10, 0, Luma([0]));
        let rotated = rotate_same_size(&img, 90.0);
        assert_eq!(rotated.get_pixel(10, 10)[0], 0);
    }
}
