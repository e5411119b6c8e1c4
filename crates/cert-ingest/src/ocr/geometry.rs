//! Geometric correction for scanned page images
//!
//! Scans arrive rotated by quarter turns and skewed by a degree or two.
//! Residual skew is estimated by projecting Sobel edge pixels across a
//! range of candidate angles and picking the angle where text baselines
//! concentrate. When the recognizer's own orientation pass yields
//! nothing, the minimum-area rectangle around the ink gives a coarse
//! estimate instead. Rotation resamples bilinearly onto a white canvas.

use image::{GrayImage, Luma};

use crate::config::Region;

/// Gray values below this count as ink.
pub const INK_THRESHOLD: u8 = 128;

const EDGE_THRESHOLD: i32 = 200;
const SKEW_RANGE_DEG: f64 = 5.0;
const SKEW_STEP_DEG: f64 = 0.1;
const MIN_EDGE_POINTS: usize = 64;
const MAX_EDGE_POINTS: usize = 20_000;

/// Estimate the skew of text baselines in degrees.
///
/// Positive angles mean baselines descend to the right; correct with
/// `rotate_about_center(image, -skew)`. Images with too little edge
/// structure report 0.
pub fn estimate_skew(image: &GrayImage) -> f64 {
    let edges = sobel_edges(image);
    let mut points: Vec<(f64, f64)> = Vec::new();
    for (x, y, pixel) in edges.enumerate_pixels() {
        if pixel[0] > 0 {
            points.push((x as f64, y as f64));
        }
    }
    if points.len() < MIN_EDGE_POINTS {
        return 0.0;
    }
    if points.len() > MAX_EDGE_POINTS {
        let stride = points.len() / MAX_EDGE_POINTS + 1;
        points = points.into_iter().step_by(stride).collect();
    }

    let (width, height) = image.dimensions();
    let offset = width as f64 * SKEW_RANGE_DEG.to_radians().sin();
    let bins = (height as f64 + 2.0 * offset).ceil() as usize + 2;

    // Zero wins ties so a structureless page is never rotated.
    let mut best_angle = 0.0;
    let mut best_score = projection_score(&points, 0.0, offset, bins);

    let steps = (2.0 * SKEW_RANGE_DEG / SKEW_STEP_DEG).round() as i32;
    for i in 0..=steps {
        let angle = -SKEW_RANGE_DEG + i as f64 * SKEW_STEP_DEG;
        let score = projection_score(&points, angle, offset, bins);
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }
    best_angle
}

/// Concentration of edge points projected at `angle`: sum of squared
/// histogram counts, maximal when baselines collapse into few bins.
fn projection_score(points: &[(f64, f64)], angle: f64, offset: f64, bins: usize) -> u64 {
    let (sin, cos) = angle.to_radians().sin_cos();
    let mut histogram = vec![0u32; bins];
    for &(x, y) in points {
        let bin = (y * cos - x * sin + offset) as usize;
        if bin < bins {
            histogram[bin] += 1;
        }
    }
    histogram.iter().map(|&c| c as u64 * c as u64).sum()
}

fn sobel_edges(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut out = GrayImage::new(width, height);
    if width < 3 || height < 3 {
        return out;
    }
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let p = |dx: i32, dy: i32| -> i32 {
                image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i32
            };
            let gx = -p(-1, -1) - 2 * p(-1, 0) - p(-1, 1) + p(1, -1) + 2 * p(1, 0) + p(1, 1);
            let gy = -p(-1, -1) - 2 * p(0, -1) - p(1, -1) + p(-1, 1) + 2 * p(0, 1) + p(1, 1);
            if gx * gx + gy * gy > EDGE_THRESHOLD * EDGE_THRESHOLD {
                out.put_pixel(x, y, Luma([255]));
            }
        }
    }
    out
}

/// Coarse orientation from the minimum-area rectangle around the ink.
///
/// Returns the angle of the rectangle's long side in (-90, 90] degrees.
/// Cannot distinguish upright from upside-down; callers use it only to
/// decide quarter turns.
pub fn orientation_from_ink(image: &GrayImage) -> f64 {
    let points = ink_points(image);
    if points.len() < 3 {
        return 0.0;
    }
    let hull = convex_hull(&points);
    if hull.len() < 3 {
        return 0.0;
    }
    min_area_rect_angle(&hull)
}

fn ink_points(image: &GrayImage) -> Vec<(i64, i64)> {
    let (width, height) = image.dimensions();
    let total = width as usize * height as usize;
    let stride = (((total / 40_000).max(1)) as f64).sqrt().ceil() as u32;
    let mut points = Vec::new();
    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            if image.get_pixel(x, y)[0] < INK_THRESHOLD {
                points.push((x as i64, y as i64));
            }
            x += stride;
        }
        y += stride;
    }
    points
}

/// Andrew's monotone chain, counter-clockwise hull without collinear points.
fn convex_hull(points: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut pts: Vec<(i64, i64)> = points.to_vec();
    pts.sort_unstable();
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }
    let cross = |o: (i64, i64), a: (i64, i64), b: (i64, i64)| -> i64 {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };
    let mut lower: Vec<(i64, i64)> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(i64, i64)> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn min_area_rect_angle(hull: &[(i64, i64)]) -> f64 {
    let mut best_area = f64::MAX;
    let mut best_angle = 0.0;
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let dx = (b.0 - a.0) as f64;
        let dy = (b.1 - a.1) as f64;
        let len = (dx * dx + dy * dy).sqrt();
        if len == 0.0 {
            continue;
        }
        let (ux, uy) = (dx / len, dy / len);
        let (nx, ny) = (-uy, ux);
        let mut min_u = f64::MAX;
        let mut max_u = f64::MIN;
        let mut min_n = f64::MAX;
        let mut max_n = f64::MIN;
        for &(px, py) in hull {
            let u = px as f64 * ux + py as f64 * uy;
            let n = px as f64 * nx + py as f64 * ny;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_n = min_n.min(n);
            max_n = max_n.max(n);
        }
        let side_u = max_u - min_u;
        let side_n = max_n - min_n;
        let area = side_u * side_n;
        if area < best_area {
            best_area = area;
            best_angle = if side_u >= side_n {
                uy.atan2(ux)
            } else {
                ny.atan2(nx)
            };
        }
    }
    normalize_half_turn(best_angle.to_degrees())
}

fn normalize_half_turn(mut degrees: f64) -> f64 {
    while degrees > 90.0 {
        degrees -= 180.0;
    }
    while degrees <= -90.0 {
        degrees += 180.0;
    }
    degrees
}

/// Rotate image content by `degrees` about the center, same dimensions,
/// white fill where the source runs out.
pub fn rotate_about_center(image: &GrayImage, degrees: f64) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut out = GrayImage::from_pixel(width, height, Luma([255]));
    if width == 0 || height == 0 {
        return out;
    }
    // Inverse mapping: each output pixel samples the source rotated back.
    let (sin, cos) = (-degrees).to_radians().sin_cos();
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    for y in 0..height {
        for x in 0..width {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let sx = cx + dx * cos - dy * sin;
            let sy = cy + dx * sin + dy * cos;
            if let Some(v) = bilinear_sample(image, sx, sy) {
                out.put_pixel(x, y, Luma([v]));
            }
        }
    }
    out
}

fn bilinear_sample(image: &GrayImage, x: f64, y: f64) -> Option<u8> {
    let (width, height) = image.dimensions();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f64 || y > (height - 1) as f64 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let p00 = image.get_pixel(x0, y0)[0] as f64;
    let p10 = image.get_pixel(x1, y0)[0] as f64;
    let p01 = image.get_pixel(x0, y1)[0] as f64;
    let p11 = image.get_pixel(x1, y1)[0] as f64;
    let top = p00 + (p10 - p00) * fx;
    let bottom = p01 + (p11 - p01) * fx;
    Some((top + (bottom - top) * fy).round() as u8)
}

/// Crop a fractional region out of a page image.
pub fn crop_region(image: &GrayImage, region: &Region) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let left = ((region.left * width as f64) as u32).min(width - 1);
    let top = ((region.top * height as f64) as u32).min(height - 1);
    let crop_w = ((region.width * width as f64) as u32).clamp(1, width - left);
    let crop_h = ((region.height * height as f64) as u32).clamp(1, height - top);
    image::imageops::crop_imm(image, left, top, crop_w, crop_h).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// White page with dark 2px-thick baselines at the given slope angle.
    fn page_with_lines(width: u32, height: u32, degrees: f64) -> GrayImage {
        let mut image = GrayImage::from_pixel(width, height, Luma([255]));
        let slope = degrees.to_radians().tan();
        for y0 in (40..height - 40).step_by(40) {
            for x in 20..width - 20 {
                let y = y0 as f64 + (x as f64 - width as f64 / 2.0) * slope;
                let yi = y.round() as i64;
                for dy in 0..2i64 {
                    let yy = yi + dy;
                    if yy >= 0 && (yy as u32) < height {
                        image.put_pixel(x, yy as u32, Luma([0]));
                    }
                }
            }
        }
        image
    }

    #[test]
    fn test_estimate_skew_recovers_drawn_angle() {
        let image = page_with_lines(400, 300, 2.0);
        let skew = estimate_skew(&image);
        assert!((skew - 2.0).abs() < 0.3, "estimated {skew}");
    }

    #[test]
    fn test_estimate_skew_zero_for_straight_lines() {
        let image = page_with_lines(400, 300, 0.0);
        let skew = estimate_skew(&image);
        assert!(skew.abs() < 0.2, "estimated {skew}");
    }

    #[test]
    fn test_blank_page_reports_no_skew() {
        let image = GrayImage::from_pixel(200, 200, Luma([255]));
        assert_eq!(estimate_skew(&image), 0.0);
    }

    #[test]
    fn test_rotation_then_correction_round_trip() {
        let image = page_with_lines(400, 300, 0.0);
        let rotated = rotate_about_center(&image, 3.0);
        let skew = estimate_skew(&rotated);
        assert!((skew - 3.0).abs() < 0.4, "estimated {skew}");
        let corrected = rotate_about_center(&rotated, -skew);
        let residual = estimate_skew(&corrected);
        assert!(residual.abs() < 0.4, "residual {residual}");
    }

    #[test]
    fn test_orientation_from_ink_wide_block() {
        let mut image = GrayImage::from_pixel(300, 300, Luma([255]));
        for y in 130..170 {
            for x in 50..250 {
                image.put_pixel(x, y, Luma([0]));
            }
        }
        let angle = orientation_from_ink(&image);
        assert!(angle.abs() < 2.0, "angle {angle}");
    }

    #[test]
    fn test_orientation_from_ink_tall_block() {
        let mut image = GrayImage::from_pixel(300, 300, Luma([255]));
        for y in 50..250 {
            for x in 130..170 {
                image.put_pixel(x, y, Luma([0]));
            }
        }
        let angle = orientation_from_ink(&image);
        assert!((angle.abs() - 90.0).abs() < 2.0, "angle {angle}");
    }

    #[test]
    fn test_orientation_from_ink_rotated_block() {
        let mut image = GrayImage::from_pixel(400, 400, Luma([255]));
        let (sin, cos) = 30.0f64.to_radians().sin_cos();
        for y in 0..400u32 {
            for x in 0..400u32 {
                let dx = x as f64 - 200.0;
                let dy = y as f64 - 200.0;
                let u = dx * cos + dy * sin;
                let n = -dx * sin + dy * cos;
                if u.abs() <= 120.0 && n.abs() <= 30.0 {
                    image.put_pixel(x, y, Luma([0]));
                }
            }
        }
        let angle = orientation_from_ink(&image);
        assert!((angle - 30.0).abs() < 2.0, "angle {angle}");
    }

    #[test]
    fn test_crop_region_dimensions() {
        let image = GrayImage::from_pixel(200, 100, Luma([255]));
        let region = Region {
            left: 0.1,
            top: 0.2,
            width: 0.5,
            height: 0.5,
        };
        let cropped = crop_region(&image, &region);
        assert_eq!(cropped.dimensions(), (100, 50));
    }
}
