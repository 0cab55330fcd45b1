// src/color_analysis.rs
//
// HSV-based cube color classification.
//
// Reference implementation of the ColorClassifier seam. Samples the
// central region of the bounding box (the sticker face, away from the
// cube's dark edges) and scores every known color by the fraction of
// sampled pixels that fall inside its HSV range.
//
// Ranges are wide and overlap (red/orange, yellow/orange). Each pixel
// may vote for several colors; the highest fraction wins.

use crate::interface::{Classification, ColorClassifier};
use crate::types::{BoundingBox, CubeColor};
use image::RgbImage;
use tracing::debug;

// ============================================================================
// HSV CONVERSION
// ============================================================================

/// Convert RGB to HSV.
/// Returns (H: 0-360, S: 0-100, V: 0-255).
#[inline]
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let r_n = r / 255.0;
    let g_n = g / 255.0;
    let b_n = b / 255.0;

    let max = r_n.max(g_n).max(b_n);
    let min = r_n.min(g_n).min(b_n);
    let delta = max - min;

    let h = if delta < 1e-6 {
        0.0
    } else if (max - r_n).abs() < 1e-6 {
        60.0 * (((g_n - b_n) / delta) % 6.0)
    } else if (max - g_n).abs() < 1e-6 {
        60.0 * (((b_n - r_n) / delta) + 2.0)
    } else {
        60.0 * (((r_n - g_n) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let s = if max < 1e-6 {
        0.0
    } else {
        (delta / max) * 100.0
    };

    (h, s, max * 255.0)
}

// ============================================================================
// COLOR RANGES
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct HsvRange {
    h_min: f32,
    h_max: f32,
    s_min: f32,
    s_max: f32,
    v_min: f32,
}

impl HsvRange {
    fn contains(&self, h: f32, s: f32, v: f32) -> bool {
        h >= self.h_min && h <= self.h_max && s >= self.s_min && s <= self.s_max && v >= self.v_min
    }
}

const fn range(h_min: f32, h_max: f32, s_min: f32, s_max: f32, v_min: f32) -> HsvRange {
    HsvRange {
        h_min,
        h_max,
        s_min,
        s_max,
        v_min,
    }
}

// Saturation floor shared by the chromatic colors (~80/255)
const SAT_FLOOR: f32 = 31.0;

fn ranges_for(color: CubeColor) -> &'static [HsvRange] {
    const WHITE: [HsvRange; 1] = [range(0.0, 360.0, 0.0, 31.0, 150.0)];
    const YELLOW: [HsvRange; 1] = [range(30.0, 70.0, SAT_FLOOR, 100.0, 80.0)];
    // Red wraps around hue 0
    const RED: [HsvRange; 2] = [
        range(0.0, 30.0, SAT_FLOOR, 100.0, 80.0),
        range(330.0, 360.0, SAT_FLOOR, 100.0, 80.0),
    ];
    const ORANGE: [HsvRange; 1] = [range(10.0, 50.0, SAT_FLOOR, 100.0, 80.0)];
    const BLUE: [HsvRange; 1] = [range(190.0, 270.0, 23.0, 100.0, 60.0)];
    const GREEN: [HsvRange; 1] = [range(70.0, 170.0, SAT_FLOOR, 100.0, 80.0)];

    match color {
        CubeColor::White => &WHITE,
        CubeColor::Yellow => &YELLOW,
        CubeColor::Red => &RED,
        CubeColor::Orange => &ORANGE,
        CubeColor::Blue => &BLUE,
        CubeColor::Green => &GREEN,
        CubeColor::Unknown => &[],
    }
}

/// Below this winning fraction the region is reported as unknown.
/// White and blue are harder to saturate under warm light.
fn min_fraction(color: CubeColor) -> f32 {
    match color {
        CubeColor::White => 0.015,
        CubeColor::Blue => 0.02,
        _ => 0.025,
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct HsvColorClassifier;

impl HsvColorClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl ColorClassifier for HsvColorClassifier {
    fn classify(&self, frame: &RgbImage, bbox: &BoundingBox) -> Classification {
        classify_cube_color(frame, bbox)
    }
}

/// Classify the dominant cube color inside `bbox`.
pub fn classify_cube_color(frame: &RgbImage, bbox: &BoundingBox) -> Classification {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    if width == 0 || height == 0 {
        return Classification::unknown(0.0);
    }

    let x1 = (bbox[0].max(0.0) as usize).min(width);
    let y1 = (bbox[1].max(0.0) as usize).min(height);
    let x2 = (bbox[2].max(0.0) as usize).min(width);
    let y2 = (bbox[3].max(0.0) as usize).min(height);
    if x2 <= x1 || y2 <= y1 {
        return Classification::unknown(0.0);
    }

    // Central square, half the smaller side
    let (w, h) = (x2 - x1, y2 - y1);
    let half = w.min(h) / 4;
    let (cx, cy) = (x1 + w / 2, y1 + h / 2);
    let (sx1, sx2) = (cx.saturating_sub(half), (cx + half).min(x2));
    let (sy1, sy2) = (cy.saturating_sub(half), (cy + half).min(y2));
    if sx2 <= sx1 || sy2 <= sy1 {
        return Classification::unknown(0.0);
    }

    let mut votes = [0u32; CubeColor::KNOWN.len()];
    let mut total: u32 = 0;

    for y in sy1..sy2 {
        for x in sx1..sx2 {
            let p = frame.get_pixel(x as u32, y as u32);
            let (h, s, v) = rgb_to_hsv(p[0] as f32, p[1] as f32, p[2] as f32);
            total += 1;
            for (i, color) in CubeColor::KNOWN.iter().enumerate() {
                if ranges_for(*color).iter().any(|r| r.contains(h, s, v)) {
                    votes[i] += 1;
                }
            }
        }
    }

    if total == 0 {
        return Classification::unknown(0.0);
    }

    let mut best = CubeColor::Unknown;
    let mut best_fraction = 0.0f32;
    for (i, color) in CubeColor::KNOWN.iter().enumerate() {
        let fraction = votes[i] as f32 / total as f32;
        if fraction > best_fraction {
            best = *color;
            best_fraction = fraction;
        }
    }

    if best == CubeColor::Unknown || best_fraction < min_fraction(best) {
        debug!(
            "🎨 No dominant color ({} samples, best={} {:.3})",
            total, best, best_fraction
        );
        return Classification::unknown(best_fraction);
    }

    Classification {
        color: best,
        confidence: best_fraction,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(r: u8, g: u8, b: u8) -> RgbImage {
        RgbImage::from_pixel(40, 40, Rgb([r, g, b]))
    }

    const FULL: BoundingBox = [0.0, 0.0, 40.0, 40.0];

    #[test]
    fn test_rgb_to_hsv_red() {
        let (h, s, v) = rgb_to_hsv(255.0, 0.0, 0.0);
        assert!((h - 0.0).abs() < 1.0);
        assert!((s - 100.0).abs() < 1.0);
        assert!((v - 255.0).abs() < 1.0);
    }

    #[test]
    fn test_rgb_to_hsv_blue() {
        let (h, s, _) = rgb_to_hsv(0.0, 0.0, 255.0);
        assert!((h - 240.0).abs() < 1.0);
        assert!((s - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_classify_primary_colors() {
        assert_eq!(classify_cube_color(&solid(255, 0, 0), &FULL).color, CubeColor::Red);
        assert_eq!(classify_cube_color(&solid(0, 0, 255), &FULL).color, CubeColor::Blue);
        assert_eq!(classify_cube_color(&solid(0, 200, 0), &FULL).color, CubeColor::Green);
        assert_eq!(
            classify_cube_color(&solid(255, 220, 0), &FULL).color,
            CubeColor::Yellow
        );
        assert_eq!(
            classify_cube_color(&solid(240, 240, 240), &FULL).color,
            CubeColor::White
        );
    }

    #[test]
    fn test_full_region_confidence_is_one() {
        let c = classify_cube_color(&solid(0, 0, 255), &FULL);
        assert!((c.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_dark_region_is_unknown() {
        let c = classify_cube_color(&solid(10, 10, 10), &FULL);
        assert_eq!(c.color, CubeColor::Unknown);
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_degenerate_bbox_is_unknown() {
        let c = classify_cube_color(&solid(255, 0, 0), &[30.0, 30.0, 30.0, 35.0]);
        assert_eq!(c.color, CubeColor::Unknown);

        let c = classify_cube_color(&solid(255, 0, 0), &[50.0, 50.0, 80.0, 80.0]);
        assert_eq!(c.color, CubeColor::Unknown);
    }

    #[test]
    fn test_samples_only_center_of_box() {
        // Blue border, red center: the sticker face wins
        let mut img = solid(0, 0, 255);
        for y in 12..28 {
            for x in 12..28 {
                img.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }
        let c = HsvColorClassifier::new().classify(&img, &FULL);
        assert_eq!(c.color, CubeColor::Red);
    }
}
