//! Pixel-accurate image comparison with spatial defect localization.
//!
//! Two equal-dimension RGBA rasters are diffed pixel-by-pixel using a YIQ
//! color distance with an optional anti-aliasing tolerance, then mismatches
//! are partitioned into a 3x3 grid of compass-labelled regions with severity
//! and likely-cause annotations. Dimension mismatches fail fast; resizing to
//! compare would hide real layout differences.

use crate::raster::Raster;
use pagelens_core::config::{
    REGION_REPORT_FLOOR, SEVERITY_CRITICAL, SEVERITY_MODERATE,
};
use pagelens_core::{Error, Result, Severity};
use serde::{Deserialize, Serialize};

/// Recognized comparison options with explicit defaults.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    /// Color-distance threshold in [0, 1]; 0 demands exact equality.
    pub threshold: f64,
    /// When true, anti-aliased pixels count as mismatches.
    pub include_aa: bool,
    /// Opacity of the dimmed original under the diff overlay.
    pub alpha: f64,
    /// Render the mismatch mask as a base64 PNG for inspection.
    pub include_diff_image: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            include_aa: false,
            alpha: 0.1,
            include_diff_image: false,
        }
    }
}

/// Pixel-space rectangle of one grid cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CellBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One 3x3 grid cell whose local mismatch exceeded the reporting floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    /// Compass label ("top-left" .. "bottom-right").
    pub area: String,
    pub bounds: CellBounds,
    pub mismatch_percent: f64,
    pub severity: Severity,
    pub possible_cause: String,
}

/// Result of one pixel comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    /// 100 * (total - mismatched) / total.
    pub match_score: f64,
    pub mismatched_pixels: u64,
    pub total_pixels: u64,
    pub regions: Vec<Region>,
    /// Base64 PNG of the visual diff, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_image: Option<String>,
}

const COMPASS_LABELS: [[&str; 3]; 3] = [
    ["top-left", "top-center", "top-right"],
    ["middle-left", "center", "middle-right"],
    ["bottom-left", "bottom-center", "bottom-right"],
];

/// Ordered magnitude -> cause table; first row whose threshold the local
/// mismatch exceeds wins.
const CAUSE_TABLE: [(f64, &str); 4] = [
    (50.0, "missing or extra major element"),
    (30.0, "wrong component variant or layout shift"),
    (15.0, "color, font, or spacing drift"),
    (0.0, "minor rendering differences (anti-aliasing, sub-pixel shifts)"),
];

fn possible_cause(mismatch_percent: f64) -> &'static str {
    for (floor, cause) in CAUSE_TABLE {
        if mismatch_percent > floor {
            return cause;
        }
    }
    CAUSE_TABLE[CAUSE_TABLE.len() - 1].1
}

fn severity_for(mismatch_percent: f64) -> Severity {
    if mismatch_percent > SEVERITY_CRITICAL {
        Severity::Critical
    } else if mismatch_percent > SEVERITY_MODERATE {
        Severity::Moderate
    } else {
        Severity::Minor
    }
}

// Mask values for one compared pixel.
const PX_SAME: u8 = 0;
const PX_DIFF: u8 = 1;
const PX_AA: u8 = 2;

/// Compare two equal-dimension rasters.
pub fn compare(a: &Raster, b: &Raster, options: &CompareOptions) -> Result<Comparison> {
    if a.width() != b.width() || a.height() != b.height() {
        return Err(Error::DimensionMismatch {
            expected_width: a.width(),
            expected_height: a.height(),
            actual_width: b.width(),
            actual_height: b.height(),
        });
    }
    let (width, height) = (a.width(), a.height());
    let total_pixels = a.total_pixels();
    if total_pixels == 0 {
        return Err(Error::Comparison("cannot compare empty images".into()));
    }

    let mut mask = vec![PX_SAME; total_pixels as usize];
    let mut mismatched: u64 = 0;

    if a.pixels() != b.pixels() {
        // Squared YIQ distance for a fully-different pixel pair is 35215.
        let max_delta = 35215.0 * options.threshold * options.threshold;
        for y in 0..height {
            for x in 0..width {
                let delta = color_delta(a.pixel(x, y), b.pixel(x, y), false);
                if delta.abs() > max_delta {
                    let idx = (y * width + x) as usize;
                    if !options.include_aa
                        && (antialiased(a, x, y, b) || antialiased(b, x, y, a))
                    {
                        mask[idx] = PX_AA;
                    } else {
                        mask[idx] = PX_DIFF;
                        mismatched += 1;
                    }
                }
            }
        }
    }

    let match_score = 100.0 * (total_pixels - mismatched) as f64 / total_pixels as f64;
    let regions = localize_regions(&mask, width, height);
    let diff_image = if options.include_diff_image {
        Some(render_diff(a, &mask, options.alpha)?.to_png_base64()?)
    } else {
        None
    };

    Ok(Comparison {
        match_score,
        mismatched_pixels: mismatched,
        total_pixels,
        regions,
        diff_image,
    })
}

/// Partition the mask into a 3x3 grid and report cells above the floor,
/// sorted critical-first then by mismatch magnitude.
fn localize_regions(mask: &[u8], width: u32, height: u32) -> Vec<Region> {
    let cell_w = width / 3;
    let cell_h = height / 3;
    let mut regions = Vec::new();

    for row in 0..3u32 {
        for col in 0..3u32 {
            let x0 = col * cell_w;
            let y0 = row * cell_h;
            // Last row/column absorbs the remainder pixels.
            let x1 = if col == 2 { width } else { (col + 1) * cell_w };
            let y1 = if row == 2 { height } else { (row + 1) * cell_h };
            let cell_pixels = (x1 - x0) as u64 * (y1 - y0) as u64;
            if cell_pixels == 0 {
                continue;
            }

            let mut bad: u64 = 0;
            for y in y0..y1 {
                for x in x0..x1 {
                    if mask[(y * width + x) as usize] == PX_DIFF {
                        bad += 1;
                    }
                }
            }
            let pct = 100.0 * bad as f64 / cell_pixels as f64;
            if pct > REGION_REPORT_FLOOR {
                regions.push(Region {
                    area: COMPASS_LABELS[row as usize][col as usize].to_string(),
                    bounds: CellBounds {
                        x: x0,
                        y: y0,
                        width: x1 - x0,
                        height: y1 - y0,
                    },
                    mismatch_percent: pct,
                    severity: severity_for(pct),
                    possible_cause: possible_cause(pct).to_string(),
                });
            }
        }
    }

    regions.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.mismatch_percent.total_cmp(&a.mismatch_percent))
    });
    regions
}

/// Render the mask over a dimmed grayscale base: red = mismatch, yellow =
/// tolerated anti-aliasing.
fn render_diff(base: &Raster, mask: &[u8], alpha: f64) -> Result<Raster> {
    let (width, height) = (base.width(), base.height());
    let mut out = Vec::with_capacity(mask.len() * 4);
    for y in 0..height {
        for x in 0..width {
            match mask[(y * width + x) as usize] {
                PX_DIFF => out.extend_from_slice(&[255, 0, 0, 255]),
                PX_AA => out.extend_from_slice(&[255, 255, 0, 255]),
                _ => {
                    let px = base.pixel(x, y);
                    let luma = rgb2y(px[0] as f64, px[1] as f64, px[2] as f64);
                    let v = blend(luma, alpha * px[3] as f64 / 255.0) as u8;
                    out.extend_from_slice(&[v, v, v, 255]);
                }
            }
        }
    }
    Raster::from_rgba8(width, height, out)
}

// ─── YIQ color distance (pixelmatch semantics) ────────────────────────

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.298_895_31 + g * 0.586_622_47 + b * 0.114_482_23
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.595_977_99 - g * 0.274_172_1 - b * 0.321_805_89
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.211_470_17 - g * 0.522_617_11 + b * 0.311_146_94
}

/// Blend a channel value onto white by `alpha`.
fn blend(channel: f64, alpha: f64) -> f64 {
    255.0 + (channel - 255.0) * alpha
}

/// Squared perceptual distance between two RGBA pixels. With `y_only`, just
/// the brightness delta (used by the anti-aliasing detector), signed so the
/// darker/lighter direction is preserved.
fn color_delta(p1: [u8; 4], p2: [u8; 4], y_only: bool) -> f64 {
    if p1 == p2 {
        return 0.0;
    }

    let a1 = p1[3] as f64 / 255.0;
    let a2 = p2[3] as f64 / 255.0;
    let (r1, g1, b1) = (
        blend(p1[0] as f64, a1),
        blend(p1[1] as f64, a1),
        blend(p1[2] as f64, a1),
    );
    let (r2, g2, b2) = (
        blend(p2[0] as f64, a2),
        blend(p2[1] as f64, a2),
        blend(p2[2] as f64, a2),
    );

    let y = rgb2y(r1, g1, b1) - rgb2y(r2, g2, b2);
    if y_only {
        return y;
    }
    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);
    0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q
}

/// Whether the pixel at (x, y) looks like an anti-aliasing artifact:
/// a brightness gradient pixel whose darkest/lightest neighbour belongs to a
/// larger flat area in both images.
fn antialiased(img: &Raster, x: u32, y: u32, other: &Raster) -> bool {
    let (width, height) = (img.width(), img.height());
    let x0 = x.saturating_sub(1);
    let y0 = y.saturating_sub(1);
    let x1 = (x + 1).min(width - 1);
    let y1 = (y + 1).min(height - 1);
    let center = img.pixel(x, y);

    // Edge pixels start with one implicit equal neighbour.
    let mut zeroes = if x == x0 || x == x1 || y == y0 || y == y1 { 1 } else { 0 };
    let mut min = 0.0f64;
    let mut max = 0.0f64;
    let mut min_pos = (0u32, 0u32);
    let mut max_pos = (0u32, 0u32);

    for ny in y0..=y1 {
        for nx in x0..=x1 {
            if nx == x && ny == y {
                continue;
            }
            let delta = color_delta(center, img.pixel(nx, ny), true);
            if delta == 0.0 {
                zeroes += 1;
                // More than two equal siblings means a flat area, not AA.
                if zeroes > 2 {
                    return false;
                }
            } else if delta < min {
                min = delta;
                min_pos = (nx, ny);
            } else if delta > max {
                max = delta;
                max_pos = (nx, ny);
            }
        }
    }

    // Not both darker and lighter neighbours: not an AA gradient.
    if min == 0.0 || max == 0.0 {
        return false;
    }

    (has_many_siblings(img, min_pos.0, min_pos.1) && has_many_siblings(other, min_pos.0, min_pos.1))
        || (has_many_siblings(img, max_pos.0, max_pos.1)
            && has_many_siblings(other, max_pos.0, max_pos.1))
}

/// Whether a pixel has three or more identically-colored adjacent pixels.
fn has_many_siblings(img: &Raster, x: u32, y: u32) -> bool {
    let (width, height) = (img.width(), img.height());
    let x0 = x.saturating_sub(1);
    let y0 = y.saturating_sub(1);
    let x1 = (x + 1).min(width - 1);
    let y1 = (y + 1).min(height - 1);
    let center = img.pixel(x, y);

    let mut zeroes = if x == x0 || x == x1 || y == y0 || y == y1 { 1 } else { 0 };
    for ny in y0..=y1 {
        for nx in x0..=x1 {
            if nx == x && ny == y {
                continue;
            }
            if center == img.pixel(nx, ny) {
                zeroes += 1;
            }
            if zeroes > 2 {
                return true;
            }
        }
    }
    false
}
