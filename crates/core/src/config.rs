//! Pipeline configuration.
//!
//! Every tunable is a named constant with a serde-overridable field on
//! [`Config`]. Thresholds are plain call parameters, not process-wide state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Chrome remote-debugging port.
pub const DEFAULT_DEBUG_PORT: u16 = 9222;

/// Overall score at/above which a validation passes.
pub const DEFAULT_PASS_THRESHOLD: f64 = 90.0;

/// Overall score at/above which a failing validation is reported PARTIAL.
pub const PARTIAL_THRESHOLD: f64 = 50.0;

/// Per-pixel color-distance threshold (0.0 = exact, 1.0 = anything matches).
pub const DEFAULT_PIXEL_THRESHOLD: f64 = 0.1;

/// Either axis above this many pixels forces the tiled comparison path.
pub const MAX_UNTILED_DIMENSION: u32 = 4096;

/// Square tile edge for the tiled path.
pub const DEFAULT_CHUNK_SIZE: u32 = 2048;

/// Per-step browser/navigation timeout.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay after load event so late-painting content (fonts, images) settles.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Window within which a freshly spawned browser must become reachable.
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Interval between debugging-port probes while waiting for launch.
pub const LAUNCH_PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// Reference-image fetch attempts before a unit is marked failed.
pub const FETCH_RETRIES: u32 = 3;

/// Fixed delay between reference-image fetch attempts.
pub const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Cap on worst-chunk entries carried into a consolidated report.
pub const MAX_PROBLEM_AREAS: usize = 6;

/// Longest edge of a diff thumbnail embedded in a report.
pub const THUMBNAIL_MAX_EDGE: u32 = 512;

/// Grid cells below this local mismatch percentage are not reported.
pub const REGION_REPORT_FLOOR: f64 = 5.0;

/// Local mismatch percentage above which a region is critical.
pub const SEVERITY_CRITICAL: f64 = 30.0;

/// Local mismatch percentage above which a region is moderate.
pub const SEVERITY_MODERATE: f64 = 15.0;

/// Vertical gap between siblings that starts a new section band.
pub const SECTION_GAP_PX: f64 = 50.0;

/// Cap on recommendations in a merged report.
pub const MAX_RECOMMENDATIONS: usize = 10;

/// Caller-facing configuration; all fields default to the constants above.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote-debugging port to probe/launch on.
    pub debug_port: u16,
    /// Overall pass threshold (0-100).
    pub pass_threshold: f64,
    /// Per-pixel color-distance threshold.
    pub pixel_threshold: f64,
    /// Tile edge for the tiled path.
    pub chunk_size: u32,
    /// Axis limit above which tiling kicks in.
    pub max_untiled_dimension: u32,
    /// Per-step navigation/capture timeout.
    #[serde(with = "duration_secs")]
    pub navigation_timeout: Duration,
    /// Whether anti-aliased pixels count as mismatches.
    pub include_aa: bool,
    /// Whether reports embed base64 diff images/thumbnails.
    pub include_diff_image: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug_port: DEFAULT_DEBUG_PORT,
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            pixel_threshold: DEFAULT_PIXEL_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_untiled_dimension: MAX_UNTILED_DIMENSION,
            navigation_timeout: NAVIGATION_TIMEOUT,
            include_aa: false,
            include_diff_image: true,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
