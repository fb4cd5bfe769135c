//! Tiled comparison for oversized targets.
//!
//! Full-resolution diffing of very large canvases is slow and exceeds common
//! raster-processing ceilings, so targets above [`MAX_UNTILED_DIMENSION`] are
//! decomposed into a grid of bounded square chunks, compared one at a time,
//! and statistically consolidated into a single pixel-weighted score. One bad
//! chunk is recorded, never fatal to the run.

use crate::compare::{compare, CompareOptions};
use crate::raster::Raster;
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use pagelens_core::config::{
    DEFAULT_CHUNK_SIZE, FETCH_RETRIES, FETCH_RETRY_DELAY, MAX_PROBLEM_AREAS,
    MAX_UNTILED_DIMENSION, THUMBNAIL_MAX_EDGE,
};
use pagelens_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// True when either axis exceeds the safe single-pass raster limit.
pub fn needs_tiling(width: u32, height: u32) -> bool {
    width > MAX_UNTILED_DIMENSION || height > MAX_UNTILED_DIMENSION
}

/// One cell of a tiling grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub col: u32,
    pub row: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_count: u64,
}

/// A grid of fixed-size square chunks fully tiling the target rectangle,
/// final row/column clipped to the remaining extent. No gaps, no overlaps.
#[derive(Debug, Clone)]
pub struct ChunkGrid {
    pub cols: u32,
    pub rows: u32,
    pub chunks: Vec<Chunk>,
}

impl ChunkGrid {
    pub fn new(width: u32, height: u32, chunk_size: u32) -> Result<Self> {
        if width == 0 || height == 0 || chunk_size == 0 {
            return Err(Error::InvalidTarget(format!(
                "cannot tile a {}x{} target with chunk size {}",
                width, height, chunk_size
            )));
        }
        let cols = width.div_ceil(chunk_size);
        let rows = height.div_ceil(chunk_size);
        let mut chunks = Vec::with_capacity((cols * rows) as usize);
        for row in 0..rows {
            for col in 0..cols {
                let x = col * chunk_size;
                let y = row * chunk_size;
                let w = chunk_size.min(width - x);
                let h = chunk_size.min(height - y);
                chunks.push(Chunk {
                    id: format!("chunk-{}-{}", row, col),
                    col,
                    row,
                    x,
                    y,
                    width: w,
                    height: h,
                    pixel_count: w as u64 * h as u64,
                });
            }
        }
        Ok(Self { cols, rows, chunks })
    }
}

/// Outcome of one chunk. A failed fetch/capture/compare is recorded with
/// `match_score: 0` and the error message; it is never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub match_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Consolidated verdict over all chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedResult {
    /// Pixel-weighted mean of chunk scores; large chunks dominate small ones.
    pub overall_score: f64,
    pub passed: bool,
    pub total_chunks: usize,
    pub failed_chunks: usize,
    /// Worst below-threshold chunks, ascending by score, capped for display.
    pub problem_areas: Vec<ChunkResult>,
    /// Row-major PASS/FAIL map of the grid.
    pub grid_map: String,
    pub recommendations: Vec<String>,
}

/// Supplies the full decoded reference image. Fetched once per run.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn fetch(&self) -> Result<Raster>;
}

/// Supplies the rendered pixels for an arbitrary sub-rectangle of the target.
#[async_trait]
pub trait RenderedSource: Send + Sync {
    async fn region(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Raster>;
}

/// Reference image fetched over HTTP.
pub struct UrlReferenceSource {
    url: String,
    client: reqwest::Client,
}

impl UrlReferenceSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ReferenceSource for UrlReferenceSource {
    async fn fetch(&self) -> Result<Raster> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("GET {}: {}", self.url, e)))?;
        if !resp.status().is_success() {
            return Err(Error::Fetch(format!(
                "GET {}: HTTP {}",
                self.url,
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Fetch(format!("read body of {}: {}", self.url, e)))?;
        Raster::from_bytes(&bytes)
    }
}

/// Reference image already decoded in memory.
pub struct BufferReferenceSource(pub Raster);

#[async_trait]
impl ReferenceSource for BufferReferenceSource {
    async fn fetch(&self) -> Result<Raster> {
        Ok(self.0.clone())
    }
}

/// Rendered side backed by a single full screenshot, cropped per chunk.
pub struct CroppingRenderedSource(pub Raster);

#[async_trait]
impl RenderedSource for CroppingRenderedSource {
    async fn region(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Raster> {
        self.0.crop(x, y, width, height)
    }
}

/// Drives per-chunk fetch/capture/compare and consolidates the results.
pub struct TileOrchestrator {
    options: CompareOptions,
    pass_threshold: f64,
    chunk_size: u32,
}

impl TileOrchestrator {
    pub fn new(options: CompareOptions, pass_threshold: f64) -> Self {
        Self {
            options,
            pass_threshold,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Run the tiled comparison over a `width` x `height` target.
    ///
    /// The reference is fetched and decoded once (bounded retry), cached
    /// across chunks, and dropped before consolidation to free memory.
    /// Chunks are processed sequentially; the browser page and the reference
    /// API are not safely reusable concurrently.
    pub async fn run_tiled(
        &self,
        width: u32,
        height: u32,
        reference: &dyn ReferenceSource,
        rendered: &dyn RenderedSource,
    ) -> Result<ConsolidatedResult> {
        let grid = ChunkGrid::new(width, height, self.chunk_size)?;
        info!(
            width,
            height,
            cols = grid.cols,
            rows = grid.rows,
            "running tiled comparison"
        );

        let policy = RetryPolicy::new(FETCH_RETRIES, FETCH_RETRY_DELAY);
        let reference_raster = with_retry(policy, "reference fetch", || reference.fetch()).await?;

        let mut results = Vec::with_capacity(grid.chunks.len());
        for chunk in &grid.chunks {
            match self.process_chunk(chunk, &reference_raster, rendered).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(chunk = %chunk.id, error = %e, "chunk failed");
                    results.push(ChunkResult {
                        chunk: chunk.clone(),
                        match_score: 0.0,
                        diff_thumbnail: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        drop(reference_raster);

        Ok(consolidate(results, width, height, self.pass_threshold))
    }

    async fn process_chunk(
        &self,
        chunk: &Chunk,
        reference: &Raster,
        rendered: &dyn RenderedSource,
    ) -> Result<ChunkResult> {
        let reference_crop = reference.crop(chunk.x, chunk.y, chunk.width, chunk.height)?;
        let policy = RetryPolicy::new(FETCH_RETRIES, FETCH_RETRY_DELAY);
        let rendered_crop = with_retry(policy, "rendered region", || {
            rendered.region(chunk.x, chunk.y, chunk.width, chunk.height)
        })
        .await?;

        let comparison = compare(&reference_crop, &rendered_crop, &self.options)?;
        debug!(chunk = %chunk.id, score = comparison.match_score, "chunk compared");

        // Thumbnail only for chunks that will matter in the report.
        let diff_thumbnail = match (&comparison.diff_image, comparison.match_score < self.pass_threshold)
        {
            (Some(encoded), true) => Some(
                Raster::from_base64(encoded)?
                    .thumbnail(THUMBNAIL_MAX_EDGE)?
                    .to_png_base64()?,
            ),
            _ => None,
        };

        Ok(ChunkResult {
            chunk: chunk.clone(),
            match_score: comparison.match_score,
            diff_thumbnail,
            error: None,
        })
    }
}

/// Pixel-weighted consolidation. Commutative over result order: the grid map
/// and problem areas are re-sorted internally, so retry delays or shuffled
/// processing cannot change the output.
pub fn consolidate(
    mut results: Vec<ChunkResult>,
    target_width: u32,
    target_height: u32,
    pass_threshold: f64,
) -> ConsolidatedResult {
    results.sort_by_key(|r| (r.chunk.row, r.chunk.col));

    let total_pixels: u64 = results.iter().map(|r| r.chunk.pixel_count).sum();
    let overall_score = if total_pixels == 0 {
        0.0
    } else {
        results
            .iter()
            .map(|r| r.match_score * r.chunk.pixel_count as f64)
            .sum::<f64>()
            / total_pixels as f64
    };

    let failed_chunks = results.iter().filter(|r| r.error.is_some()).count();
    let total_chunks = results.len();

    let cols = results.iter().map(|r| r.chunk.col).max().map_or(0, |c| c + 1);
    let grid_map = results
        .chunks(cols.max(1) as usize)
        .map(|row| {
            row.iter()
                .map(|r| {
                    if r.match_score >= pass_threshold {
                        "PASS"
                    } else {
                        "FAIL"
                    }
                })
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut problem_areas: Vec<ChunkResult> = results
        .iter()
        .filter(|r| r.match_score < pass_threshold)
        .cloned()
        .collect();
    problem_areas.sort_by(|a, b| a.match_score.total_cmp(&b.match_score));
    problem_areas.truncate(MAX_PROBLEM_AREAS);

    let recommendations =
        recommendations_for(&problem_areas, target_width, target_height, failed_chunks);

    ConsolidatedResult {
        overall_score,
        passed: overall_score >= pass_threshold,
        total_chunks,
        failed_chunks,
        problem_areas,
        grid_map,
        recommendations,
    }
}

fn recommendations_for(
    problem_areas: &[ChunkResult],
    target_width: u32,
    target_height: u32,
    failed_chunks: usize,
) -> Vec<String> {
    let mut out = Vec::new();
    if problem_areas.is_empty() {
        return out;
    }

    // Dominant problem quadrant by chunk centers.
    let mut quadrant_counts = [0usize; 4];
    const QUADRANTS: [&str; 4] = ["top-left", "top-right", "bottom-left", "bottom-right"];
    for area in problem_areas {
        let cx = area.chunk.x + area.chunk.width / 2;
        let cy = area.chunk.y + area.chunk.height / 2;
        let right = cx >= target_width / 2;
        let bottom = cy >= target_height / 2;
        quadrant_counts[(bottom as usize) * 2 + right as usize] += 1;
    }
    if let Some((idx, count)) = quadrant_counts
        .iter()
        .enumerate()
        .max_by_key(|(_, c)| **c)
    {
        if *count > 1 {
            out.push(format!(
                "Mismatches concentrate in the {} quadrant ({} of {} problem chunks); start there.",
                QUADRANTS[idx],
                count,
                problem_areas.len()
            ));
        }
    }

    // Worst single chunk call-out. problem_areas is sorted ascending.
    let worst = &problem_areas[0];
    out.push(format!(
        "Worst area is {} (row {}, col {}) at {:.1}%: inspect the {}x{} region at ({}, {}).",
        worst.chunk.id,
        worst.chunk.row,
        worst.chunk.col,
        worst.match_score,
        worst.chunk.width,
        worst.chunk.height,
        worst.chunk.x,
        worst.chunk.y
    ));

    if failed_chunks > 0 {
        out.push(format!(
            "{} chunk(s) could not be processed and scored 0; re-run to rule out transient capture failures.",
            failed_chunks
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Raster {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width * height {
            pixels.extend_from_slice(&rgba);
        }
        Raster::from_rgba8(width, height, pixels).unwrap()
    }

    #[test]
    fn test_needs_tiling_threshold() {
        assert!(!needs_tiling(4096, 4096));
        assert!(needs_tiling(4097, 100));
        assert!(needs_tiling(100, 4097));
        assert!(needs_tiling(5000, 3000));
    }

    #[test]
    fn test_grid_5000x3000_is_3_by_2() {
        let grid = ChunkGrid::new(5000, 3000, 2048).unwrap();
        assert_eq!(grid.cols, 3);
        assert_eq!(grid.rows, 2);
        assert_eq!(grid.chunks.len(), 6);
        // Last column/row clipped to the remaining extent.
        let last = grid.chunks.last().unwrap();
        assert_eq!(last.width, 5000 - 2 * 2048);
        assert_eq!(last.height, 3000 - 2048);
    }

    #[test]
    fn test_grid_exactly_covers_target() {
        for (w, h, size) in [(5000u32, 3000u32, 2048u32), (4096, 2048, 2048), (10, 7, 4)] {
            let grid = ChunkGrid::new(w, h, size).unwrap();
            let sum: u64 = grid.chunks.iter().map(|c| c.pixel_count).sum();
            assert_eq!(sum, w as u64 * h as u64, "{}x{} @ {}", w, h, size);
            // No overlap: chunk (row, col) origin must be exactly where the
            // previous cell ended.
            for chunk in &grid.chunks {
                assert_eq!(chunk.x, chunk.col * size);
                assert_eq!(chunk.y, chunk.row * size);
                assert!(chunk.x + chunk.width <= w);
                assert!(chunk.y + chunk.height <= h);
            }
        }
    }

    #[test]
    fn test_grid_rejects_degenerate_input() {
        assert!(ChunkGrid::new(0, 100, 2048).is_err());
        assert!(ChunkGrid::new(100, 100, 0).is_err());
    }

    fn result_for(chunk: &Chunk, score: f64, error: Option<&str>) -> ChunkResult {
        ChunkResult {
            chunk: chunk.clone(),
            match_score: score,
            diff_thumbnail: None,
            error: error.map(|e| e.to_string()),
        }
    }

    #[test]
    fn test_consolidation_weights_by_pixel_count() {
        let grid = ChunkGrid::new(100, 40, 80).unwrap(); // 80x40 + 20x40
        let results = vec![
            result_for(&grid.chunks[0], 100.0, None), // 3200 px
            result_for(&grid.chunks[1], 0.0, None),   // 800 px
        ];
        let consolidated = consolidate(results, 100, 40, 90.0);
        assert!((consolidated.overall_score - 80.0).abs() < 1e-9);
        assert!(!consolidated.passed);
    }

    #[test]
    fn test_consolidation_is_order_independent() {
        let grid = ChunkGrid::new(5000, 3000, 2048).unwrap();
        let scores = [97.0, 42.0, 88.0, 100.0, 63.5, 12.0];
        let results: Vec<ChunkResult> = grid
            .chunks
            .iter()
            .zip(scores)
            .map(|(c, s)| result_for(c, s, None))
            .collect();
        let mut shuffled = results.clone();
        shuffled.reverse();
        shuffled.swap(0, 3);

        let a = consolidate(results, 5000, 3000, 90.0);
        let b = consolidate(shuffled, 5000, 3000, 90.0);
        assert_eq!(a.overall_score, b.overall_score);
        assert_eq!(a.grid_map, b.grid_map);
        assert_eq!(
            a.problem_areas.iter().map(|p| p.chunk.id.clone()).collect::<Vec<_>>(),
            b.problem_areas.iter().map(|p| p.chunk.id.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_problem_areas_sorted_ascending_and_capped() {
        let grid = ChunkGrid::new(8192, 4096, 2048).unwrap(); // 4x2 = 8 chunks
        let results: Vec<ChunkResult> = grid
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| result_for(c, 10.0 * i as f64, None)) // 0..70, all below 90
            .collect();
        let consolidated = consolidate(results, 8192, 4096, 90.0);
        assert_eq!(consolidated.problem_areas.len(), MAX_PROBLEM_AREAS);
        let scores: Vec<f64> = consolidated
            .problem_areas
            .iter()
            .map(|p| p.match_score)
            .collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(scores, sorted);
        assert_eq!(consolidated.problem_areas[0].match_score, 0.0);
    }

    #[test]
    fn test_grid_map_row_major() {
        let grid = ChunkGrid::new(5000, 3000, 2048).unwrap();
        let results: Vec<ChunkResult> = grid
            .chunks
            .iter()
            .map(|c| result_for(c, if c.row == 0 { 100.0 } else { 0.0 }, None))
            .collect();
        let consolidated = consolidate(results, 5000, 3000, 90.0);
        assert_eq!(
            consolidated.grid_map,
            "PASS | PASS | PASS\nFAIL | FAIL | FAIL"
        );
    }

    struct FailingRegionSource {
        inner: Raster,
        fail_at: (u32, u32),
    }

    #[async_trait]
    impl RenderedSource for FailingRegionSource {
        async fn region(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Raster> {
            if (x, y) == self.fail_at {
                return Err(Error::Fetch("simulated capture failure".into()));
            }
            self.inner.crop(x, y, width, height)
        }
    }

    #[tokio::test]
    async fn test_failed_chunk_is_isolated_not_fatal() {
        let white = solid(100, 60, [255, 255, 255, 255]);
        let reference = BufferReferenceSource(white.clone());
        // 40px chunks over 100x60: 3 cols x 2 rows; chunk at (40, 0) fails.
        let rendered = FailingRegionSource {
            inner: white,
            fail_at: (40, 0),
        };
        let orchestrator = TileOrchestrator::new(CompareOptions::default(), 90.0)
            .with_chunk_size(40);
        let result = orchestrator
            .run_tiled(100, 60, &reference, &rendered)
            .await
            .unwrap();

        assert_eq!(result.total_chunks, 6);
        assert_eq!(result.failed_chunks, 1);
        let failed: Vec<&ChunkResult> = result
            .problem_areas
            .iter()
            .filter(|p| p.error.is_some())
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].match_score, 0.0);
        assert!(failed[0].error.as_deref().unwrap().contains("simulated"));
        // Overall score still computed from the healthy chunks:
        // 5 perfect chunks of 2400/1200 px + one failed 1600px chunk.
        let total = 100.0 * 60.0;
        let failed_px = 40.0 * 40.0;
        let expected = 100.0 * (total - failed_px) / total;
        assert!((result.overall_score - expected).abs() < 1e-9);
        assert!(result
            .recommendations
            .iter()
            .any(|r| r.contains("could not be processed")));
    }

    #[tokio::test]
    async fn test_identical_buffers_pass_tiled() {
        let img = solid(90, 90, [8, 16, 32, 255]);
        let orchestrator = TileOrchestrator::new(CompareOptions::default(), 90.0)
            .with_chunk_size(40);
        let result = orchestrator
            .run_tiled(
                90,
                90,
                &BufferReferenceSource(img.clone()),
                &CroppingRenderedSource(img),
            )
            .await
            .unwrap();
        assert_eq!(result.overall_score, 100.0);
        assert!(result.passed);
        assert!(result.problem_areas.is_empty());
        assert!(result.recommendations.is_empty());
    }
}
