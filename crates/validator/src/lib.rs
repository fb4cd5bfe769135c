//! Visual-regression validation pipeline.
//!
//! Compares a live, rendered page against a reference design raster and
//! reports a PASS/FAIL verdict with spatially-located discrepancies.
//! Capture runs over the Chrome DevTools Protocol; comparison is
//! deterministic per-pixel thresholding (no SSIM); oversized targets are
//! decomposed into bounded tiles; designs with structural children get a
//! section plan with a dependency-respecting build order.

pub mod aggregate;
pub mod browser;
pub mod capture;
pub mod compare;
pub mod raster;
pub mod retry;
pub mod sections;
pub mod tiling;

pub use aggregate::{AuxiliaryCheck, CheckOutcome, CheckReport, ValidationMode, Validator};
pub use browser::session::SessionManager;
pub use capture::Capturer;
pub use compare::{compare, Comparison, CompareOptions, Region};
pub use raster::Raster;
pub use sections::{Section, SectionPlan};
pub use tiling::{needs_tiling, ChunkGrid, ConsolidatedResult, TileOrchestrator};
