//! Validation aggregation.
//!
//! Runs the visual comparison (direct or tiled), merges in optional
//! auxiliary collaborator checks, and folds everything into the single
//! [`ValidationReport`] shape. Any internal error degrades to an
//! error-shaped report with the same schema; `validate` itself never fails.

use crate::capture::Capturer;
use crate::compare::{compare, CompareOptions, Comparison};
use crate::raster::Raster;
use crate::retry::{with_retry, RetryPolicy};
use crate::sections::{self, Section, SectionPlan};
use crate::tiling::{ReferenceSource, RenderedSource, TileOrchestrator};
use crate::SessionManager;
use async_trait::async_trait;
use pagelens_core::config::{
    FETCH_RETRIES, FETCH_RETRY_DELAY, MAX_RECOMMENDATIONS, PARTIAL_THRESHOLD, SEVERITY_CRITICAL,
    SEVERITY_MODERATE,
};
use pagelens_core::{
    Bounds, Config, DesignNode, Error, Issue, Result, Severity, Status, ValidationReport, Viewport,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Which checks a validation call runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Visual,
    Layout,
    Elements,
    Assets,
    Full,
}

impl ValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMode::Visual => "visual",
            ValidationMode::Layout => "layout",
            ValidationMode::Elements => "elements",
            ValidationMode::Assets => "assets",
            ValidationMode::Full => "full",
        }
    }
}

impl std::fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "visual" => Ok(ValidationMode::Visual),
            "layout" => Ok(ValidationMode::Layout),
            "elements" => Ok(ValidationMode::Elements),
            "assets" => Ok(ValidationMode::Assets),
            "full" => Ok(ValidationMode::Full),
            other => Err(format!(
                "unknown mode '{}', expected visual|layout|elements|assets|full",
                other
            )),
        }
    }
}

/// Coarse verdict of an auxiliary check, mapped onto the 0-100 scale so it
/// can be averaged with the visual score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Warning,
    Fail,
}

impl CheckOutcome {
    pub fn score(&self) -> f64 {
        match self {
            CheckOutcome::Pass => 100.0,
            CheckOutcome::Warning => 50.0,
            CheckOutcome::Fail => 0.0,
        }
    }
}

/// What an auxiliary check hands back for merging.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub outcome: CheckOutcome,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
    pub details: Value,
}

/// External collaborator (layout/element/asset inspection) plugged into the
/// aggregator. The pipeline only knows the outcome scale, never the
/// collaborator internals.
#[async_trait]
pub trait AuxiliaryCheck: Send + Sync {
    async fn run(&self, url: &str, target: &DesignNode) -> Result<CheckReport>;
}

#[derive(Debug, Clone, Serialize)]
struct SectionScore {
    section_id: String,
    name: String,
    match_score: f64,
}

pub struct Validator {
    config: Config,
    capturer: Capturer,
    checks: Vec<(ValidationMode, Box<dyn AuxiliaryCheck>)>,
}

impl Validator {
    pub fn new(config: Config) -> Self {
        let sessions = Arc::new(SessionManager::new());
        let capturer = Capturer::new(sessions).with_timeout(config.navigation_timeout);
        Self {
            config,
            capturer,
            checks: Vec::new(),
        }
    }

    /// Register a collaborator for one of the auxiliary modes. Registering
    /// under `Visual` or `Full` is rejected; those are pipeline-owned.
    pub fn register_check(
        &mut self,
        mode: ValidationMode,
        check: Box<dyn AuxiliaryCheck>,
    ) -> Result<()> {
        if matches!(mode, ValidationMode::Visual | ValidationMode::Full) {
            return Err(Error::InvalidTarget(format!(
                "cannot register an auxiliary check under the '{}' mode",
                mode
            )));
        }
        self.checks.push((mode, check));
        Ok(())
    }

    /// Validate `url` against `target`, returning the uniform report shape.
    /// The comparison viewport is `viewport` when given, otherwise derived
    /// from the target's bounds. Never returns an error: failures become an
    /// ERROR-status report.
    pub async fn validate(
        &self,
        mode: ValidationMode,
        target: &DesignNode,
        url: &str,
        viewport: Option<Viewport>,
        reference: &dyn ReferenceSource,
    ) -> ValidationReport {
        match self.run(mode, target, url, viewport, reference).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, code = e.code(), "validation failed");
                ValidationReport::from_error(&e)
            }
        }
    }

    async fn run(
        &self,
        mode: ValidationMode,
        target: &DesignNode,
        url: &str,
        viewport: Option<Viewport>,
        reference: &dyn ReferenceSource,
    ) -> Result<ValidationReport> {
        let mut scores: Vec<f64> = Vec::new();
        let mut issues: Vec<Issue> = Vec::new();
        let mut recommendations: Vec<String> = Vec::new();
        let mut details = serde_json::Map::new();

        if matches!(mode, ValidationMode::Visual | ValidationMode::Full) {
            let visual = self.visual(target, url, viewport, reference).await?;
            scores.push(visual.score);
            issues.extend(visual.issues);
            recommendations.extend(visual.recommendations);
            details.insert("visual".to_string(), visual.details);
            if let Some(plan) = visual.section_plan {
                details.insert("section_plan".to_string(), serde_json::to_value(&plan)?);
            }
            if let Some(section_scores) = visual.section_scores {
                details.insert(
                    "section_scores".to_string(),
                    serde_json::to_value(&section_scores)?,
                );
            }
        }

        for (check_mode, check) in &self.checks {
            if mode == ValidationMode::Full || mode == *check_mode {
                let report = check.run(url, target).await?;
                scores.push(report.outcome.score());
                issues.extend(report.issues);
                recommendations.extend(report.recommendations);
                details.insert(check_mode.as_str().to_string(), report.details);
            }
        }

        if scores.is_empty() {
            return Err(Error::InvalidTarget(format!(
                "no check is registered for mode '{}'",
                mode
            )));
        }

        let score = scores.iter().sum::<f64>() / scores.len() as f64;
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        let recommendations = dedup_capped(recommendations);

        info!(mode = %mode, score, issues = issues.len(), "validation complete");
        Ok(ValidationReport {
            status: status_for(score, self.config.pass_threshold),
            score,
            issues,
            recommendations,
            details: Value::Object(details),
            generated_at: chrono::Utc::now(),
        })
    }

    async fn visual(
        &self,
        target: &DesignNode,
        url: &str,
        viewport: Option<Viewport>,
        reference: &dyn ReferenceSource,
    ) -> Result<VisualOutcome> {
        let viewport = viewport_for(target, viewport)?;
        let (width, height) = (viewport.width, viewport.height);
        let options = CompareOptions {
            threshold: self.config.pixel_threshold,
            include_aa: self.config.include_aa,
            include_diff_image: self.config.include_diff_image,
            ..CompareOptions::default()
        };

        let section_plan = if target.children.is_empty() {
            None
        } else {
            Some(sections::plan(&target.children))
        };

        if width > self.config.max_untiled_dimension || height > self.config.max_untiled_dimension
        {
            let rendered = PageRenderedSource {
                capturer: &self.capturer,
                url,
                viewport,
                port: self.config.debug_port,
            };
            let orchestrator = TileOrchestrator::new(options, self.config.pass_threshold)
                .with_chunk_size(self.config.chunk_size);
            let consolidated = orchestrator
                .run_tiled(width, height, reference, &rendered)
                .await?;

            let issues = consolidated
                .problem_areas
                .iter()
                .map(|area| {
                    let mismatch = 100.0 - area.match_score;
                    let message = match &area.error {
                        Some(e) => format!("{} could not be compared: {}", area.chunk.id, e),
                        None => format!(
                            "{} mismatched by {:.1}% ({}x{} region at ({}, {}))",
                            area.chunk.id,
                            mismatch,
                            area.chunk.width,
                            area.chunk.height,
                            area.chunk.x,
                            area.chunk.y
                        ),
                    };
                    Issue {
                        severity: severity_for_mismatch(mismatch),
                        message,
                        area: Some(area.chunk.id.clone()),
                    }
                })
                .collect();

            Ok(VisualOutcome {
                score: consolidated.overall_score,
                issues,
                recommendations: consolidated.recommendations.clone(),
                details: json!({ "tiled": true, "comparison": consolidated }),
                section_plan,
                section_scores: None,
            })
        } else {
            let rendered = self
                .capturer
                .capture(url, viewport, self.config.debug_port)
                .await?;
            let policy = RetryPolicy::new(FETCH_RETRIES, FETCH_RETRY_DELAY);
            let reference_raster =
                with_retry(policy, "reference fetch", || reference.fetch()).await?;
            let comparison = compare(&reference_raster, &rendered, &options)?;

            let issues = region_issues(&comparison);
            let recommendations = region_recommendations(&comparison);
            let section_scores = section_plan.as_ref().map(|plan| {
                section_scores(
                    &reference_raster,
                    &rendered,
                    &target.bounds,
                    &plan.sections,
                    &options,
                )
            });

            Ok(VisualOutcome {
                score: comparison.match_score,
                issues,
                recommendations,
                details: json!({ "tiled": false, "comparison": comparison }),
                section_plan,
                section_scores,
            })
        }
    }
}

struct VisualOutcome {
    score: f64,
    issues: Vec<Issue>,
    recommendations: Vec<String>,
    details: Value,
    section_plan: Option<SectionPlan>,
    section_scores: Option<Vec<SectionScore>>,
}

/// Rendered side for the tiled path: each chunk is a clipped screenshot of
/// the live page at the full target viewport.
struct PageRenderedSource<'a> {
    capturer: &'a Capturer,
    url: &'a str,
    viewport: Viewport,
    port: u16,
}

#[async_trait]
impl RenderedSource for PageRenderedSource<'_> {
    async fn region(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Raster> {
        let clip = Bounds {
            x: x as f64,
            y: y as f64,
            width: width as f64,
            height: height as f64,
        };
        self.capturer
            .capture_region(self.url, clip, self.viewport, self.port)
            .await
    }
}

/// An explicitly supplied viewport wins; otherwise it is derived from the
/// target's rounded bounds.
fn viewport_for(target: &DesignNode, explicit: Option<Viewport>) -> Result<Viewport> {
    match explicit {
        Some(viewport) => Ok(viewport),
        None => Viewport::new(
            target.bounds.width.round() as u32,
            target.bounds.height.round() as u32,
        ),
    }
}

fn status_for(score: f64, pass_threshold: f64) -> Status {
    if score >= pass_threshold {
        Status::Pass
    } else if score >= PARTIAL_THRESHOLD {
        Status::Partial
    } else {
        Status::Fail
    }
}

fn severity_for_mismatch(mismatch_percent: f64) -> Severity {
    if mismatch_percent > SEVERITY_CRITICAL {
        Severity::Critical
    } else if mismatch_percent > SEVERITY_MODERATE {
        Severity::Moderate
    } else {
        Severity::Minor
    }
}

fn region_issues(comparison: &Comparison) -> Vec<Issue> {
    comparison
        .regions
        .iter()
        .map(|region| Issue {
            severity: region.severity,
            message: format!(
                "{}: {} ({:.1}% mismatch)",
                region.area, region.possible_cause, region.mismatch_percent
            ),
            area: Some(region.area.clone()),
        })
        .collect()
}

fn region_recommendations(comparison: &Comparison) -> Vec<String> {
    comparison
        .regions
        .iter()
        .filter(|region| region.severity > Severity::Minor)
        .map(|region| {
            format!(
                "Review the {} area; likely {}.",
                region.area, region.possible_cause
            )
        })
        .collect()
}

/// Re-scope the comparison to each planned section, in target-local pixel
/// coordinates. Sections fully outside the raster are skipped.
fn section_scores(
    reference: &Raster,
    rendered: &Raster,
    target_bounds: &Bounds,
    sections: &[Section],
    options: &CompareOptions,
) -> Vec<SectionScore> {
    let mut out = Vec::new();
    let section_options = CompareOptions {
        include_diff_image: false,
        ..options.clone()
    };
    for section in sections {
        let x = (section.bounds.x - target_bounds.x).max(0.0).round() as u32;
        let y = (section.bounds.y - target_bounds.y).max(0.0).round() as u32;
        if x >= reference.width() || y >= reference.height() {
            continue;
        }
        let w = section.bounds.width.round() as u32;
        let h = section.bounds.height.round() as u32;
        if w == 0 || h == 0 {
            continue;
        }
        let (Ok(ref_crop), Ok(rend_crop)) =
            (reference.crop(x, y, w, h), rendered.crop(x, y, w, h))
        else {
            continue;
        };
        match compare(&ref_crop, &rend_crop, &section_options) {
            Ok(comparison) => out.push(SectionScore {
                section_id: section.id.clone(),
                name: section.name.clone(),
                match_score: comparison.match_score,
            }),
            Err(e) => warn!(section = %section.id, error = %e, "section comparison skipped"),
        }
    }
    out
}

/// First occurrence wins; capped at [`MAX_RECOMMENDATIONS`].
fn dedup_capped(recommendations: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<String> = recommendations
        .into_iter()
        .filter(|r| seen.insert(r.clone()))
        .collect();
    out.truncate(MAX_RECOMMENDATIONS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::BufferReferenceSource;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Raster {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width * height {
            pixels.extend_from_slice(&rgba);
        }
        Raster::from_rgba8(width, height, pixels).unwrap()
    }

    fn node(width: f64, height: f64) -> DesignNode {
        DesignNode {
            node_id: "1:1".into(),
            name: "Page".into(),
            bounds: Bounds {
                x: 0.0,
                y: 0.0,
                width,
                height,
            },
            background_color: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_mode_parses_from_str() {
        assert_eq!(
            "visual".parse::<ValidationMode>().unwrap(),
            ValidationMode::Visual
        );
        assert_eq!(
            "full".parse::<ValidationMode>().unwrap(),
            ValidationMode::Full
        );
        assert!("pixel".parse::<ValidationMode>().is_err());
    }

    #[test]
    fn test_explicit_viewport_overrides_bounds_derivation() {
        let target = node(800.0, 600.0);
        let derived = viewport_for(&target, None).unwrap();
        assert_eq!((derived.width, derived.height), (800, 600));

        let explicit = Viewport::new(1440, 900).unwrap();
        let chosen = viewport_for(&target, Some(explicit)).unwrap();
        assert_eq!((chosen.width, chosen.height), (1440, 900));

        // Degenerate bounds only fail when no explicit viewport is given.
        let empty = node(0.0, 600.0);
        assert!(viewport_for(&empty, None).is_err());
        assert!(viewport_for(&empty, Some(explicit)).is_ok());
    }

    #[test]
    fn test_outcome_maps_to_score() {
        assert_eq!(CheckOutcome::Pass.score(), 100.0);
        assert_eq!(CheckOutcome::Warning.score(), 50.0);
        assert_eq!(CheckOutcome::Fail.score(), 0.0);
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(status_for(100.0, 90.0), Status::Pass);
        assert_eq!(status_for(90.0, 90.0), Status::Pass);
        assert_eq!(status_for(89.9, 90.0), Status::Partial);
        assert_eq!(status_for(50.0, 90.0), Status::Partial);
        assert_eq!(status_for(49.9, 90.0), Status::Fail);
    }

    #[test]
    fn test_recommendations_dedup_and_cap() {
        let mut recs: Vec<String> = (0..15).map(|i| format!("fix {}", i)).collect();
        recs.insert(3, "fix 0".to_string());
        let out = dedup_capped(recs);
        assert_eq!(out.len(), MAX_RECOMMENDATIONS);
        assert_eq!(out[0], "fix 0");
        assert_eq!(out.iter().filter(|r| *r == "fix 0").count(), 1);
    }

    struct FixedCheck {
        outcome: CheckOutcome,
    }

    #[async_trait]
    impl AuxiliaryCheck for FixedCheck {
        async fn run(&self, _url: &str, _target: &DesignNode) -> Result<CheckReport> {
            Ok(CheckReport {
                outcome: self.outcome,
                issues: vec![Issue {
                    severity: Severity::Minor,
                    message: "spacing off by 2px".into(),
                    area: None,
                }],
                recommendations: vec!["Adjust the container padding.".into()],
                details: json!({ "checked": true }),
            })
        }
    }

    #[tokio::test]
    async fn test_auxiliary_mode_runs_without_browser() {
        let mut validator = Validator::new(Config::default());
        validator
            .register_check(
                ValidationMode::Layout,
                Box::new(FixedCheck {
                    outcome: CheckOutcome::Pass,
                }),
            )
            .unwrap();

        let reference = BufferReferenceSource(solid(1, 1, [0, 0, 0, 255]));
        let report = validator
            .validate(
                ValidationMode::Layout,
                &node(800.0, 600.0),
                "http://localhost:3000",
                None,
                &reference,
            )
            .await;

        assert_eq!(report.status, Status::Pass);
        assert_eq!(report.score, 100.0);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.details["layout"]["checked"], true);
    }

    #[tokio::test]
    async fn test_unregistered_mode_yields_error_report() {
        let validator = Validator::new(Config::default());
        let reference = BufferReferenceSource(solid(1, 1, [0, 0, 0, 255]));
        let report = validator
            .validate(
                ValidationMode::Assets,
                &node(800.0, 600.0),
                "http://localhost:3000",
                None,
                &reference,
            )
            .await;
        assert_eq!(report.status, Status::Error);
        assert_eq!(report.details["error_code"], "INVALID_TARGET");
    }

    #[test]
    fn test_visual_and_full_modes_reject_registration() {
        let mut validator = Validator::new(Config::default());
        assert!(validator
            .register_check(
                ValidationMode::Visual,
                Box::new(FixedCheck {
                    outcome: CheckOutcome::Pass
                })
            )
            .is_err());
        assert!(validator
            .register_check(
                ValidationMode::Full,
                Box::new(FixedCheck {
                    outcome: CheckOutcome::Fail
                })
            )
            .is_err());
    }

    #[test]
    fn test_issues_sorted_critical_first() {
        let mut issues = vec![
            Issue {
                severity: Severity::Minor,
                message: "a".into(),
                area: None,
            },
            Issue {
                severity: Severity::Critical,
                message: "b".into(),
                area: None,
            },
            Issue {
                severity: Severity::Moderate,
                message: "c".into(),
                area: None,
            },
        ];
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[2].severity, Severity::Minor);
    }

    #[test]
    fn test_section_scores_localize_damage() {
        // Reference and rendered agree in the top half, disagree below.
        let reference = solid(100, 100, [255, 255, 255, 255]);
        let mut pixels = Vec::with_capacity(100 * 100 * 4);
        for y in 0..100 {
            let rgba = if y < 50 {
                [255, 255, 255, 255]
            } else {
                [10, 10, 10, 255]
            };
            for _ in 0..100 {
                pixels.extend_from_slice(&rgba);
            }
        }
        let rendered = Raster::from_rgba8(100, 100, pixels).unwrap();

        let target = Bounds {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
        };
        let sections = vec![
            Section {
                id: "section-1".into(),
                name: "Top".into(),
                bounds: Bounds {
                    x: 0.0,
                    y: 0.0,
                    width: 100.0,
                    height: 50.0,
                },
                bg_color: None,
                nodes: vec![],
            },
            Section {
                id: "section-2".into(),
                name: "Bottom".into(),
                bounds: Bounds {
                    x: 0.0,
                    y: 50.0,
                    width: 100.0,
                    height: 50.0,
                },
                bg_color: None,
                nodes: vec![],
            },
        ];

        let scores = section_scores(
            &reference,
            &rendered,
            &target,
            &sections,
            &CompareOptions::default(),
        );
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].match_score, 100.0);
        assert!(scores[1].match_score < 10.0);
    }
}
