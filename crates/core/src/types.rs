//! Shared data types for the validation pipeline.
//!
//! Everything here is JSON-serializable: primitives, nested objects/arrays,
//! and base64 strings for image payloads — never raw binary.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Pixel dimensions a comparison is performed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidTarget(format!(
                "viewport must be positive, got {}x{}",
                width, height
            )));
        }
        Ok(Self { width, height })
    }
}

/// Axis-aligned rectangle in design/page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// A resolved design target handed in by the (out-of-scope) design-tree
/// resolver: a node with pixel bounds, optional flat background fill, and
/// optional top-level children for section planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignNode {
    pub node_id: String,
    pub name: String,
    pub bounds: Bounds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DesignNode>,
}

/// Final verdict of a validation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pass,
    Fail,
    Partial,
    Error,
}

/// How bad a localized mismatch is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Moderate,
    Critical,
}

/// One actionable discrepancy surfaced to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    /// Spatial location (compass label or chunk id) when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

/// The one report shape every validation call returns, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: Status,
    /// Overall 0-100 score across enabled modes.
    pub score: f64,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
    /// Mode-specific payloads (comparison result, tiling grid, section plan).
    pub details: serde_json::Value,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

impl ValidationReport {
    /// Error-shaped report: same schema, `status: ERROR`, zero score, the
    /// error's code in details and its hint as a critical issue.
    pub fn from_error(err: &Error) -> Self {
        Self {
            status: Status::Error,
            score: 0.0,
            issues: vec![Issue {
                severity: Severity::Critical,
                message: err.to_string(),
                area: None,
            }],
            recommendations: vec![err.hint()],
            details: serde_json::json!({ "error_code": err.code() }),
            generated_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_rejects_zero_axis() {
        assert!(Viewport::new(0, 600).is_err());
        assert!(Viewport::new(800, 0).is_err());
        assert!(Viewport::new(800, 600).is_ok());
    }

    #[test]
    fn test_status_serializes_screaming() {
        assert_eq!(serde_json::to_string(&Status::Pass).unwrap(), "\"PASS\"");
        assert_eq!(serde_json::to_string(&Status::Partial).unwrap(), "\"PARTIAL\"");
        assert_eq!(serde_json::to_string(&Status::Error).unwrap(), "\"ERROR\"");
    }

    #[test]
    fn test_severity_orders_critical_last() {
        assert!(Severity::Critical > Severity::Moderate);
        assert!(Severity::Moderate > Severity::Minor);
    }

    #[test]
    fn test_design_node_parses_camel_case() {
        let node: DesignNode = serde_json::from_str(
            r##"{
                "nodeId": "1:2",
                "name": "Hero",
                "bounds": {"x": 0.0, "y": 0.0, "width": 1440.0, "height": 800.0},
                "backgroundColor": "#102030",
                "children": []
            }"##,
        )
        .unwrap();
        assert_eq!(node.node_id, "1:2");
        assert_eq!(node.background_color.as_deref(), Some("#102030"));
        assert_eq!(node.bounds.bottom(), 800.0);
    }

    #[test]
    fn test_error_report_keeps_schema() {
        let report = ValidationReport::from_error(&Error::ChromeNotFound("none".into()));
        assert_eq!(report.status, Status::Error);
        assert_eq!(report.score, 0.0);
        assert_eq!(report.details["error_code"], "CHROME_NOT_FOUND");
        assert_eq!(report.issues.len(), 1);
        assert!(!report.recommendations.is_empty());
    }
}
