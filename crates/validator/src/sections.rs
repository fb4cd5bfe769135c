//! Section planning over a design's top-level children.
//!
//! Children are grouped into visually distinct vertical bands by background
//! color and vertical gap, elements straddling multiple bands are flagged as
//! transition elements, and a dependency-respecting implementation order is
//! derived. The design tree is an owned, acyclic value type, so traversal is
//! plain recursion-free iteration over children in their given order.

use pagelens_core::config::SECTION_GAP_PX;
use pagelens_core::{Bounds, DesignNode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A contiguous vertical band of the design inferred from background-color
/// transitions. Call-scoped; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub name: String,
    pub bounds: Bounds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,
    /// Node ids of the children in this band, in original order.
    pub nodes: Vec<String>,
}

/// A child whose vertical extent overlaps more than one section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionElement {
    pub id: String,
    pub name: String,
    pub bounds: Bounds,
    pub spans_sections: Vec<String>,
}

/// Derived 1:1 from transition elements: implement the base section before
/// the sections the element bleeds into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionDependency {
    pub element: String,
    pub affected_sections: Vec<String>,
    pub depends_on: Vec<String>,
    pub explanation: String,
}

/// One step of the dependency-respecting build order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplementationOrderEntry {
    pub priority: usize,
    pub section_id: String,
    pub reason: String,
}

/// Full output of the planner, attached to validation report details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionPlan {
    pub sections: Vec<Section>,
    pub transition_elements: Vec<TransitionElement>,
    pub dependencies: Vec<SectionDependency>,
    pub implementation_order: Vec<ImplementationOrderEntry>,
}

/// Build the complete plan for a target's children.
pub fn plan(children: &[DesignNode]) -> SectionPlan {
    let sections = group_into_sections(children);
    let transition_elements = find_transition_elements(&sections, children);
    let dependencies = derive_dependencies(&transition_elements);
    let implementation_order = implementation_order(&sections, &dependencies);
    SectionPlan {
        sections,
        transition_elements,
        dependencies,
        implementation_order,
    }
}

fn normalize_color(color: &str) -> String {
    let c = color.trim().to_ascii_lowercase();
    // Short hex form.
    if c.len() == 4 && c.starts_with('#') {
        let b = c.as_bytes();
        return format!(
            "#{}{}{}{}{}{}",
            b[1] as char, b[1] as char, b[2] as char, b[2] as char, b[3] as char, b[3] as char
        );
    }
    c
}

fn is_white(color: &str) -> bool {
    matches!(normalize_color(color).as_str(), "#ffffff" | "white")
}

/// Single left-to-right linear scan, O(n): a new section starts when a
/// child's flat non-white fill differs from the running color, or when the
/// vertical gap from the previous child exceeds [`SECTION_GAP_PX`].
pub fn group_into_sections(children: &[DesignNode]) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut running_color: Option<String> = None;
    let mut prev_bottom: Option<f64> = None;

    for child in children {
        let child_color = child.background_color.as_deref().map(normalize_color);

        // A child with no flat fill inherits the running band; white-on-white
        // never breaks. Any other change of fill color starts a new band.
        let color_break = match (&child_color, &running_color) {
            (Some(c), Some(r)) => c != r && !(is_white(c) && is_white(r)),
            (Some(c), None) => !sections.is_empty() && !is_white(c),
            _ => false,
        };
        let gap_break = prev_bottom
            .map(|bottom| child.bounds.top() - bottom > SECTION_GAP_PX)
            .unwrap_or(false);

        if sections.is_empty() || color_break || gap_break {
            let id = format!("section-{}", sections.len() + 1);
            debug!(
                section = %id,
                node = %child.node_id,
                color_break,
                gap_break,
                "starting section"
            );
            sections.push(Section {
                id,
                name: child.name.clone(),
                bounds: child.bounds,
                bg_color: child_color.clone(),
                nodes: vec![child.node_id.clone()],
            });
            running_color = child_color;
        } else {
            let current = sections.last_mut().expect("section exists");
            // Extend the band's vertical extent.
            let top = current.bounds.top().min(child.bounds.top());
            let bottom = current.bounds.bottom().max(child.bounds.bottom());
            let left = current.bounds.x.min(child.bounds.x);
            let right = (current.bounds.x + current.bounds.width)
                .max(child.bounds.x + child.bounds.width);
            current.bounds = Bounds {
                x: left,
                y: top,
                width: right - left,
                height: bottom - top,
            };
            current.nodes.push(child.node_id.clone());
            if child_color.is_some() {
                running_color = child_color;
            }
        }
        prev_bottom = Some(child.bounds.bottom());
    }

    sections
}

/// A child is a transition element when its `[top, bottom)` interval
/// overlaps the `[min_y, max_y)` interval of more than one section.
pub fn find_transition_elements(
    sections: &[Section],
    children: &[DesignNode],
) -> Vec<TransitionElement> {
    let mut out = Vec::new();
    for child in children {
        let spans: Vec<String> = sections
            .iter()
            .filter(|s| {
                child.bounds.top() < s.bounds.bottom() && child.bounds.bottom() > s.bounds.top()
            })
            .map(|s| s.id.clone())
            .collect();
        if spans.len() > 1 {
            out.push(TransitionElement {
                id: child.node_id.clone(),
                name: child.name.clone(),
                bounds: child.bounds,
                spans_sections: spans,
            });
        }
    }
    out
}

/// One dependency per transition element: everything the element touches
/// depends on the first section it spans.
pub fn derive_dependencies(transitions: &[TransitionElement]) -> Vec<SectionDependency> {
    transitions
        .iter()
        .map(|t| {
            let base = t.spans_sections[0].clone();
            SectionDependency {
                element: t.id.clone(),
                affected_sections: t.spans_sections.clone(),
                depends_on: vec![base.clone()],
                explanation: format!(
                    "'{}' bleeds across {} sections; implement {} first so it has a stable base",
                    t.name,
                    t.spans_sections.len(),
                    base
                ),
            }
        })
        .collect()
}

/// Repeatedly schedule sections whose dependencies are already scheduled.
/// A pass that schedules nothing while sections remain (cyclic or mutually
/// dependent) force-schedules the remainder in original index order, so the
/// loop terminates in at most `sections.len()` passes and always emits every
/// section exactly once.
pub fn implementation_order(
    sections: &[Section],
    dependencies: &[SectionDependency],
) -> Vec<ImplementationOrderEntry> {
    let mut order: Vec<ImplementationOrderEntry> = Vec::new();
    let mut scheduled: Vec<bool> = vec![false; sections.len()];

    let deps_of = |section_id: &str| -> Vec<&str> {
        dependencies
            .iter()
            .filter(|d| {
                d.affected_sections.iter().any(|s| s == section_id)
                    && !d.depends_on.iter().any(|s| s == section_id)
            })
            .flat_map(|d| d.depends_on.iter().map(|s| s.as_str()))
            .collect()
    };

    while scheduled.iter().any(|s| !s) {
        let mut progressed = false;
        for (idx, section) in sections.iter().enumerate() {
            if scheduled[idx] {
                continue;
            }
            let blockers = deps_of(&section.id);
            let ready = blockers.iter().all(|dep| {
                sections
                    .iter()
                    .position(|s| s.id == *dep)
                    .map(|i| scheduled[i])
                    .unwrap_or(true)
            });
            if ready {
                scheduled[idx] = true;
                progressed = true;
                let reason = if blockers.is_empty() {
                    "no dependencies".to_string()
                } else {
                    format!("depends on {}", blockers.join(", "))
                };
                order.push(ImplementationOrderEntry {
                    priority: order.len() + 1,
                    section_id: section.id.clone(),
                    reason,
                });
            }
        }
        if !progressed {
            for (idx, section) in sections.iter().enumerate() {
                if !scheduled[idx] {
                    scheduled[idx] = true;
                    order.push(ImplementationOrderEntry {
                        priority: order.len() + 1,
                        section_id: section.id.clone(),
                        reason: "circular dependency or independent section".to_string(),
                    });
                }
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, y: f64, height: f64, color: Option<&str>) -> DesignNode {
        DesignNode {
            node_id: id.to_string(),
            name: format!("node {}", id),
            bounds: Bounds {
                x: 0.0,
                y,
                width: 1440.0,
                height,
            },
            background_color: color.map(|c| c.to_string()),
            children: Vec::new(),
        }
    }

    fn section(id: &str, y: f64, height: f64) -> Section {
        Section {
            id: id.to_string(),
            name: id.to_string(),
            bounds: Bounds {
                x: 0.0,
                y,
                width: 1440.0,
                height,
            },
            bg_color: None,
            nodes: Vec::new(),
        }
    }

    #[test]
    fn test_white_blue_white_yields_three_sections() {
        let children = vec![
            node("a", 0.0, 100.0, Some("#ffffff")),
            node("b", 100.0, 100.0, Some("#ffffff")),
            node("c", 200.0, 100.0, Some("#0000ff")),
            node("d", 300.0, 100.0, Some("#0000ff")),
            node("e", 400.0, 100.0, Some("#ffffff")),
        ];
        let sections = group_into_sections(&children);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].nodes, vec!["a", "b"]);
        assert_eq!(sections[1].nodes, vec!["c", "d"]);
        assert_eq!(sections[2].nodes, vec!["e"]);
    }

    #[test]
    fn test_non_white_color_transitions_split_bands() {
        let children = vec![
            node("a", 0.0, 100.0, Some("#ffffff")),
            node("b", 100.0, 100.0, Some("#ffffff")),
            node("c", 200.0, 100.0, Some("#0000ff")),
            node("d", 300.0, 100.0, Some("#0000ff")),
            node("e", 400.0, 100.0, Some("#00ff00")),
        ];
        let sections = group_into_sections(&children);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].nodes.len(), 2);
        assert_eq!(sections[1].nodes.len(), 2);
        assert_eq!(sections[2].nodes.len(), 1);
    }

    #[test]
    fn test_large_gap_splits_bands() {
        let children = vec![
            node("a", 0.0, 100.0, Some("#ffffff")),
            node("b", 100.0, 100.0, Some("#ffffff")),
            // 60px gap from previous bottom (200).
            node("c", 260.0, 100.0, Some("#ffffff")),
        ];
        let sections = group_into_sections(&children);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].nodes, vec!["c"]);
    }

    #[test]
    fn test_small_gap_does_not_split() {
        let children = vec![
            node("a", 0.0, 100.0, Some("#ffffff")),
            node("b", 140.0, 100.0, Some("#ffffff")), // 40px gap
        ];
        let sections = group_into_sections(&children);
        assert_eq!(sections.len(), 1);
    }

    #[test]
    fn test_grouping_is_deterministic() {
        let children = vec![
            node("a", 0.0, 100.0, Some("#ffffff")),
            node("b", 100.0, 100.0, Some("#112233")),
            node("c", 280.0, 100.0, Some("#112233")),
        ];
        let first = group_into_sections(&children);
        let second = group_into_sections(&children);
        assert_eq!(first.len(), second.len());
        for (x, y) in first.iter().zip(second.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.nodes, y.nodes);
            assert_eq!(x.bounds, y.bounds);
        }
    }

    #[test]
    fn test_short_hex_normalization() {
        assert_eq!(normalize_color("#FFF"), "#ffffff");
        assert!(is_white("#fff"));
        assert!(is_white("WHITE"));
        assert!(!is_white("#f0f0f0"));
    }

    #[test]
    fn test_transition_element_spans_two_sections() {
        let sections = vec![section("section-1", 0.0, 200.0), section("section-2", 200.0, 200.0)];
        let children = vec![
            node("inside", 10.0, 100.0, None),
            node("straddle", 150.0, 100.0, None), // 150..250 crosses the boundary
        ];
        let transitions = find_transition_elements(&sections, &children);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].id, "straddle");
        assert_eq!(transitions[0].spans_sections, vec!["section-1", "section-2"]);
    }

    #[test]
    fn test_dependencies_point_at_first_spanned_section() {
        let transitions = vec![TransitionElement {
            id: "t1".into(),
            name: "hero card".into(),
            bounds: Bounds {
                x: 0.0,
                y: 150.0,
                width: 100.0,
                height: 100.0,
            },
            spans_sections: vec!["section-1".into(), "section-2".into()],
        }];
        let deps = derive_dependencies(&transitions);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].depends_on, vec!["section-1"]);
        assert_eq!(deps[0].affected_sections.len(), 2);
    }

    #[test]
    fn test_order_respects_dependencies() {
        let sections = vec![
            section("section-1", 0.0, 200.0),
            section("section-2", 200.0, 200.0),
            section("section-3", 400.0, 200.0),
        ];
        let deps = vec![SectionDependency {
            element: "t".into(),
            affected_sections: vec!["section-1".into(), "section-2".into()],
            depends_on: vec!["section-1".into()],
            explanation: String::new(),
        }];
        let order = implementation_order(&sections, &deps);
        assert_eq!(order.len(), 3);
        let pos = |id: &str| order.iter().position(|e| e.section_id == id).unwrap();
        assert!(pos("section-1") < pos("section-2"));
        let priorities: Vec<usize> = order.iter().map(|e| e.priority).collect();
        assert_eq!(priorities, vec![1, 2, 3]);
    }

    #[test]
    fn test_cyclic_dependencies_still_terminate() {
        let sections = vec![section("section-1", 0.0, 100.0), section("section-2", 100.0, 100.0)];
        // Mutually dependent: 1 needs 2, 2 needs 1.
        let deps = vec![
            SectionDependency {
                element: "x".into(),
                affected_sections: vec!["section-1".into()],
                depends_on: vec!["section-2".into()],
                explanation: String::new(),
            },
            SectionDependency {
                element: "y".into(),
                affected_sections: vec!["section-2".into()],
                depends_on: vec!["section-1".into()],
                explanation: String::new(),
            },
        ];
        let order = implementation_order(&sections, &deps);
        assert_eq!(order.len(), 2);
        // Permutation: every section exactly once.
        let mut ids: Vec<&str> = order.iter().map(|e| e.section_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["section-1", "section-2"]);
        assert!(order
            .iter()
            .all(|e| e.reason == "circular dependency or independent section"));
    }

    #[test]
    fn test_unknown_dependency_does_not_block() {
        let sections = vec![section("section-1", 0.0, 100.0)];
        let deps = vec![SectionDependency {
            element: "z".into(),
            affected_sections: vec!["section-1".into()],
            depends_on: vec!["section-99".into()],
            explanation: String::new(),
        }];
        let order = implementation_order(&sections, &deps);
        assert_eq!(order.len(), 1);
    }
}
