//! Comparison of two net views
//!
//! Typically the geometric reconstruction against the exported netlist, but
//! any two [`NetView`]s can be compared. Findings are derived from the pins
//! both sides agree exist, so swapping the arguments yields the same findings
//! with roles exchanged. Severity depends on which *source* a view came from,
//! never on argument position: a net or component the geometry lacks is
//! informational (an unwired sheet), one the netlist lacks is a warning.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::view::{NetView, Source};
use crate::connectivity::UnconnectedReason;
use crate::core::Severity;
use crate::parser::schema::PinRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffOptions {
    /// Compare `/sheet/NAME` as `NAME`
    pub strip_sheet_prefix: bool,
    /// Treat exported `unconnected-(...)` single-pin nets as no connection
    pub ignore_unconnected_placeholders: bool,
    /// Report a netlist pin as Info rather than Warning when the geometry
    /// could not place it or shows a no-connect marker on it
    pub downgrade_unplaced_pins: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            strip_sheet_prefix: true,
            ignore_unconnected_placeholders: true,
            downgrade_unplaced_pins: false,
        }
    }
}

/// Argument position of a view in a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingKind {
    /// Pin on `net` in `side`, on no net in the other view
    PinOnlyIn { side: Side, pin: PinRef, net: String },

    /// Pin on `net` in the authoritative `side`, while the geometry has it
    /// placed but touching nothing: a dangling wire or missing junction
    UnconnectedPin { side: Side, pin: PinRef, net: String },

    /// Same pins, different names
    NetNameMismatch {
        left: String,
        right: String,
        pins: BTreeSet<PinRef>,
    },

    /// Pins that share `left` on one side but are split or joined
    /// differently on the other
    NetMembershipMismatch {
        left: String,
        right: String,
        pins: BTreeSet<PinRef>,
    },

    /// Component absent from `side`
    ComponentMissing { side: Side, reference: String },

    /// No pin of `net` appears in `side`
    NetMissing { side: Side, net: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffFinding {
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: FindingKind,
}

impl DiffFinding {
    pub fn message(&self) -> String {
        match &self.kind {
            FindingKind::PinOnlyIn { side, pin, net } => {
                format!("{} is on {} only in the {:?} view", pin, net, side)
            }
            FindingKind::UnconnectedPin { pin, net, .. } => format!(
                "{} belongs to {} but is geometrically unconnected (dangling wire or missing junction?)",
                pin, net
            ),
            FindingKind::NetNameMismatch { left, right, pins } => {
                format!("{} pins named {} on the left, {} on the right", pins.len(), left, right)
            }
            FindingKind::NetMembershipMismatch { left, right, pins } => format!(
                "{} on {} (left) and {} (right), but the two nets differ in membership",
                pins.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", "),
                left,
                right
            ),
            FindingKind::ComponentMissing { side, reference } => {
                format!("{} is missing from the {:?} view", reference, side)
            }
            FindingKind::NetMissing { side, net } => {
                format!("net {} has no pin in the {:?} view", net, side)
            }
        }
    }

    /// Pins the finding is about
    pub fn pins(&self) -> Vec<&PinRef> {
        match &self.kind {
            FindingKind::PinOnlyIn { pin, .. } | FindingKind::UnconnectedPin { pin, .. } => {
                vec![pin]
            }
            FindingKind::NetNameMismatch { pins, .. }
            | FindingKind::NetMembershipMismatch { pins, .. } => pins.iter().collect(),
            FindingKind::ComponentMissing { .. } | FindingKind::NetMissing { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffReport {
    pub left: Source,
    pub right: Source,
    pub findings: Vec<DiffFinding>,
}

impl DiffReport {
    /// Unordered set of pins involved in any finding
    pub fn mismatched_pins(&self) -> BTreeSet<PinRef> {
        self.findings
            .iter()
            .flat_map(|f| f.pins())
            .cloned()
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiffFinding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }
}

/// Severity for something present in one view and missing from `missing_from`
fn absence_severity(missing_from: Source) -> Severity {
    match missing_from {
        Source::Geometric => Severity::Info,
        Source::Authoritative => Severity::Warning,
    }
}

pub fn diff(left: &NetView, right: &NetView, options: &DiffOptions) -> DiffReport {
    let views = [left.normalized(options), right.normalized(options)];
    let view = |side: Side| match side {
        Side::Left => &views[0],
        Side::Right => &views[1],
    };
    let mut findings = Vec::new();

    // Components
    let mut missing_components: BTreeSet<&str> = BTreeSet::new();
    for side in [Side::Left, Side::Right] {
        let (here, there) = (view(side), view(side.other()));
        for reference in here.components().difference(there.components()) {
            missing_components.insert(reference);
            findings.push(DiffFinding {
                severity: absence_severity(there.source()),
                kind: FindingKind::ComponentMissing {
                    side: side.other(),
                    reference: reference.clone(),
                },
            });
        }
    }

    // Pins on a net in only one view; pins of missing components are covered above
    for side in [Side::Left, Side::Right] {
        let (here, there) = (view(side), view(side.other()));
        for (pin, net) in here.connected_pins() {
            if missing_components.contains(pin.reference.as_str()) || there.net_of(pin).is_some() {
                continue;
            }
            let (severity, kind) = match there.unconnected_reason(pin) {
                Some(UnconnectedReason::NoCoincidentNode) if here.source() == Source::Authoritative => (
                    Severity::Warning,
                    FindingKind::UnconnectedPin {
                        side,
                        pin: pin.clone(),
                        net: net.to_string(),
                    },
                ),
                Some(UnconnectedReason::GeometryUnknown | UnconnectedReason::MarkedNoConnect)
                    if options.downgrade_unplaced_pins =>
                (
                    Severity::Info,
                    FindingKind::PinOnlyIn {
                        side,
                        pin: pin.clone(),
                        net: net.to_string(),
                    },
                ),
                _ => (
                    Severity::Warning,
                    FindingKind::PinOnlyIn {
                        side,
                        pin: pin.clone(),
                        net: net.to_string(),
                    },
                ),
            };
            findings.push(DiffFinding { severity, kind });
        }
    }

    // Pins both views connect, grouped by (left net, right net)
    let mut groups: BTreeMap<(&str, &str), BTreeSet<PinRef>> = BTreeMap::new();
    for (pin, left_net) in views[0].connected_pins() {
        if missing_components.contains(pin.reference.as_str()) {
            continue;
        }
        if let Some(right_net) = views[1].net_of(pin) {
            groups
                .entry((left_net, right_net))
                .or_default()
                .insert(pin.clone());
        }
    }
    let shared = |side: Side, net: &str| -> BTreeSet<PinRef> {
        let there = view(side.other());
        view(side)
            .components_of(net)
            .into_iter()
            .filter(|p| {
                !missing_components.contains(p.reference.as_str()) && there.net_of(p).is_some()
            })
            .collect()
    };
    for ((left_net, right_net), pins) in groups {
        let whole = shared(Side::Left, left_net) == pins && shared(Side::Right, right_net) == pins;
        if whole {
            if left_net == right_net {
                continue;
            }
            let synthesized = views[0].net(left_net).is_some_and(|n| n.synthesized)
                || views[1].net(right_net).is_some_and(|n| n.synthesized);
            findings.push(DiffFinding {
                severity: if synthesized { Severity::Info } else { Severity::Warning },
                kind: FindingKind::NetNameMismatch {
                    left: left_net.to_string(),
                    right: right_net.to_string(),
                    pins,
                },
            });
        } else {
            findings.push(DiffFinding {
                severity: Severity::Warning,
                kind: FindingKind::NetMembershipMismatch {
                    left: left_net.to_string(),
                    right: right_net.to_string(),
                    pins,
                },
            });
        }
    }

    // Whole nets the other view knows nothing about
    for side in [Side::Left, Side::Right] {
        let (here, there) = (view(side), view(side.other()));
        for net in here.nets() {
            if net.pins.is_empty() || there.net(&net.name).is_some() {
                continue;
            }
            if net.pins.iter().all(|p| there.net_of(p).is_none()) {
                findings.push(DiffFinding {
                    severity: absence_severity(there.source()),
                    kind: FindingKind::NetMissing {
                        side: side.other(),
                        net: net.name.clone(),
                    },
                });
            }
        }
    }

    tracing::debug!(
        "Diff {} vs {}: {} findings ({} warnings)",
        left.source(),
        right.source(),
        findings.len(),
        findings.iter().filter(|f| f.severity == Severity::Warning).count()
    );

    DiffReport {
        left: left.source(),
        right: right.source(),
        findings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::netlist::{AuthoritativeNet, NetNode, NetlistIndex};

    fn net(code: &str, name: &str, pins: &[(&str, &str)]) -> AuthoritativeNet {
        AuthoritativeNet {
            code: code.to_string(),
            name: name.to_string(),
            nodes: pins
                .iter()
                .map(|(r, p)| NetNode {
                    reference: r.to_string(),
                    pin: p.to_string(),
                    pin_function: None,
                    pin_type: None,
                })
                .collect(),
        }
    }

    fn view(nets: Vec<AuthoritativeNet>) -> NetView {
        NetView::from_netlist(&NetlistIndex::build(Vec::new(), nets).unwrap())
    }

    fn kinds(report: &DiffReport) -> Vec<&FindingKind> {
        report.findings.iter().map(|f| &f.kind).collect()
    }

    #[test]
    fn test_identical_views_are_clean() {
        let a = view(vec![net("1", "GND", &[("R1", "1"), ("C1", "1")])]);
        let report = diff(&a, &a, &DiffOptions::default());
        assert!(report.is_clean());
    }

    #[test]
    fn test_name_mismatch() {
        let a = view(vec![net("1", "SDA", &[("R1", "1"), ("U1", "3")])]);
        let b = view(vec![net("1", "I2C_SDA", &[("R1", "1"), ("U1", "3")])]);
        let report = diff(&a, &b, &DiffOptions::default());
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].severity, Severity::Warning);
        assert!(matches!(
            kinds(&report)[0],
            FindingKind::NetNameMismatch { left, right, .. } if left == "SDA" && right == "I2C_SDA"
        ));
    }

    #[test]
    fn test_synthesized_name_mismatch_is_info() {
        let a = view(vec![net("1", "Net-(R1-Pad1)", &[("R1", "1"), ("U1", "3")])]);
        let b = view(vec![net("1", "SDA", &[("R1", "1"), ("U1", "3")])]);
        let report = diff(&a, &b, &DiffOptions::default());
        assert_eq!(report.findings[0].severity, Severity::Info);
    }

    #[test]
    fn test_split_net_is_membership_mismatch() {
        let a = view(vec![net("1", "VCC", &[("R1", "1"), ("R2", "1"), ("R3", "1")])]);
        let b = view(vec![
            net("1", "VCC", &[("R1", "1"), ("R2", "1")]),
            net("2", "VCC_B", &[("R3", "1")]),
        ]);
        let forward = diff(&a, &b, &DiffOptions::default());
        let backward = diff(&b, &a, &DiffOptions::default());
        assert_eq!(forward.findings.len(), 2);
        assert!(forward
            .findings
            .iter()
            .all(|f| matches!(f.kind, FindingKind::NetMembershipMismatch { .. })));
        assert_eq!(forward.mismatched_pins(), backward.mismatched_pins());
        assert_eq!(forward.mismatched_pins().len(), 3);
    }

    #[test]
    fn test_pin_only_in_and_symmetry() {
        let a = view(vec![net("1", "GND", &[("R1", "2"), ("C1", "2")])]);
        let b = view(vec![
            net("1", "GND", &[("R1", "2")]),
            net("2", "EXTRA", &[("C1", "1")]),
        ]);
        let forward = diff(&a, &b, &DiffOptions::default());
        let backward = diff(&b, &a, &DiffOptions::default());
        assert_eq!(forward.mismatched_pins(), backward.mismatched_pins());
        assert!(kinds(&forward).contains(&&FindingKind::PinOnlyIn {
            side: Side::Left,
            pin: PinRef::new("C1", "2"),
            net: "GND".to_string(),
        }));
        assert!(kinds(&backward).contains(&&FindingKind::PinOnlyIn {
            side: Side::Right,
            pin: PinRef::new("C1", "2"),
            net: "GND".to_string(),
        }));
    }

    #[test]
    fn test_component_missing_suppresses_its_pins() {
        let a = view(vec![net("1", "GND", &[("R1", "2"), ("C9", "2")])]);
        let b = view(vec![net("1", "GND", &[("R1", "2")])]);
        let report = diff(&a, &b, &DiffOptions::default());
        assert_eq!(
            kinds(&report),
            vec![&FindingKind::ComponentMissing {
                side: Side::Right,
                reference: "C9".to_string()
            }]
        );
        // Both views are authoritative here, so absence is a warning
        assert_eq!(report.findings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_placeholder_and_prefix_handling() {
        let a = view(vec![
            net("1", "/SIG", &[("R1", "1"), ("U1", "2")]),
            net("2", "unconnected-(U1-NC-Pad4)", &[("U1", "4")]),
        ]);
        let b = view(vec![net("1", "/SIG", &[("R1", "1"), ("U1", "2")])]);
        assert!(diff(&a, &b, &DiffOptions::default()).is_clean());
    }

    #[test]
    fn test_same_name_on_two_sheets_is_not_merged() {
        let a = view(vec![net("1", "SIG", &[("R1", "1"), ("R2", "1")])]);
        let b = view(vec![
            net("1", "/a/SIG", &[("R1", "1")]),
            net("2", "/b/SIG", &[("R2", "1")]),
        ]);
        let report = diff(&a, &b, &DiffOptions::default());
        assert_eq!(report.findings.len(), 2, "{:#?}", report.findings);
        assert!(report.findings.iter().all(|f| f.severity == Severity::Warning
            && matches!(&f.kind, FindingKind::NetMembershipMismatch { left, .. } if left == "SIG")));
        assert_eq!(report.mismatched_pins().len(), 2);
    }

    #[test]
    fn test_report_serializes() {
        let a = view(vec![net("1", "SDA", &[("R1", "1")])]);
        let b = view(vec![net("1", "SCL", &[("R1", "1")])]);
        let json = serde_json::to_value(diff(&a, &b, &DiffOptions::default())).unwrap();
        assert_eq!(json["left"], "authoritative");
        assert_eq!(json["findings"][0]["kind"], "net_name_mismatch");
        assert_eq!(json["findings"][0]["severity"], "Warning");
    }
}
