//! Net naming
//!
//! Gives each connected component that carries a pin or a label a canonical
//! net name. Labels are ranked by scope, then by a tie-break rule; both are
//! configurable through [`LabelPolicy`]. Unlabelled nets get a synthesized
//! name derived from their lowest pin, made unique against every label text
//! in the design.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::graph::{ConnectivityGraph, UnconnectedPin};
use crate::parser::schema::{DesignIssue, Label, LabelScope, PinRef, Schematic};

/// How to pick among several labels of the same scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Smallest label text
    #[default]
    Lexicographic,
    /// First label in file order
    DocumentOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelPolicy {
    /// Scopes that may name a net, strongest first
    pub scope_priority: Vec<LabelScope>,
    pub tie_break: TieBreak,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self {
            scope_priority: vec![
                LabelScope::Power,
                LabelScope::Global,
                LabelScope::Hierarchical,
                LabelScope::Local,
            ],
            tie_break: TieBreak::Lexicographic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedNet {
    pub name: String,
    /// Connected component this net was resolved from
    pub component: usize,
    pub pins: BTreeSet<PinRef>,
    pub labels: Vec<Label>,
    /// Other label texts on the net, sorted
    pub aliases: Vec<String>,
    /// Scope of the label that supplied the name
    pub scope: Option<LabelScope>,
    /// No label named the net
    pub synthesized: bool,
    /// Several power labels disagree about the name
    pub ambiguous: bool,
}

/// Resolved nets of one design, plus what could not be resolved
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    nets: Vec<ResolvedNet>,
    pin_net: BTreeMap<PinRef, usize>,
    unconnected: Vec<UnconnectedPin>,
    issues: Vec<DesignIssue>,
}

impl Resolution {
    /// Nets in component order
    pub fn nets(&self) -> &[ResolvedNet] {
        &self.nets
    }

    /// Every resolved net carrying `name`; separate wire groups may share one
    pub fn nets_named<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a ResolvedNet> + 'n
    where
        'a: 'n,
    {
        self.nets.iter().filter(move |n| n.name == name)
    }

    pub fn net_of_pin(&self, pin: &PinRef) -> Option<&ResolvedNet> {
        self.pin_net.get(pin).map(|&i| &self.nets[i])
    }

    pub fn unconnected(&self) -> &[UnconnectedPin] {
        &self.unconnected
    }

    pub fn issues(&self) -> &[DesignIssue] {
        &self.issues
    }
}

pub struct NetResolver {
    policy: LabelPolicy,
}

impl NetResolver {
    pub fn new(policy: LabelPolicy) -> Self {
        Self { policy }
    }

    pub fn resolve(&self, schematic: &Schematic, graph: &ConnectivityGraph) -> Resolution {
        // Synthesized names must not shadow any label, attached or not
        let mut taken: HashSet<String> = schematic.labels.iter().map(|l| l.text.clone()).collect();

        let mut resolution = Resolution {
            unconnected: graph.unconnected().to_vec(),
            ..Resolution::default()
        };

        for (component, members) in graph.components().iter().enumerate() {
            if members.pins.is_empty() && members.labels.is_empty() {
                continue;
            }
            let labels: Vec<&Label> = members
                .labels
                .iter()
                .filter_map(|&i| schematic.labels.get(i))
                .collect();

            let power: BTreeSet<&str> = labels
                .iter()
                .filter(|l| l.scope == LabelScope::Power)
                .map(|l| l.text.as_str())
                .collect();

            let (name, scope) = match self.pick_label(&labels) {
                Some(label) => (label.text.clone(), Some(label.scope)),
                None => (self.synthesize(&members.pins, &labels, &mut taken), None),
            };
            let synthesized = scope.is_none();

            let ambiguous = power.len() > 1;
            if ambiguous {
                let issue = DesignIssue::ConflictingNetName {
                    names: power.iter().map(|s| s.to_string()).collect(),
                    chosen: name.clone(),
                };
                tracing::warn!("{}", issue);
                resolution.issues.push(issue);
            }

            let aliases: Vec<String> = labels
                .iter()
                .map(|l| l.text.as_str())
                .filter(|t| *t != name)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|t| t.to_string())
                .collect();

            let index = resolution.nets.len();
            for pin in &members.pins {
                resolution.pin_net.insert(pin.clone(), index);
            }
            resolution.nets.push(ResolvedNet {
                name,
                component,
                pins: members.pins.clone(),
                labels: labels.into_iter().cloned().collect(),
                aliases,
                scope,
                synthesized,
                ambiguous,
            });
        }

        tracing::debug!(
            "Resolved {} nets ({} synthesized), {} unconnected pins",
            resolution.nets.len(),
            resolution.nets.iter().filter(|n| n.synthesized).count(),
            resolution.unconnected.len()
        );

        resolution
    }

    fn pick_label<'a>(&self, labels: &[&'a Label]) -> Option<&'a Label> {
        for scope in &self.policy.scope_priority {
            let mut candidates = labels.iter().copied().filter(|l| l.scope == *scope);
            let picked = match self.policy.tie_break {
                TieBreak::Lexicographic => candidates.min_by(|a, b| a.text.cmp(&b.text)),
                TieBreak::DocumentOrder => candidates.next(),
            };
            if picked.is_some() {
                return picked;
            }
        }
        None
    }

    /// `Net-(R1-Pad2)` from the lowest pin, suffixed until unique
    fn synthesize(
        &self,
        pins: &BTreeSet<PinRef>,
        labels: &[&Label],
        taken: &mut HashSet<String>,
    ) -> String {
        let base = match pins.iter().next() {
            Some(pin) => format!("Net-({}-Pad{})", pin.reference, pin.pin),
            // Only labels outside the naming scopes; reuse one of them as the stem
            None => format!(
                "Net-({})",
                labels.iter().map(|l| l.text.as_str()).min().unwrap_or("?")
            ),
        };
        let mut name = base.clone();
        let mut suffix = 1;
        while taken.contains(&name) {
            name = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        taken.insert(name.clone());
        name
    }
}

impl Default for NetResolver {
    fn default() -> Self {
        Self::new(LabelPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::schema::*;

    fn wire(x1: f64, y1: f64, x2: f64, y2: f64) -> WireSegment {
        WireSegment::new(Point::new(x1, y1), Point::new(x2, y2))
    }

    fn resistor(reference: &str, a: (f64, f64), b: (f64, f64)) -> SymbolInstance {
        SymbolInstance {
            uuid: None,
            reference: reference.to_string(),
            value: "10k".to_string(),
            lib_id: "Device:R".to_string(),
            footprint: None,
            position: Point::new(a.0, a.1),
            rotation: 0.0,
            mirror: Mirror::None,
            unit: 1,
            properties: BTreeMap::new(),
            pins: vec![
                SymbolPin {
                    number: "1".to_string(),
                    name: None,
                    position: Some(Point::new(a.0, a.1)),
                },
                SymbolPin {
                    number: "2".to_string(),
                    name: None,
                    position: Some(Point::new(b.0, b.1)),
                },
            ],
            pin_geometry: PinGeometry::Embedded,
        }
    }

    fn resolve_with(sch: &Schematic, policy: LabelPolicy) -> Resolution {
        let graph = ConnectivityGraph::build(sch, DEFAULT_EPSILON);
        NetResolver::new(policy).resolve(sch, &graph)
    }

    fn one_wire_with(labels: Vec<Label>) -> Schematic {
        let mut sch = Schematic::new();
        sch.wires = vec![wire(0.0, 0.0, 10.0, 0.0)];
        sch.labels = labels;
        sch
    }

    #[test]
    fn test_power_beats_global_beats_local() {
        let sch = one_wire_with(vec![
            Label::new("sig_local", Point::new(2.0, 0.0), LabelScope::Local),
            Label::new("SIG", Point::new(0.0, 0.0), LabelScope::Global),
            Label::new("+3V3", Point::new(10.0, 0.0), LabelScope::Power),
        ]);
        let res = resolve_with(&sch, LabelPolicy::default());
        let net = &res.nets()[0];
        assert_eq!(net.name, "+3V3");
        assert_eq!(net.scope, Some(LabelScope::Power));
        assert_eq!(net.aliases, vec!["SIG".to_string(), "sig_local".to_string()]);
        assert!(!net.synthesized);
        assert!(!net.ambiguous);
    }

    #[test]
    fn test_global_tie_break_policies() {
        let sch = one_wire_with(vec![
            Label::new("ZETA", Point::new(0.0, 0.0), LabelScope::Global),
            Label::new("ALPHA", Point::new(10.0, 0.0), LabelScope::Global),
        ]);
        let lexicographic = resolve_with(&sch, LabelPolicy::default());
        assert_eq!(lexicographic.nets()[0].name, "ALPHA");
        assert_eq!(lexicographic.nets()[0].aliases, vec!["ZETA".to_string()]);

        let document = resolve_with(
            &sch,
            LabelPolicy {
                tie_break: TieBreak::DocumentOrder,
                ..LabelPolicy::default()
            },
        );
        assert_eq!(document.nets()[0].name, "ZETA");
    }

    #[test]
    fn test_custom_scope_priority() {
        let sch = one_wire_with(vec![
            Label::new("SIG", Point::new(0.0, 0.0), LabelScope::Global),
            Label::new("local_name", Point::new(10.0, 0.0), LabelScope::Local),
        ]);
        let policy = LabelPolicy {
            scope_priority: vec![LabelScope::Local, LabelScope::Global],
            tie_break: TieBreak::Lexicographic,
        };
        assert_eq!(resolve_with(&sch, policy).nets()[0].name, "local_name");
    }

    #[test]
    fn test_conflicting_power_labels_reported() {
        let sch = one_wire_with(vec![
            Label::new("VCC", Point::new(0.0, 0.0), LabelScope::Power),
            Label::new("+5V", Point::new(10.0, 0.0), LabelScope::Power),
        ]);
        let res = resolve_with(&sch, LabelPolicy::default());
        let net = &res.nets()[0];
        assert_eq!(net.name, "+5V");
        assert!(net.ambiguous);
        assert_eq!(
            res.issues(),
            &[DesignIssue::ConflictingNetName {
                names: vec!["+5V".to_string(), "VCC".to_string()],
                chosen: "+5V".to_string(),
            }]
        );
    }

    #[test]
    fn test_repeated_power_label_is_not_a_conflict() {
        let sch = one_wire_with(vec![
            Label::new("GND", Point::new(0.0, 0.0), LabelScope::Power),
            Label::new("GND", Point::new(10.0, 0.0), LabelScope::Power),
        ]);
        let res = resolve_with(&sch, LabelPolicy::default());
        assert!(res.issues().is_empty());
        assert!(res.nets()[0].aliases.is_empty());
    }

    #[test]
    fn test_synthesized_name_from_lowest_pin() {
        let mut sch = Schematic::new();
        sch.wires = vec![wire(0.0, 0.0, 10.0, 0.0)];
        sch.symbols = vec![
            resistor("R2", (0.0, 0.0), (0.0, 20.0)),
            resistor("R10", (10.0, 0.0), (10.0, 20.0)),
        ];
        let res = resolve_with(&sch, LabelPolicy::default());
        assert_eq!(res.nets().len(), 1);
        // String order: "R10" < "R2"
        assert_eq!(res.nets()[0].name, "Net-(R10-Pad1)");
        assert!(res.nets()[0].synthesized);
        assert_eq!(
            res.net_of_pin(&PinRef::new("R2", "1")).map(|n| n.name.as_str()),
            Some("Net-(R10-Pad1)")
        );
        assert_eq!(res.unconnected().len(), 2);
    }

    #[test]
    fn test_synthesized_name_avoids_label_text() {
        let mut sch = Schematic::new();
        sch.wires = vec![wire(0.0, 0.0, 10.0, 0.0)];
        sch.symbols = vec![resistor("R1", (0.0, 0.0), (0.0, 20.0))];
        // Unattached label that happens to spell the synthesized name
        sch.labels = vec![Label::new("Net-(R1-Pad1)", Point::new(90.0, 90.0), LabelScope::Local)];
        let res = resolve_with(&sch, LabelPolicy::default());
        assert_eq!(res.nets()[0].name, "Net-(R1-Pad1)-1");
    }

    #[test]
    fn test_bare_wires_produce_no_net() {
        let mut sch = Schematic::new();
        sch.wires = vec![wire(0.0, 0.0, 10.0, 0.0), wire(0.0, 5.0, 10.0, 5.0)];
        let res = resolve_with(&sch, LabelPolicy::default());
        assert!(res.nets().is_empty());
    }

    #[test]
    fn test_same_label_on_separate_groups() {
        let mut sch = Schematic::new();
        sch.wires = vec![wire(0.0, 0.0, 10.0, 0.0), wire(0.0, 5.0, 10.0, 5.0)];
        sch.labels = vec![
            Label::new("SDA", Point::new(0.0, 0.0), LabelScope::Global),
            Label::new("SDA", Point::new(0.0, 5.0), LabelScope::Global),
        ];
        let res = resolve_with(&sch, LabelPolicy::default());
        assert_eq!(res.nets_named("SDA").count(), 2);
    }
}
