//! Core analysis pipeline.
//! Parses a design and, optionally, its exported netlist, and returns an
//! immutable [`Analysis`] answering connectivity queries over either source.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::connectivity::{
    ConnectivityGraph, LabelPolicy, NetResolver, Resolution, UnconnectedReason,
};
use crate::parser::kicad::{KicadParseError, KicadParser};
use crate::parser::library::PinOffsetLookup;
use crate::parser::netlist::{NetlistError, NetlistIndex};
use crate::parser::schema::{
    DesignIssue, Label, PinRef, Point, Schematic, SymbolInstance, DEFAULT_EPSILON,
};
use crate::query::circuit::Circuit;
use crate::query::diff::{diff, DiffOptions, DiffReport};
use crate::query::view::{NetView, Source};

#[derive(Debug, thiserror::Error)]
pub enum NetGuardError {
    #[error("Schematic error: {0}")]
    Parse(#[from] KicadParseError),
    #[error("Netlist error: {0}")]
    Netlist(#[from] NetlistError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("Invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("No {0} data: analysis was run without it")]
    SourceUnavailable(Source),
}

pub type Result<T> = std::result::Result<T, NetGuardError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Finding attached to an analysis result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub component: Option<String>,
    pub location: Option<Point>,
}

/// Options for an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Coincidence tolerance in millimetres
    pub epsilon: f64,
    pub label_policy: LabelPolicy,
    pub diff: DiffOptions,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            label_policy: LabelPolicy::default(),
            diff: DiffOptions::default(),
        }
    }
}

impl AnalysisOptions {
    /// Load from a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(NetGuardError::InvalidOptions(format!(
                "epsilon must be a positive number, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AnalysisStats {
    pub symbols: usize,
    pub wire_segments: usize,
    pub junctions: usize,
    pub labels: usize,
    pub graph_components: usize,
    pub geometric_nets: usize,
    pub unconnected_pins: usize,
    pub authoritative_nets: Option<usize>,
    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
}

/// A pin's net and every other pin on it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionTrace {
    pub pin: PinRef,
    pub net: String,
    pub connected: Vec<PinRef>,
}

/// Geometric detail of one pin of a traced component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinTrace {
    pub pin: PinRef,
    pub name: Option<String>,
    pub position: Option<Point>,
    pub net: Option<String>,
    /// Wire ends and junction points electrically reachable from the pin
    pub wire_points: Vec<Point>,
    pub labels: Vec<Label>,
    pub unconnected: Option<UnconnectedReason>,
}

/// Immutable result of one pass over a design and optional netlist.
#[derive(Debug, Clone)]
pub struct Analysis {
    options: AnalysisOptions,
    schematic: Schematic,
    graph: ConnectivityGraph,
    resolution: Resolution,
    geometric: NetView,
    geometric_circuit: Circuit,
    netlist: Option<NetlistIndex>,
    authoritative: Option<NetView>,
    authoritative_circuit: Option<Circuit>,
    issues: Vec<Issue>,
}

impl Analysis {
    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub fn schematic(&self) -> &Schematic {
        &self.schematic
    }

    pub fn graph(&self) -> &ConnectivityGraph {
        &self.graph
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn netlist(&self) -> Option<&NetlistIndex> {
        self.netlist.as_ref()
    }

    /// Findings collected while parsing and resolving, in detection order
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn has_source(&self, source: Source) -> bool {
        match source {
            Source::Geometric => true,
            Source::Authoritative => self.authoritative.is_some(),
        }
    }

    pub fn view(&self, source: Source) -> Result<&NetView> {
        match source {
            Source::Geometric => Ok(&self.geometric),
            Source::Authoritative => self
                .authoritative
                .as_ref()
                .ok_or(NetGuardError::SourceUnavailable(source)),
        }
    }

    pub fn circuit(&self, source: Source) -> Result<&Circuit> {
        match source {
            Source::Geometric => Ok(&self.geometric_circuit),
            Source::Authoritative => self
                .authoritative_circuit
                .as_ref()
                .ok_or(NetGuardError::SourceUnavailable(source)),
        }
    }

    /// Ordered set of net names a component is on
    pub fn nets_of(&self, reference: &str, source: Source) -> Result<BTreeSet<String>> {
        Ok(self.view(source)?.nets_of(reference))
    }

    /// Ordered set of (reference, pin) on a net
    pub fn components_of(&self, net: &str, source: Source) -> Result<BTreeSet<PinRef>> {
        Ok(self.view(source)?.components_of(net))
    }

    /// Geometric nets against the authoritative netlist
    pub fn diff(&self) -> Result<DiffReport> {
        self.diff_sources(Source::Geometric, Source::Authoritative)
    }

    pub fn diff_sources(&self, left: Source, right: Source) -> Result<DiffReport> {
        Ok(diff(self.view(left)?, self.view(right)?, &self.options.diff))
    }

    /// The net of `reference`.`pin` and every other pin on it. `None` when
    /// the pin is on no net in that source.
    pub fn trace_connection(
        &self,
        reference: &str,
        pin: &str,
        source: Source,
    ) -> Result<Option<ConnectionTrace>> {
        let view = self.view(source)?;
        let pin_ref = PinRef::new(reference, pin);
        let Some(net) = view.net_of(&pin_ref) else {
            return Ok(None);
        };
        let connected = view
            .components_of(net)
            .into_iter()
            .filter(|p| *p != pin_ref)
            .collect();
        Ok(Some(ConnectionTrace {
            net: net.to_string(),
            pin: pin_ref,
            connected,
        }))
    }

    /// Per-pin wire network of a component: net, reachable wire points and
    /// labels. Empty when the reference is not in the design.
    pub fn trace_component(&self, reference: &str) -> Vec<PinTrace> {
        let mut traces = Vec::new();
        for symbol in self.schematic.symbols_for(reference) {
            for pin in &symbol.pins {
                let pin_ref = PinRef::new(reference, &pin.number);
                let component = self.graph.component_of_pin(&pin_ref);
                let resolved = self.resolution.net_of_pin(&pin_ref);
                traces.push(PinTrace {
                    name: pin.name.clone(),
                    position: pin.position,
                    net: resolved.map(|n| n.name.clone()),
                    wire_points: component
                        .map(|c| self.graph.points_of(c))
                        .unwrap_or_default(),
                    labels: resolved.map(|n| n.labels.clone()).unwrap_or_default(),
                    unconnected: self.geometric.unconnected_reason(&pin_ref),
                    pin: pin_ref,
                });
            }
        }
        traces
    }

    /// Placed symbols whose reference, value or library id match a
    /// case-insensitive regular expression
    pub fn search_components(&self, pattern: &str) -> Result<Vec<&SymbolInstance>> {
        Ok(self.schematic.search_components(pattern)?)
    }

    /// Shortest component -> net -> component chain
    pub fn find_path(&self, from: &str, to: &str, source: Source) -> Result<Option<Vec<String>>> {
        Ok(self.circuit(source)?.find_path(from, to))
    }

    pub fn stats(&self) -> AnalysisStats {
        let count = |severity: Severity| self.issues.iter().filter(|i| i.severity == severity).count();
        AnalysisStats {
            symbols: self.schematic.symbols.len(),
            wire_segments: self.schematic.wires.len(),
            junctions: self.schematic.junctions.len(),
            labels: self.schematic.labels.len(),
            graph_components: self.graph.component_count(),
            geometric_nets: self.geometric.net_count(),
            unconnected_pins: self.geometric.unconnected().len(),
            authoritative_nets: self.authoritative.as_ref().map(|v| v.net_count()),
            errors: count(Severity::Error),
            warnings: count(Severity::Warning),
            info: count(Severity::Info),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }
}

/// Core analysis API.
pub struct NetGuardCore;

impl NetGuardCore {
    /// Analyze design text and, if given, the matching netlist export.
    pub fn analyze(
        design: &str,
        netlist: Option<&str>,
        options: &AnalysisOptions,
    ) -> Result<Analysis> {
        Self::run(design, netlist, options, None)
    }

    /// As [`NetGuardCore::analyze`], with an external library supplying pin
    /// geometry for symbols the design does not embed.
    pub fn analyze_with_library(
        design: &str,
        netlist: Option<&str>,
        options: &AnalysisOptions,
        library: &dyn PinOffsetLookup,
    ) -> Result<Analysis> {
        Self::run(design, netlist, options, Some(library))
    }

    /// Read both files, then analyze. Handles are closed before analysis.
    pub fn analyze_files(
        design_path: &Path,
        netlist_path: Option<&Path>,
        options: &AnalysisOptions,
    ) -> Result<Analysis> {
        let design = std::fs::read_to_string(design_path)?;
        let netlist = netlist_path.map(std::fs::read_to_string).transpose()?;
        Self::analyze(&design, netlist.as_deref(), options)
    }

    fn run(
        design: &str,
        netlist: Option<&str>,
        options: &AnalysisOptions,
        library: Option<&dyn PinOffsetLookup>,
    ) -> Result<Analysis> {
        options.validate()?;

        // Geometry and netlist share nothing until the query stage
        let (geometric, authoritative) = rayon::join(
            || -> Result<(Schematic, ConnectivityGraph, Resolution)> {
                let schematic = KicadParser::parse_schematic_str(design, library)?;
                let graph = ConnectivityGraph::build(&schematic, options.epsilon);
                let resolution =
                    NetResolver::new(options.label_policy.clone()).resolve(&schematic, &graph);
                Ok((schematic, graph, resolution))
            },
            || netlist.map(NetlistIndex::parse).transpose(),
        );
        let (schematic, graph, resolution) = geometric?;
        let netlist = authoritative?;

        let geometric = NetView::from_resolution(&schematic, &resolution);
        let geometric_circuit = Circuit::from_view(&geometric);
        let authoritative = netlist.as_ref().map(NetView::from_netlist);
        let authoritative_circuit = authoritative.as_ref().map(Circuit::from_view);

        let mut issues: Vec<Issue> = schematic
            .issues
            .iter()
            .chain(resolution.issues())
            .map(|issue| to_issue(issue, &schematic))
            .collect();
        for &l in graph.unattached_labels() {
            let label = &schematic.labels[l];
            issues.push(Issue {
                code: "dangling_label".to_string(),
                severity: Severity::Info,
                message: format!(
                    "{} label {} touches no wire or pin",
                    label.scope.as_str(),
                    label.text
                ),
                component: None,
                location: Some(label.position),
            });
        }

        let analysis = Analysis {
            options: options.clone(),
            schematic,
            graph,
            resolution,
            geometric,
            geometric_circuit,
            netlist,
            authoritative,
            authoritative_circuit,
            issues,
        };

        let stats = analysis.stats();
        tracing::info!(
            "Analysis complete: {} symbols, {} geometric nets, {} authoritative nets, {} issues",
            stats.symbols,
            stats.geometric_nets,
            stats
                .authoritative_nets
                .map_or_else(|| "no".to_string(), |n| n.to_string()),
            analysis.issues.len()
        );

        Ok(analysis)
    }
}

fn to_issue(issue: &DesignIssue, schematic: &Schematic) -> Issue {
    let message = issue.to_string();
    match issue {
        DesignIssue::DuplicateReference { reference, unit } => Issue {
            code: "duplicate_reference".to_string(),
            severity: Severity::Error,
            message,
            component: Some(reference.clone()),
            location: schematic
                .symbols_for(reference)
                .filter(|s| s.unit == *unit)
                .last()
                .map(|s| s.position),
        },
        DesignIssue::MissingPinGeometry { reference, .. } => Issue {
            code: "missing_pin_geometry".to_string(),
            severity: Severity::Warning,
            message,
            component: Some(reference.clone()),
            location: schematic.symbol(reference).map(|s| s.position),
        },
        DesignIssue::InvalidEntity { .. } => Issue {
            code: "invalid_entity".to_string(),
            severity: Severity::Warning,
            message,
            component: None,
            location: None,
        },
        DesignIssue::ConflictingNetName { .. } => Issue {
            code: "conflicting_net_name".to_string(),
            severity: Severity::Error,
            message,
            component: None,
            location: None,
        },
    }
}
