//! Connectivity graph builder
//!
//! Rebuilds electrical connectivity from sheet geometry. Every wire endpoint
//! becomes its own graph node and every wire an edge between its two ends.
//! Endpoints that land on the same spot are only tied together by something
//! that actually joins them on the sheet:
//!
//! - a junction marker at that spot (or on the interior of a wire),
//! - a pin sitting there, since a pin is a single electrical node.
//!
//! Ends that merely touch, and wires that cross, stay apart.
//!
//! Coincidence is decided with an ε-tolerant grid ([`PointIndex`]) and the
//! grouping is a union-find pass over the petgraph topology, so the whole
//! build is near-linear in the number of segments.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::parser::schema::{PinRef, Point, Schematic, WireSegment};

/// Why a pin takes part in no net
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnconnectedReason {
    /// The pin has a position, but no wire end or junction is there
    NoCoincidentNode,
    /// As above, with a no-connect marker on the pin
    MarkedNoConnect,
    /// Pin geometry was unavailable, so its position is unknown
    GeometryUnknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnconnectedPin {
    pub pin: PinRef,
    pub position: Option<Point>,
    pub reason: UnconnectedReason,
}

/// Why two graph nodes are joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Link {
    /// Index into `Schematic::wires`
    Wire(usize),
    /// Consecutive pieces of one multi-point wire
    Polyline(usize),
    /// Index into `Schematic::junctions`
    Junction(usize),
    Pin,
}

/// Spatial hash of deduplicated points.
///
/// Cells are ε wide, so any point within ε of a query lies in the 3x3 block
/// around the query's cell. When several sites qualify the oldest one wins,
/// which keeps the mapping independent of hash iteration order.
#[derive(Debug, Clone)]
pub struct PointIndex {
    epsilon: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
    sites: Vec<Point>,
}

impl PointIndex {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            cells: HashMap::new(),
            sites: Vec::new(),
        }
    }

    fn cell(&self, p: &Point) -> (i64, i64) {
        (
            (p.x / self.epsilon).floor() as i64,
            (p.y / self.epsilon).floor() as i64,
        )
    }

    /// Site within ε of `p`, if any
    pub fn find(&self, p: &Point) -> Option<usize> {
        let (cx, cy) = self.cell(p);
        let mut best: Option<usize> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(ids) = self.cells.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &id in ids {
                    if self.sites[id].approx_eq(p, self.epsilon) {
                        best = Some(best.map_or(id, |b| b.min(id)));
                    }
                }
            }
        }
        best
    }

    /// Every site within ε of `p`, lowest id first. Two sites can both be
    /// near `p` while being more than ε apart from each other.
    pub fn find_all(&self, p: &Point) -> Vec<usize> {
        let (cx, cy) = self.cell(p);
        let mut found = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(ids) = self.cells.get(&(cx + dx, cy + dy)) {
                    found.extend(
                        ids.iter()
                            .copied()
                            .filter(|&id| self.sites[id].approx_eq(p, self.epsilon)),
                    );
                }
            }
        }
        found.sort_unstable();
        found
    }

    /// Site for `p`, creating one when nothing is within ε.
    pub fn insert(&mut self, p: Point) -> usize {
        if let Some(id) = self.find(&p) {
            return id;
        }
        let id = self.sites.len();
        let key = self.cell(&p);
        self.sites.push(p);
        self.cells.entry(key).or_default().push(id);
        id
    }

    pub fn site(&self, id: usize) -> Point {
        self.sites[id]
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

const SEGMENT_CELL: f64 = 10.16;
const MAX_CELLS_PER_WIRE: i64 = 4096;

/// Coarse bucket grid over wire bounding boxes, used to find the wires whose
/// interior holds a junction or label without scanning every wire.
#[derive(Debug, Clone)]
struct SegmentIndex {
    cell: f64,
    epsilon: f64,
    buckets: HashMap<(i64, i64), Vec<usize>>,
    /// Wires spanning too many cells; always checked
    oversized: Vec<usize>,
}

impl SegmentIndex {
    fn new(wires: &[WireSegment], epsilon: f64) -> Self {
        let mut index = Self {
            cell: SEGMENT_CELL.max(epsilon),
            epsilon,
            buckets: HashMap::new(),
            oversized: Vec::new(),
        };
        for (i, wire) in wires.iter().enumerate() {
            let (x0, y0) = index.cell_of(
                wire.start.x.min(wire.end.x) - epsilon,
                wire.start.y.min(wire.end.y) - epsilon,
            );
            let (x1, y1) = index.cell_of(
                wire.start.x.max(wire.end.x) + epsilon,
                wire.start.y.max(wire.end.y) + epsilon,
            );
            let span = x1
                .saturating_sub(x0)
                .saturating_add(1)
                .saturating_mul(y1.saturating_sub(y0).saturating_add(1));
            if !(1..=MAX_CELLS_PER_WIRE).contains(&span) {
                index.oversized.push(i);
                continue;
            }
            for cx in x0..=x1 {
                for cy in y0..=y1 {
                    index.buckets.entry((cx, cy)).or_default().push(i);
                }
            }
        }
        index
    }

    fn cell_of(&self, x: f64, y: f64) -> (i64, i64) {
        ((x / self.cell).floor() as i64, (y / self.cell).floor() as i64)
    }

    /// Wires whose interior holds `p`, in wire order
    fn interior_hits(&self, wires: &[WireSegment], p: &Point) -> Vec<usize> {
        let mut hits: Vec<usize> = self
            .buckets
            .get(&self.cell_of(p.x, p.y))
            .into_iter()
            .flatten()
            .chain(self.oversized.iter())
            .copied()
            .filter(|&i| wires[i].interior_contains(p, self.epsilon))
            .collect();
        hits.sort_unstable();
        hits.dedup();
        hits
    }
}

/// Everything attached to one connected component
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphComponent {
    pub pins: BTreeSet<PinRef>,
    /// Indices into `Schematic::labels`, in document order
    pub labels: Vec<usize>,
    /// Indices into `Schematic::wires`
    pub wires: BTreeSet<usize>,
}

#[derive(Debug, Clone)]
pub struct ConnectivityGraph {
    epsilon: f64,
    topology: UnGraph<Point, Link>,
    index: PointIndex,
    site_nodes: Vec<Vec<NodeIndex>>,
    /// Dense component id per graph node
    component_of: Vec<usize>,
    components: Vec<GraphComponent>,
    pin_component: BTreeMap<PinRef, usize>,
    unconnected: Vec<UnconnectedPin>,
    unattached_labels: Vec<usize>,
}

impl ConnectivityGraph {
    pub fn build(schematic: &Schematic, epsilon: f64) -> Self {
        let mut builder = Self {
            epsilon,
            topology: UnGraph::new_undirected(),
            index: PointIndex::new(epsilon),
            site_nodes: Vec::new(),
            component_of: Vec::new(),
            components: Vec::new(),
            pin_component: BTreeMap::new(),
            unconnected: Vec::new(),
            unattached_labels: Vec::new(),
        };

        // Wire ends: one node each
        let mut wire_nodes = Vec::with_capacity(schematic.wires.len());
        for (i, wire) in schematic.wires.iter().enumerate() {
            let a = builder.add_node(wire.start);
            let b = builder.add_node(wire.end);
            builder.topology.add_edge(a, b, Link::Wire(i));
            wire_nodes.push((a, b));
        }

        // A multi-point wire is split into pieces sharing a uuid; keep them joined
        for i in 1..schematic.wires.len() {
            let (prev, next) = (&schematic.wires[i - 1], &schematic.wires[i]);
            if prev.uuid.is_some()
                && prev.uuid == next.uuid
                && prev.end.approx_eq(&next.start, epsilon)
            {
                builder
                    .topology
                    .add_edge(wire_nodes[i - 1].1, wire_nodes[i].0, Link::Polyline(i));
            }
        }

        let segments = SegmentIndex::new(&schematic.wires, epsilon);

        for (j, junction) in schematic.junctions.iter().enumerate() {
            let mut sites = builder.occupied_sites(&junction.position);
            if sites.is_empty() {
                let node = builder.add_node(junction.position);
                sites.push(builder.site_of(node));
            }
            let anchor = builder.join_sites(&sites, Link::Junction(j));
            // T-junction onto the middle of another wire
            for i in segments.interior_hits(&schematic.wires, &junction.position) {
                builder
                    .topology
                    .add_edge(anchor, wire_nodes[i].0, Link::Junction(j));
            }
        }

        // Pins touching each other, or carrying a label or power symbol
        // directly, meet at a point no wire reaches
        let mut pin_sites = PointIndex::new(epsilon);
        let mut pins_at_site: Vec<usize> = Vec::new();
        for position in schematic
            .symbols
            .iter()
            .flat_map(|s| s.pins.iter())
            .filter_map(|p| p.position)
        {
            let site = pin_sites.insert(position);
            if site == pins_at_site.len() {
                pins_at_site.push(0);
            }
            pins_at_site[site] += 1;
        }
        let mut meeting_points: Vec<Point> = (0..pin_sites.len())
            .filter(|&site| pins_at_site[site] > 1)
            .map(|site| pin_sites.site(site))
            .collect();
        meeting_points.extend(
            schematic
                .labels
                .iter()
                .map(|l| l.position)
                .filter(|p| pin_sites.find(p).is_some()),
        );
        for point in meeting_points {
            if builder.index.find(&point).is_none() {
                builder.add_node(point);
            }
        }

        // Pins tie together every wire end they touch
        let mut pin_nodes: BTreeMap<PinRef, NodeIndex> = BTreeMap::new();
        let mut pending: BTreeMap<PinRef, UnconnectedPin> = BTreeMap::new();
        for symbol in &schematic.symbols {
            for pin in &symbol.pins {
                let pin_ref = PinRef::new(&symbol.reference, &pin.number);
                let Some(position) = pin.position else {
                    pending.entry(pin_ref.clone()).or_insert(UnconnectedPin {
                        pin: pin_ref,
                        position: None,
                        reason: UnconnectedReason::GeometryUnknown,
                    });
                    continue;
                };
                let sites = builder.occupied_sites(&position);
                if sites.is_empty() {
                    let marked = schematic
                        .no_connects
                        .iter()
                        .any(|nc| nc.position.approx_eq(&position, epsilon));
                    let unconnected = UnconnectedPin {
                        pin: pin_ref.clone(),
                        position: Some(position),
                        reason: if marked {
                            UnconnectedReason::MarkedNoConnect
                        } else {
                            UnconnectedReason::NoCoincidentNode
                        },
                    };
                    // A placed copy wins over an unplaced one
                    match pending.get(&pin_ref) {
                        Some(existing) if existing.position.is_some() => {}
                        _ => {
                            pending.insert(pin_ref, unconnected);
                        }
                    }
                    continue;
                }
                let node = builder.join_sites(&sites, Link::Pin);
                // Same pin placed again (stacked or duplicated symbol)
                if let Some(&first) = pin_nodes.get(&pin_ref) {
                    builder.topology.add_edge(first, node, Link::Pin);
                } else {
                    pin_nodes.insert(pin_ref, node);
                }
            }
        }

        builder.group();

        for (pin_ref, node) in pin_nodes {
            let component = builder.component_of[node.index()];
            builder.components[component].pins.insert(pin_ref.clone());
            builder.pin_component.insert(pin_ref.clone(), component);
            pending.remove(&pin_ref);
        }
        builder.unconnected = pending.into_values().collect();

        for (i, (a, _)) in wire_nodes.iter().enumerate() {
            let component = builder.component_of[a.index()];
            builder.components[component].wires.insert(i);
        }

        for (l, label) in schematic.labels.iter().enumerate() {
            let component = builder.component_at(&label.position).or_else(|| {
                segments
                    .interior_hits(&schematic.wires, &label.position)
                    .first()
                    .map(|&i| builder.component_of[wire_nodes[i].0.index()])
            });
            match component {
                Some(c) => builder.components[c].labels.push(l),
                None => builder.unattached_labels.push(l),
            }
        }

        tracing::debug!(
            "Built connectivity graph: {} nodes, {} edges, {} components, {} unconnected pins",
            builder.topology.node_count(),
            builder.topology.edge_count(),
            builder.components.len(),
            builder.unconnected.len()
        );

        builder
    }

    fn add_node(&mut self, point: Point) -> NodeIndex {
        let node = self.topology.add_node(point);
        let site = self.index.insert(point);
        if site == self.site_nodes.len() {
            self.site_nodes.push(Vec::new());
        }
        self.site_nodes[site].push(node);
        node
    }

    fn site_of(&self, node: NodeIndex) -> usize {
        let point = self.topology[node];
        self.index.find(&point).unwrap_or_default()
    }

    /// Sites within ε of `point` that hold at least one node
    fn occupied_sites(&self, point: &Point) -> Vec<usize> {
        self.index
            .find_all(point)
            .into_iter()
            .filter(|&s| !self.site_nodes[s].is_empty())
            .collect()
    }

    /// Join every node at each of `sites` into one group and return its
    /// first node. `sites` must not be empty.
    fn join_sites(&mut self, sites: &[usize], link: Link) -> NodeIndex {
        let anchor = self.site_nodes[sites[0]][0];
        for &site in sites {
            self.chain_site(site, link);
            let first = self.site_nodes[site][0];
            if first != anchor {
                self.topology.add_edge(anchor, first, link);
            }
        }
        anchor
    }

    /// Join every node at a site
    fn chain_site(&mut self, site: usize, link: Link) {
        let nodes = &self.site_nodes[site];
        let pairs: Vec<(NodeIndex, NodeIndex)> = nodes.windows(2).map(|w| (w[0], w[1])).collect();
        for (a, b) in pairs {
            self.topology.add_edge(a, b, link);
        }
    }

    fn group(&mut self) {
        let mut sets = UnionFind::<usize>::new(self.topology.node_count());
        for edge in self.topology.edge_references() {
            sets.union(edge.source().index(), edge.target().index());
        }
        let labeling = sets.into_labeling();

        // Dense ids in order of first appearance
        let mut dense: HashMap<usize, usize> = HashMap::new();
        self.component_of = labeling
            .iter()
            .map(|root| {
                let next = dense.len();
                *dense.entry(*root).or_insert(next)
            })
            .collect();
        self.components = vec![GraphComponent::default(); dense.len()];
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn topology(&self) -> &UnGraph<Point, Link> {
        &self.topology
    }

    pub fn node_count(&self) -> usize {
        self.topology.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.topology.edge_count()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[GraphComponent] {
        &self.components
    }

    pub fn component(&self, id: usize) -> Option<&GraphComponent> {
        self.components.get(id)
    }

    pub fn component_of_pin(&self, pin: &PinRef) -> Option<usize> {
        self.pin_component.get(pin).copied()
    }

    /// Component of whatever wire end or junction sits at `point`
    pub fn component_at(&self, point: &Point) -> Option<usize> {
        let site = self.index.find(point)?;
        let node = self.site_nodes.get(site)?.first()?;
        Some(self.component_of[node.index()])
    }

    /// Pins with no graph node, in pin order
    pub fn unconnected(&self) -> &[UnconnectedPin] {
        &self.unconnected
    }

    /// Labels touching no wire end, junction or wire
    pub fn unattached_labels(&self) -> &[usize] {
        &self.unattached_labels
    }

    /// Distinct sheet points of a component, sorted
    pub fn points_of(&self, component: usize) -> Vec<Point> {
        let mut seen = BTreeSet::new();
        let mut points = Vec::new();
        for node in self.topology.node_indices() {
            if self.component_of[node.index()] != component {
                continue;
            }
            let point = self.topology[node];
            let site = self.index.find(&point).unwrap_or(usize::MAX);
            if seen.insert(site) {
                points.push(point);
            }
        }
        points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
        points
    }
}
