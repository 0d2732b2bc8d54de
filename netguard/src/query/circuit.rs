//! Circuit Graph
//!
//! Bipartite component/net graph built from a [`NetView`] using petgraph.
//! Components point at the nets their pins sit on, one edge per pin, which
//! makes the usual traversals cheap:
//! - Nets of a component
//! - Components on a net
//! - Shortest signal path between two components

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::view::NetView;

/// Node type in the circuit graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CircuitNode {
    /// A component, by reference designator
    Component(String),

    /// A net, by name
    Net(String),
}

impl CircuitNode {
    pub fn is_component(&self) -> bool {
        matches!(self, CircuitNode::Component(_))
    }

    pub fn is_net(&self) -> bool {
        matches!(self, CircuitNode::Net(_))
    }

    pub fn as_component(&self) -> Option<&str> {
        match self {
            CircuitNode::Component(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_net(&self) -> Option<&str> {
        match self {
            CircuitNode::Net(n) => Some(n),
            _ => None,
        }
    }
}

/// Edge type in the circuit graph - represents a pin connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitEdge {
    /// Pin number on the component side
    pub pin_number: String,
}

impl CircuitEdge {
    pub fn new(pin_number: impl Into<String>) -> Self {
        Self {
            pin_number: pin_number.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Circuit {
    graph: DiGraph<CircuitNode, CircuitEdge>,

    /// Index mapping: component reference -> node index
    component_indices: HashMap<String, NodeIndex>,

    /// Index mapping: net name -> node index
    net_indices: HashMap<String, NodeIndex>,
}

impl Circuit {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            component_indices: HashMap::new(),
            net_indices: HashMap::new(),
        }
    }

    pub fn from_view(view: &NetView) -> Self {
        let mut circuit = Self::new();

        // Pass 1: every known component, even ones with no connected pin
        for reference in view.components() {
            circuit.add_component(reference);
        }

        // Pass 2: nets and their pin edges
        for net in view.nets() {
            circuit.add_net(&net.name);
            for pin in &net.pins {
                circuit.connect(&pin.reference, &pin.pin, &net.name);
            }
        }

        circuit
    }

    pub fn add_component(&mut self, reference: &str) -> NodeIndex {
        if let Some(&idx) = self.component_indices.get(reference) {
            return idx;
        }
        let idx = self
            .graph
            .add_node(CircuitNode::Component(reference.to_string()));
        self.component_indices.insert(reference.to_string(), idx);
        idx
    }

    pub fn add_net(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.net_indices.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(CircuitNode::Net(name.to_string()));
        self.net_indices.insert(name.to_string(), idx);
        idx
    }

    /// Edge from component to net (represents the pin connection)
    pub fn connect(&mut self, reference: &str, pin: &str, net: &str) {
        let comp_idx = self.add_component(reference);
        let net_idx = self.add_net(net);
        self.graph.add_edge(comp_idx, net_idx, CircuitEdge::new(pin));
    }

    pub fn has_component(&self, reference: &str) -> bool {
        self.component_indices.contains_key(reference)
    }

    pub fn has_net(&self, name: &str) -> bool {
        self.net_indices.contains_key(name)
    }

    /// Nets connected to a component, sorted
    pub fn nets_for_component(&self, reference: &str) -> Vec<&str> {
        let Some(&comp_idx) = self.component_indices.get(reference) else {
            return Vec::new();
        };

        let nets: BTreeSet<&str> = self
            .graph
            .edges_directed(comp_idx, Direction::Outgoing)
            .filter_map(|edge| self.graph.node_weight(edge.target()).and_then(|n| n.as_net()))
            .collect();
        nets.into_iter().collect()
    }

    /// Components connected to a net, sorted
    pub fn components_on_net(&self, net_name: &str) -> Vec<&str> {
        let Some(&net_idx) = self.net_indices.get(net_name) else {
            return Vec::new();
        };

        let components: BTreeSet<&str> = self
            .graph
            .edges_directed(net_idx, Direction::Incoming)
            .filter_map(|edge| {
                self.graph
                    .node_weight(edge.source())
                    .and_then(|n| n.as_component())
            })
            .collect();
        components.into_iter().collect()
    }

    /// Pins through which a component reaches a net
    pub fn connection_pins(&self, reference: &str, net_name: &str) -> Vec<&str> {
        let (Some(&comp_idx), Some(&net_idx)) = (
            self.component_indices.get(reference),
            self.net_indices.get(net_name),
        ) else {
            return Vec::new();
        };

        let mut pins: Vec<&str> = self
            .graph
            .edges_connecting(comp_idx, net_idx)
            .map(|e| e.weight().pin_number.as_str())
            .collect();
        pins.sort_unstable();
        pins
    }

    /// Shortest chain between two components through shared nets, e.g.
    /// `["U1", "[SDA]", "R4"]`.
    pub fn find_path(&self, from_ref: &str, to_ref: &str) -> Option<Vec<String>> {
        use petgraph::algo::astar;

        let from_idx = self.component_indices.get(from_ref)?;
        let to_idx = self.component_indices.get(to_ref)?;

        // Edges only run component -> net; walk them both ways
        let undirected = self.graph.clone().into_edge_type::<petgraph::Undirected>();
        let result = astar(&undirected, *from_idx, |n| n == *to_idx, |_| 1, |_| 0);

        result.map(|(_, path)| {
            path.into_iter()
                .filter_map(|idx| match self.graph.node_weight(idx) {
                    Some(CircuitNode::Component(c)) => Some(c.clone()),
                    Some(CircuitNode::Net(n)) => Some(format!("[{}]", n)),
                    None => None,
                })
                .collect()
        })
    }

    /// Get statistics about the circuit
    pub fn stats(&self) -> CircuitStats {
        let floating_components = self
            .component_indices
            .values()
            .filter(|&&idx| {
                self.graph
                    .edges_directed(idx, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .count();
        let single_pin_nets = self
            .net_indices
            .values()
            .filter(|&&idx| self.graph.edges_directed(idx, Direction::Incoming).count() == 1)
            .count();

        CircuitStats {
            component_count: self.component_indices.len(),
            net_count: self.net_indices.len(),
            connection_count: self.graph.edge_count(),
            floating_components,
            single_pin_nets,
        }
    }
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about a circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStats {
    pub component_count: usize,
    pub net_count: usize,
    pub connection_count: usize,
    /// Components with no pin on any net
    pub floating_components: usize,
    pub single_pin_nets: usize,
}
