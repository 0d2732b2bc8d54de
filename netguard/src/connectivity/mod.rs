//! Geometric connectivity: from wires, junctions and labels to named nets.

pub mod graph;
pub mod resolver;

pub use graph::{ConnectivityGraph, GraphComponent, Link, PointIndex, UnconnectedPin, UnconnectedReason};
pub use resolver::{LabelPolicy, NetResolver, Resolution, ResolvedNet, TieBreak};
