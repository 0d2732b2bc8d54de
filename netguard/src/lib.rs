//! NetGuard - KiCad schematic connectivity library
//!
//! Reconstructs electrical nets from the geometry of a KiCad schematic
//! (wires, junctions, labels and pin positions), reads the pin-exact netlist
//! export for the same design, and answers connectivity questions over
//! either source.
//!
//! # Quick Start
//!
//! ```no_run
//! use netguard::{AnalysisOptions, NetGuardCore, Source};
//! use std::path::Path;
//!
//! let analysis = NetGuardCore::analyze_files(
//!     Path::new("design.kicad_sch"),
//!     Some(Path::new("design.net")),
//!     &AnalysisOptions::default(),
//! ).unwrap();
//!
//! for net in analysis.nets_of("U1", Source::Geometric).unwrap() {
//!     println!("U1 is on {}", net);
//! }
//!
//! for finding in &analysis.diff().unwrap().findings {
//!     println!("{:?}: {}", finding.severity, finding.message());
//! }
//! ```
//!
//! # Features
//!
//! - **Geometric nets**: wire/junction union-find with ε-tolerant coordinates
//! - **Net naming**: power, global, hierarchical and local labels with a configurable policy
//! - **Authoritative netlist**: s-expression and XML exports
//! - **Diff**: pin-level comparison of the two sources

pub mod connectivity;
pub mod core;
pub mod parser;
pub mod query;

// Re-export main types
pub use crate::core::{
    Analysis, AnalysisOptions, AnalysisStats, ConnectionTrace, Issue, NetGuardCore,
    NetGuardError, PinTrace, Severity,
};
pub use connectivity::{ConnectivityGraph, LabelPolicy, Resolution, TieBreak, UnconnectedReason};
pub use parser::kicad::KicadParser;
pub use parser::netlist::NetlistIndex;
pub use parser::schema::{PinRef, Point, Schematic};
pub use query::{DiffOptions, DiffReport, NetView, Source};

/// Parse a schematic file (convenience wrapper).
pub fn load_design(path: &std::path::Path) -> Result<Schematic, NetGuardError> {
    Ok(KicadParser::parse_schematic(path, None)?)
}

/// Parse a netlist export file (convenience wrapper).
pub fn load_netlist(path: &std::path::Path) -> Result<NetlistIndex, NetGuardError> {
    Ok(NetlistIndex::parse_file(path)?)
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Analysis, AnalysisOptions, DiffOptions, DiffReport, Issue, NetGuardCore, NetGuardError,
        PinRef, Severity, Source,
    };
}
