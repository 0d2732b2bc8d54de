//! Queries over either source of truth and the comparison between them.

pub mod circuit;
pub mod diff;
pub mod view;

pub use circuit::{Circuit, CircuitEdge, CircuitNode, CircuitStats};
pub use diff::{diff, DiffFinding, DiffOptions, DiffReport, FindingKind, Side};
pub use view::{strip_sheet_prefix, NetView, Source, ViewNet};
