use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::format_detector::KicadVersion;

/// Default coincidence tolerance in millimetres
pub const DEFAULT_EPSILON: f64 = 0.01;

/// Coordinate on the sheet, in millimetres. Design files carry at most four
/// decimals, so derived coordinates are snapped back to that resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Coincidence test used everywhere a "same point" decision is made.
    pub fn approx_eq(&self, other: &Point, epsilon: f64) -> bool {
        self.distance_to(other) <= epsilon
    }

    /// Snap to the 0.0001 mm file resolution
    pub fn snapped(self) -> Self {
        let snap = |v: f64| {
            let r = (v * 10_000.0).round() / 10_000.0;
            if r == 0.0 { 0.0 } else { r }
        };
        Self {
            x: snap(self.x),
            y: snap(self.y),
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// (reference designator, pin number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinRef {
    pub reference: String,
    pub pin: String,
}

impl PinRef {
    pub fn new(reference: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            pin: pin.into(),
        }
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.reference, self.pin)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mirror {
    #[default]
    None,
    /// Mirrored about the X axis (vertical flip)
    X,
    /// Mirrored about the Y axis (horizontal flip)
    Y,
}

/// Where a symbol's pin geometry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinGeometry {
    /// The design's own `lib_symbols` section
    Embedded,
    /// The caller-supplied pin-offset lookup
    Lookup,
    /// Neither; pins are known by number only
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolPin {
    pub number: String,
    pub name: Option<String>,
    /// Absolute sheet position; `None` when pin geometry is unknown
    pub position: Option<Point>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInstance {
    pub uuid: Option<Uuid>,
    pub reference: String, // R1, C1, U1
    pub value: String,     // 10k, 100nF, STM32F4
    pub lib_id: String,    // Device:R
    pub footprint: Option<String>,
    pub position: Point,
    pub rotation: f64, // degrees
    pub mirror: Mirror,
    pub unit: u32,
    pub properties: BTreeMap<String, String>,
    pub pins: Vec<SymbolPin>,
    pub pin_geometry: PinGeometry,
}

impl SymbolInstance {
    pub fn pin_refs(&self) -> impl Iterator<Item = PinRef> + '_ {
        self.pins
            .iter()
            .map(move |pin| PinRef::new(&self.reference, &pin.number))
    }

    pub fn pin(&self, number: &str) -> Option<&SymbolPin> {
        self.pins.iter().find(|p| p.number == number)
    }
}

/// One straight wire piece; undirected for connectivity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSegment {
    pub start: Point,
    pub end: Point,
    pub uuid: Option<Uuid>,
}

impl WireSegment {
    pub fn new(start: Point, end: Point) -> Self {
        Self {
            start,
            end,
            uuid: None,
        }
    }

    /// True if `point` lies on the segment but is not one of its endpoints.
    pub fn interior_contains(&self, point: &Point, epsilon: f64) -> bool {
        if point.approx_eq(&self.start, epsilon) || point.approx_eq(&self.end, epsilon) {
            return false;
        }
        distance_point_to_segment(point, &self.start, &self.end) <= epsilon
    }
}

/// Distance from point to line segment
pub fn distance_point_to_segment(point: &Point, start: &Point, end: &Point) -> f64 {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length_sq = dx * dx + dy * dy;

    if length_sq < 1e-12 {
        return point.distance_to(start);
    }

    let t = ((point.x - start.x) * dx + (point.y - start.y) * dy) / length_sq;
    let t = t.clamp(0.0, 1.0);
    let proj = Point {
        x: start.x + t * dx,
        y: start.y + t * dy,
    };
    point.distance_to(&proj)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Junction {
    pub position: Point,
    pub uuid: Option<Uuid>,
}

/// Marker declaring a pin intentionally unconnected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoConnect {
    pub position: Point,
    pub uuid: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelScope {
    Local,
    Global,
    Hierarchical,
    /// Power symbol; the text is the rail name
    Power,
}

impl LabelScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelScope::Local => "local",
            LabelScope::Global => "global",
            LabelScope::Hierarchical => "hierarchical",
            LabelScope::Power => "power",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub text: String,
    pub position: Point,
    pub rotation: f64,
    pub scope: LabelScope,
    pub uuid: Option<Uuid>,
}

impl Label {
    pub fn new(text: impl Into<String>, position: Point, scope: LabelScope) -> Self {
        Self {
            text: text.into(),
            position,
            rotation: 0.0,
            scope,
            uuid: None,
        }
    }
}

/// Drawing frame text from `(title_block ...)`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TitleBlock {
    pub title: Option<String>,
    pub date: Option<String>,
    pub rev: Option<String>,
    pub company: Option<String>,
    /// Numbered comment lines
    pub comments: BTreeMap<u32, String>,
}

/// Connection point on the border of a sheet symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetPin {
    pub name: String,
    /// input, output, bidirectional, tri_state or passive
    pub shape: Option<String>,
    pub position: Point,
    pub uuid: Option<Uuid>,
}

/// A child sheet placed on this one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    /// Path of the child schematic, relative to this file
    pub file: String,
    pub position: Point,
    pub size: Option<(f64, f64)>,
    pub uuid: Option<Uuid>,
    pub pins: Vec<SheetPin>,
}

/// Recoverable problem found while extracting or resolving a design.
/// Collected on the result instead of aborting the pass.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum DesignIssue {
    #[error("Duplicate reference designator {reference} (unit {unit})")]
    DuplicateReference { reference: String, unit: u32 },

    #[error("No pin geometry for {reference} ({lib_id}); its pins cannot be placed")]
    MissingPinGeometry { reference: String, lib_id: String },

    #[error("Skipped {kind} entity: {reason}")]
    InvalidEntity { kind: String, reason: String },

    #[error("Conflicting power net names on one net: {}", names.join(", "))]
    ConflictingNetName { names: Vec<String>, chosen: String },
}

/// Typed entities extracted from one design snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schematic {
    pub uuid: Option<Uuid>,
    pub version: Option<String>,
    pub kicad_version: Option<KicadVersion>,
    pub generator: Option<String>,
    pub title_block: Option<TitleBlock>,
    pub sheets: Vec<Sheet>,
    pub symbols: Vec<SymbolInstance>,
    pub wires: Vec<WireSegment>,
    pub junctions: Vec<Junction>,
    pub no_connects: Vec<NoConnect>,
    pub labels: Vec<Label>,
    pub issues: Vec<DesignIssue>,
}

impl Schematic {
    pub fn new() -> Self {
        Self {
            uuid: None,
            version: None,
            kicad_version: None,
            generator: None,
            title_block: None,
            sheets: Vec::new(),
            symbols: Vec::new(),
            wires: Vec::new(),
            junctions: Vec::new(),
            no_connects: Vec::new(),
            labels: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// All units placed for a reference designator
    pub fn symbols_for<'a, 'r>(
        &'a self,
        reference: &'r str,
    ) -> impl Iterator<Item = &'a SymbolInstance> + 'r
    where
        'a: 'r,
    {
        self.symbols.iter().filter(move |s| s.reference == reference)
    }

    pub fn symbol(&self, reference: &str) -> Option<&SymbolInstance> {
        self.symbols_for(reference).next()
    }

    /// Symbols whose reference, value or library id matches `pattern`, a
    /// case-insensitive regular expression. Document order.
    pub fn search_components(&self, pattern: &str) -> Result<Vec<&SymbolInstance>, regex::Error> {
        let regex = Regex::new(&format!("(?i){}", pattern))?;
        Ok(self
            .symbols
            .iter()
            .filter(|s| {
                regex.is_match(&s.reference) || regex.is_match(&s.value) || regex.is_match(&s.lib_id)
            })
            .collect())
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Symbols whose origin lies within `radius` of `center`, nearest first.
    pub fn symbols_within(&self, center: Point, radius: f64) -> Vec<&SymbolInstance> {
        let mut found: Vec<(f64, &SymbolInstance)> = self
            .symbols
            .iter()
            .map(|s| (s.position.distance_to(&center), s))
            .filter(|(d, _)| *d <= radius)
            .collect();
        found.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.reference.cmp(&b.1.reference))
        });
        found.into_iter().map(|(_, s)| s).collect()
    }
}

impl Default for Schematic {
    fn default() -> Self {
        Self::new()
    }
}
