//! Library pin geometry
//!
//! Symbol instances only carry an origin, a rotation and a mirror flag. Where
//! each pin actually sits comes from the library symbol: either the copy
//! embedded in the design's `(lib_symbols ...)` section, or an external
//! component library handed in by the caller through [`PinOffsetLookup`].
//!
//! Library coordinates have +Y pointing up while sheet coordinates have +Y
//! pointing down, so the Y offset is negated before rotation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::schema::{Mirror, Point};
use super::sexp::SExp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryPin {
    pub number: String,
    pub name: Option<String>,
    /// Connection point relative to the symbol origin, library axes
    pub offset: Point,
    /// Pin orientation in degrees
    pub rotation: f64,
    /// Unit the pin belongs to; 0 is shared by every unit
    pub unit: u32,
}

impl LibraryPin {
    pub fn new(number: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            number: number.into(),
            name: None,
            offset: Point::new(x, y),
            rotation: 0.0,
            unit: 0,
        }
    }

    pub fn with_unit(mut self, unit: u32) -> Self {
        self.unit = unit;
        self
    }

    pub fn in_unit(&self, unit: u32) -> bool {
        self.unit == 0 || self.unit == unit
    }
}

/// External component-library collaborator.
///
/// Implementations must be shareable across threads: one lookup may serve
/// several concurrent parses.
pub trait PinOffsetLookup: Send + Sync {
    /// Pins of the library symbol `lib_id` as used by `reference`.
    fn pins(&self, lib_id: &str, reference: &str) -> Option<Vec<LibraryPin>>;

    /// Offset of a single pin
    fn pin_offset(&self, lib_id: &str, reference: &str, pin: &str) -> Option<LibraryPin> {
        self.pins(lib_id, reference)?
            .into_iter()
            .find(|p| p.number == pin)
    }
}

/// Absolute sheet position of a pin, given the owning instance's placement.
pub fn place_pin(offset: Point, origin: Point, rotation: f64, mirror: Mirror) -> Point {
    let (x, y) = (offset.x, -offset.y);
    let (sin, cos) = rotation.to_radians().sin_cos();
    // Counter-clockwise on screen, where +Y points down
    let mut rx = x * cos + y * sin;
    let mut ry = -x * sin + y * cos;
    match mirror {
        Mirror::None => {}
        Mirror::X => ry = -ry,
        Mirror::Y => rx = -rx,
    }
    Point::new(origin.x + rx, origin.y + ry).snapped()
}

#[derive(Debug, Clone, Default)]
struct LibSymbol {
    pins: Vec<LibraryPin>,
    power: bool,
    extends: Option<String>,
}

/// Library symbols embedded in the design file
#[derive(Debug, Clone, Default)]
pub struct EmbeddedLibrary {
    symbols: HashMap<String, LibSymbol>,
}

impl EmbeddedLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `(lib_symbols ...)` node of a design.
    pub fn from_lib_symbols(lib_symbols: &SExp) -> Self {
        let mut symbols = HashMap::new();
        for symbol in lib_symbols.children("symbol") {
            let Some(name) = symbol.arg(1).and_then(|n| n.as_str()) else {
                continue;
            };
            let mut lib_symbol = LibSymbol {
                pins: Vec::new(),
                power: symbol.has_flag("power"),
                extends: symbol.value("extends").map(|s| s.to_string()),
            };
            // Pins directly under the symbol belong to every unit
            collect_pins(symbol, 0, &mut lib_symbol.pins);
            for unit_symbol in symbol.children("symbol") {
                let unit = unit_symbol
                    .arg(1)
                    .and_then(|n| n.as_str())
                    .and_then(unit_from_name)
                    .unwrap_or(0);
                collect_pins(unit_symbol, unit, &mut lib_symbol.pins);
            }
            symbols.insert(name.to_string(), lib_symbol);
        }
        Self { symbols }
    }

    pub fn contains(&self, lib_id: &str) -> bool {
        self.symbols.contains_key(lib_id)
    }

    pub fn is_power(&self, lib_id: &str) -> bool {
        self.resolve(lib_id).map(|s| s.power).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Follow `extends` chains to the symbol that owns the graphics.
    fn resolve(&self, lib_id: &str) -> Option<&LibSymbol> {
        let mut current = self.symbols.get(lib_id)?;
        let mut hops = 0;
        while current.pins.is_empty() {
            let Some(parent) = current.extends.as_deref() else {
                break;
            };
            // Derived symbols name their parent without the library prefix
            let parent_id = match lib_id.split_once(':') {
                Some((lib, _)) if !parent.contains(':') => format!("{}:{}", lib, parent),
                _ => parent.to_string(),
            };
            let Some(next) = self
                .symbols
                .get(&parent_id)
                .or_else(|| self.symbols.get(parent))
            else {
                break;
            };
            current = next;
            hops += 1;
            if hops > 16 {
                break;
            }
        }
        Some(current)
    }
}

impl PinOffsetLookup for EmbeddedLibrary {
    fn pins(&self, lib_id: &str, _reference: &str) -> Option<Vec<LibraryPin>> {
        self.resolve(lib_id).map(|s| s.pins.clone())
    }
}

/// Caller-supplied pin table, keyed by library id with optional
/// per-reference overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticLibrary {
    by_lib_id: HashMap<String, Vec<LibraryPin>>,
    by_reference: HashMap<String, Vec<LibraryPin>>,
}

impl StaticLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, lib_id: impl Into<String>, pins: Vec<LibraryPin>) -> Self {
        self.by_lib_id.insert(lib_id.into(), pins);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>, pins: Vec<LibraryPin>) -> Self {
        self.by_reference.insert(reference.into(), pins);
        self
    }
}

impl PinOffsetLookup for StaticLibrary {
    fn pins(&self, lib_id: &str, reference: &str) -> Option<Vec<LibraryPin>> {
        self.by_reference
            .get(reference)
            .or_else(|| self.by_lib_id.get(lib_id))
            .cloned()
    }
}

/// Unit sub-symbols are named `<NAME>_<UNIT>_<STYLE>`.
fn unit_from_name(name: &str) -> Option<u32> {
    let mut parts = name.rsplitn(3, '_');
    let _style = parts.next()?;
    parts.next()?.parse().ok()
}

/// Pin format: (pin TYPE SHAPE (at X Y ANGLE) (length L) (name "N") (number "1"))
fn collect_pins(symbol: &SExp, unit: u32, out: &mut Vec<LibraryPin>) {
    for pin in symbol.children("pin") {
        let Some(number) = pin.value("number") else {
            continue;
        };
        let Some(at) = pin.child("at") else {
            continue;
        };
        let (Some(x), Some(y)) = (
            at.arg(1).and_then(|v| v.as_f64()),
            at.arg(2).and_then(|v| v.as_f64()),
        ) else {
            continue;
        };
        let rotation = at.arg(3).and_then(|v| v.as_f64()).unwrap_or(0.0);
        let name = pin
            .value("name")
            .filter(|n| !n.is_empty() && *n != "~")
            .map(|n| n.to_string());
        out.push(LibraryPin {
            number: number.to_string(),
            name,
            offset: Point::new(x, y),
            rotation,
            unit,
        });
    }
}
