//! KiCAD Schematic entity extraction
//!
//! Walks the parsed `(kicad_sch ...)` tree and materialises typed entities:
//! symbol instances with absolute pin positions, wire segments, junctions,
//! no-connect markers and labels. Follows the S-Expression file format:
//! https://dev-docs.kicad.org/en/file-formats/sexpr-intro/index.html
//!
//! Key format details:
//! - All values are in millimeters
//! - Position: (at X Y [ANGLE])
//! - Points: (pts (xy X Y) ...)
//! - Properties: (property "KEY" "VALUE" ...)
//!
//! Extraction collects problems instead of stopping at the first one: an
//! entity that cannot be read is skipped and recorded as a [`DesignIssue`],
//! everything else is kept.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use thiserror::Error;
use uuid::Uuid;

use crate::parser::format_detector::{detect_format, KicadVersion};
use crate::parser::library::{place_pin, EmbeddedLibrary, LibraryPin, PinOffsetLookup};
use crate::parser::schema::*;
use crate::parser::sexp::{ParseError, SExp, SExpParser};

#[derive(Debug, Error)]
pub enum KicadParseError {
    #[error("S-expression parse error: {0}")]
    SExpParse(#[from] ParseError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid schematic format: {0}")]
    InvalidFormat(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// What a `(symbol ...)` instance turned out to be
enum Placed {
    Component(SymbolInstance),
    /// Power symbols name the rail they sit on
    Power(Label),
    /// Flags and other virtual symbols
    Ignored,
}

/// Parser for KiCAD schematic files (.kicad_sch, KiCad 6-9)
pub struct KicadParser;

impl KicadParser {
    /// Read and parse a schematic file.
    pub fn parse_schematic(
        path: &Path,
        lookup: Option<&dyn PinOffsetLookup>,
    ) -> Result<Schematic, KicadParseError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_schematic_str(&content, lookup)
    }

    /// Parse schematic text. `lookup` supplies pin geometry for symbols whose
    /// library definition is not embedded in the file.
    pub fn parse_schematic_str(
        content: &str,
        lookup: Option<&dyn PinOffsetLookup>,
    ) -> Result<Schematic, KicadParseError> {
        if detect_format(content).is_some_and(|v| v.is_legacy()) {
            return Err(KicadParseError::InvalidFormat(
                "legacy (KiCad 4/5) schematics are not nested-expression files".to_string(),
            ));
        }
        let root = SExpParser::new(content).parse()?;
        Self::extract(&root, lookup)
    }

    /// Extract entities from an already-parsed tree.
    pub fn extract(
        root: &SExp,
        lookup: Option<&dyn PinOffsetLookup>,
    ) -> Result<Schematic, KicadParseError> {
        // Root should be (kicad_sch ...)
        match root.head() {
            Some("kicad_sch") => {}
            Some(other) => {
                return Err(KicadParseError::InvalidFormat(format!(
                    "Expected kicad_sch, found {}",
                    other
                )))
            }
            None => {
                return Err(KicadParseError::InvalidFormat(
                    "Expected kicad_sch root".to_string(),
                ))
            }
        }

        let library = root
            .child("lib_symbols")
            .map(EmbeddedLibrary::from_lib_symbols)
            .unwrap_or_default();

        let mut schematic = Schematic::new();
        schematic.uuid = parse_uuid(root);
        schematic.version = root.value("version").map(|v| v.to_string());
        schematic.kicad_version = schematic
            .version
            .as_deref()
            .and_then(|v| v.parse().ok())
            .and_then(KicadVersion::from_file_version);
        schematic.generator = root.value("generator").map(|v| v.to_string());

        let mut placed: HashSet<(String, u32)> = HashSet::new();

        for item in root.as_list().unwrap_or(&[]).iter().skip(1) {
            let Some(tag) = item.head() else {
                continue;
            };
            match tag {
                "symbol" => match Self::parse_symbol(item, &library, lookup) {
                    Ok(Placed::Component(symbol)) => {
                        if symbol.pin_geometry == PinGeometry::Unknown {
                            record(
                                &mut schematic.issues,
                                DesignIssue::MissingPinGeometry {
                                    reference: symbol.reference.clone(),
                                    lib_id: symbol.lib_id.clone(),
                                },
                            );
                        }
                        if !placed.insert((symbol.reference.clone(), symbol.unit)) {
                            record(
                                &mut schematic.issues,
                                DesignIssue::DuplicateReference {
                                    reference: symbol.reference.clone(),
                                    unit: symbol.unit,
                                },
                            );
                        }
                        schematic.symbols.push(symbol);
                    }
                    Ok(Placed::Power(label)) => schematic.labels.push(label),
                    Ok(Placed::Ignored) => {}
                    Err(e) => record(&mut schematic.issues, invalid("symbol", e)),
                },
                "wire" => match Self::parse_wire(item) {
                    Ok(segments) => schematic.wires.extend(segments),
                    Err(e) => record(&mut schematic.issues, invalid("wire", e)),
                },
                "junction" => match parse_at(item) {
                    Ok((position, _)) => schematic.junctions.push(Junction {
                        position,
                        uuid: parse_uuid(item),
                    }),
                    Err(e) => record(&mut schematic.issues, invalid("junction", e)),
                },
                "no_connect" => match parse_at(item) {
                    Ok((position, _)) => schematic.no_connects.push(NoConnect {
                        position,
                        uuid: parse_uuid(item),
                    }),
                    Err(e) => record(&mut schematic.issues, invalid("no_connect", e)),
                },
                "title_block" => schematic.title_block = Some(parse_title_block(item)),
                "sheet" => match Self::parse_sheet(item) {
                    Ok(sheet) => schematic.sheets.push(sheet),
                    Err(e) => record(&mut schematic.issues, invalid("sheet", e)),
                },
                "label" | "global_label" | "hierarchical_label" => {
                    let scope = match tag {
                        "global_label" => LabelScope::Global,
                        "hierarchical_label" => LabelScope::Hierarchical,
                        _ => LabelScope::Local,
                    };
                    match Self::parse_label(item, scope) {
                        Ok(label) => schematic.labels.push(label),
                        Err(e) => record(&mut schematic.issues, invalid(tag, e)),
                    }
                }
                _ => {
                    // Unknown elements pass through untouched
                }
            }
        }

        tracing::debug!(
            "Extracted {} symbols, {} wire segments, {} junctions, {} labels ({} issues)",
            schematic.symbols.len(),
            schematic.wires.len(),
            schematic.junctions.len(),
            schematic.labels.len(),
            schematic.issues.len()
        );

        Ok(schematic)
    }

    fn parse_symbol(
        sexp: &SExp,
        library: &EmbeddedLibrary,
        lookup: Option<&dyn PinOffsetLookup>,
    ) -> Result<Placed, KicadParseError> {
        let lib_id = sexp
            .value("lib_id")
            .ok_or_else(|| KicadParseError::MissingField("lib_id".to_string()))?;
        // An instance may point at a renamed embedded copy of its symbol
        let lib_key = sexp.value("lib_name").unwrap_or(lib_id);
        let (position, rotation) = parse_at(sexp)?;
        let mirror = match sexp.value("mirror") {
            Some("x") => Mirror::X,
            Some("y") => Mirror::Y,
            _ => Mirror::None,
        };
        let unit = sexp
            .value("unit")
            .and_then(|u| u.parse::<u32>().ok())
            .unwrap_or(1);

        // Format: (property "KEY" "VALUE" ...)
        let mut properties = BTreeMap::new();
        for prop in sexp.children("property") {
            if let (Some(key), Some(val)) = (
                prop.arg(1).and_then(|k| k.as_str()),
                prop.arg(2).and_then(|v| v.as_str()),
            ) {
                properties.insert(key.to_string(), val.to_string());
            }
        }

        let mut reference = properties.get("Reference").cloned().unwrap_or_default();
        if reference.is_empty() || reference.ends_with('?') {
            if let Some(annotated) = instance_reference(sexp) {
                reference = annotated;
            }
        }
        let value = properties.get("Value").cloned().unwrap_or_default();
        let footprint = properties
            .get("Footprint")
            .filter(|f| !f.is_empty())
            .cloned();

        let is_power = lib_id.starts_with("power:") || library.is_power(lib_key);
        if is_power && (lib_id.ends_with("PWR_FLAG") || value == "PWR_FLAG") {
            return Ok(Placed::Ignored);
        }

        let (library_pins, pin_geometry) = match library.pins(lib_key, &reference) {
            Some(pins) => (Some(pins), PinGeometry::Embedded),
            _ => match lookup.and_then(|l| l.pins(lib_id, &reference)) {
                Some(pins) => (Some(pins), PinGeometry::Lookup),
                None => (None, PinGeometry::Unknown),
            },
        };

        let pins: Vec<SymbolPin> = match library_pins {
            Some(lib_pins) => lib_pins
                .iter()
                .filter(|p| p.in_unit(unit))
                .map(|p: &LibraryPin| SymbolPin {
                    number: p.number.clone(),
                    name: p.name.clone(),
                    position: Some(place_pin(p.offset, position, rotation, mirror)),
                })
                .collect(),
            // Pin geometry unknown: keep the pins the instance lists, unplaced.
            // Format: (pin "1" (uuid "..."))
            None => sexp
                .children("pin")
                .filter_map(|p| p.arg(1).and_then(|n| n.as_str()))
                .map(|number| SymbolPin {
                    number: number.to_string(),
                    name: None,
                    position: None,
                })
                .collect(),
        };

        if is_power {
            let text = if value.is_empty() {
                lib_id.rsplit(':').next().unwrap_or(lib_id).to_string()
            } else {
                value
            };
            let anchor = pins
                .iter()
                .find_map(|p| p.position)
                .unwrap_or(position);
            return Ok(Placed::Power(Label {
                text,
                position: anchor,
                rotation,
                scope: LabelScope::Power,
                uuid: parse_uuid(sexp),
            }));
        }

        if reference.starts_with('#') {
            return Ok(Placed::Ignored);
        }
        if reference.is_empty() {
            return Err(KicadParseError::MissingField("Reference property".to_string()));
        }

        Ok(Placed::Component(SymbolInstance {
            uuid: parse_uuid(sexp),
            reference,
            value,
            lib_id: lib_id.to_string(),
            footprint,
            position,
            rotation,
            mirror,
            unit,
            properties,
            pins,
            pin_geometry,
        }))
    }

    /// Parse wire with coordinate point list.
    /// Format: (pts (xy X Y) (xy X Y) ...); consecutive points form segments.
    fn parse_wire(sexp: &SExp) -> Result<Vec<WireSegment>, KicadParseError> {
        let pts = sexp
            .child("pts")
            .ok_or_else(|| KicadParseError::MissingField("wire pts".to_string()))?;

        let mut points = Vec::new();
        for xy in pts.children("xy") {
            let (Some(x), Some(y)) = (
                xy.arg(1).and_then(|v| v.as_f64()),
                xy.arg(2).and_then(|v| v.as_f64()),
            ) else {
                return Err(KicadParseError::InvalidFormat(format!(
                    "non-numeric wire point {}",
                    xy
                )));
            };
            points.push(Point::new(x, y));
        }

        if points.len() < 2 {
            return Err(KicadParseError::InvalidFormat(
                "wire needs at least two points".to_string(),
            ));
        }

        let uuid = parse_uuid(sexp);
        Ok(points
            .windows(2)
            .map(|pair| WireSegment {
                start: pair[0],
                end: pair[1],
                uuid,
            })
            .collect())
    }

    /// Format: (sheet (at X Y) (size W H) (uuid "...")
    ///   (property "Sheetname" "NAME" ...) (property "Sheetfile" "FILE" ...)
    ///   (pin "NAME" SHAPE (at X Y ANGLE) (uuid "...")) ...)
    fn parse_sheet(sexp: &SExp) -> Result<Sheet, KicadParseError> {
        let (position, _) = parse_at(sexp)?;
        let size = sexp.child("size").and_then(|size| {
            Some((size.arg(1)?.as_f64()?, size.arg(2)?.as_f64()?))
        });

        let mut name = None;
        let mut file = None;
        for prop in sexp.children("property") {
            let (Some(key), Some(val)) = (
                prop.arg(1).and_then(|k| k.as_str()),
                prop.arg(2).and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            // KiCad 6 spelled these with a space
            match key {
                "Sheetname" | "Sheet name" => name = Some(val.to_string()),
                "Sheetfile" | "Sheet file" => file = Some(val.to_string()),
                _ => {}
            }
        }
        let file = file.ok_or_else(|| KicadParseError::MissingField("Sheetfile".to_string()))?;
        let name = name.unwrap_or_else(|| file.trim_end_matches(".kicad_sch").to_string());

        let pins = sexp
            .children("pin")
            .filter_map(|pin| {
                let name = pin.arg(1)?.as_str()?.to_string();
                let (position, _) = parse_at(pin).ok()?;
                Some(SheetPin {
                    name,
                    shape: pin.arg(2).and_then(|s| s.as_atom()).map(|s| s.to_string()),
                    position,
                    uuid: parse_uuid(pin),
                })
            })
            .collect();

        Ok(Sheet {
            name,
            file,
            position,
            size,
            uuid: parse_uuid(sexp),
            pins,
        })
    }

    fn parse_label(sexp: &SExp, scope: LabelScope) -> Result<Label, KicadParseError> {
        // Label text is the second element in the list: (label "TEXT" (at ...) ...)
        let text = sexp
            .arg(1)
            .and_then(|t| t.as_str())
            .ok_or_else(|| KicadParseError::MissingField("label text".to_string()))?
            .to_string();

        let (position, rotation) = parse_at(sexp)?;

        Ok(Label {
            text,
            position,
            rotation,
            scope,
            uuid: parse_uuid(sexp),
        })
    }
}

/// Parse position identifier.
/// Format: (at X Y [ANGLE])
fn parse_at(sexp: &SExp) -> Result<(Point, f64), KicadParseError> {
    let at = sexp
        .child("at")
        .ok_or_else(|| KicadParseError::MissingField("at".to_string()))?;

    let (Some(x), Some(y)) = (
        at.arg(1).and_then(|v| v.as_f64()),
        at.arg(2).and_then(|v| v.as_f64()),
    ) else {
        return Err(KicadParseError::InvalidFormat(
            "Invalid 'at' format - requires numeric X and Y".to_string(),
        ));
    };
    let rotation = at.arg(3).and_then(|r| r.as_f64()).unwrap_or(0.0);

    Ok((Point::new(x, y), rotation))
}

/// Format: (title_block (title "T") (date "D") (rev "R") (company "C") (comment N "TEXT") ...)
fn parse_title_block(sexp: &SExp) -> TitleBlock {
    let text = |key: &str| sexp.value(key).map(|v| v.to_string());
    TitleBlock {
        title: text("title"),
        date: text("date"),
        rev: text("rev"),
        company: text("company"),
        comments: sexp
            .children("comment")
            .filter_map(|c| {
                let number = c.arg(1)?.as_str()?.parse::<u32>().ok()?;
                Some((number, c.arg(2)?.as_str()?.to_string()))
            })
            .collect(),
    }
}

fn parse_uuid(sexp: &SExp) -> Option<Uuid> {
    sexp.value("uuid").and_then(|u| Uuid::parse_str(u).ok())
}

/// Annotated reference from `(instances (project "p" (path "/..." (reference "R1") ...)))`
fn instance_reference(sexp: &SExp) -> Option<String> {
    sexp.child("instances")?
        .children("project")
        .flat_map(|project| project.children("path"))
        .filter_map(|path| path.value("reference"))
        .find(|r| !r.ends_with('?'))
        .map(|r| r.to_string())
}

fn invalid(kind: &str, error: KicadParseError) -> DesignIssue {
    DesignIssue::InvalidEntity {
        kind: kind.to_string(),
        reason: error.to_string(),
    }
}

fn record(issues: &mut Vec<DesignIssue>, issue: DesignIssue) {
    tracing::warn!("{}", issue);
    issues.push(issue);
}
