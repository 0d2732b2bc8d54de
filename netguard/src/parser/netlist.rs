//! Authoritative netlist parser
//!
//! Reads the pin-exact netlist an EDA tool exports next to the design, either
//! as a nested-expression file (`(export (components ...) (nets ...))`) or as
//! the XML flavour of the same export (`<export><components/><nets/></export>`).
//!
//! Nothing here is geometric. Every pin's net is stated explicitly, so the
//! parser trusts the record and only checks that it is internally coherent
//! before building the two lookup directions over it.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use roxmltree::Document;
use serde::Serialize;
use thiserror::Error;

use crate::parser::format_detector::{detect_netlist_format, NetlistFormat};
use crate::parser::schema::PinRef;
use crate::parser::sexp::{ParseError, SExp, SExpParser};

#[derive(Debug, Error)]
pub enum NetlistError {
    #[error("S-expression parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unrecognised netlist format (expected an (export ...) or <export> document)")]
    UnknownFormat,

    #[error("Missing required field: {0}")]
    MissingField(String),

    /// The component view and the net view of the record disagree
    #[error("Inconsistent netlist index: {0}")]
    Inconsistent(String),
}

pub type Result<T> = std::result::Result<T, NetlistError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetlistComponent {
    pub reference: String,
    pub value: String,
    pub footprint: Option<String>,
    pub lib: Option<String>,
    pub part: Option<String>,
}

/// One `(node ...)` of a net
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetNode {
    pub reference: String,
    pub pin: String,
    pub pin_function: Option<String>,
    pub pin_type: Option<String>,
}

impl NetNode {
    pub fn pin_ref(&self) -> PinRef {
        PinRef::new(&self.reference, &self.pin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthoritativeNet {
    pub code: String,
    pub name: String,
    pub nodes: Vec<NetNode>,
}

impl AuthoritativeNet {
    pub fn pins(&self) -> impl Iterator<Item = PinRef> + '_ {
        self.nodes.iter().map(NetNode::pin_ref)
    }

    /// Single-pin nets the exporter invents for pins wired to nothing,
    /// e.g. `unconnected-(U1-NC-Pad4)`.
    pub fn is_unconnected_placeholder(&self) -> bool {
        self.nodes.len() <= 1 && self.name.starts_with("unconnected-(")
    }
}

/// Immutable two-way index over an authoritative netlist.
///
/// `by_component` answers reference -> pin -> net, `by_net` answers
/// net -> pins. Both are filled from the same node list and cross-checked
/// when the index is built; a record that fails the check is rejected.
#[derive(Debug, Clone)]
pub struct NetlistIndex {
    format: Option<NetlistFormat>,
    components: BTreeMap<String, NetlistComponent>,
    nets: Vec<AuthoritativeNet>,
    by_component: BTreeMap<String, BTreeMap<String, String>>,
    by_net: BTreeMap<String, BTreeSet<PinRef>>,
}

impl NetlistIndex {
    /// Parse a netlist export, detecting its syntax.
    pub fn parse(content: &str) -> Result<Self> {
        match detect_netlist_format(content) {
            Some(NetlistFormat::SExpr) => Self::parse_sexpr(content),
            Some(NetlistFormat::Xml) => Self::parse_xml(content),
            None => Err(NetlistError::UnknownFormat),
        }
    }

    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse_sexpr(content: &str) -> Result<Self> {
        let root = SExpParser::new(content).parse()?;
        if !root.is_head("export") {
            return Err(NetlistError::UnknownFormat);
        }

        let mut components = Vec::new();
        if let Some(section) = root.child("components") {
            for comp in section.children("comp") {
                components.push(sexpr_component(comp)?);
            }
        }

        let mut nets = Vec::new();
        if let Some(section) = root.child("nets") {
            for net in section.children("net") {
                nets.push(sexpr_net(net)?);
            }
        }

        let mut index = Self::build(components, nets)?;
        index.format = Some(NetlistFormat::SExpr);
        Ok(index)
    }

    pub fn parse_xml(content: &str) -> Result<Self> {
        // roxmltree rejects a leading byte-order mark
        let doc = Document::parse(content.trim_start_matches('\u{feff}'))?;
        let root = doc.root_element();
        if root.tag_name().name() != "export" {
            return Err(NetlistError::UnknownFormat);
        }

        let mut components = Vec::new();
        let mut nets = Vec::new();
        for section in root.children().filter(|n| n.is_element()) {
            match section.tag_name().name() {
                "components" => {
                    for comp in section.children().filter(|n| n.has_tag_name("comp")) {
                        components.push(xml_component(&comp)?);
                    }
                }
                "nets" => {
                    for net in section.children().filter(|n| n.has_tag_name("net")) {
                        nets.push(xml_net(&net)?);
                    }
                }
                _ => {}
            }
        }

        let mut index = Self::build(components, nets)?;
        index.format = Some(NetlistFormat::Xml);
        Ok(index)
    }

    /// Build and validate the index from already-parsed records.
    pub fn build(components: Vec<NetlistComponent>, nets: Vec<AuthoritativeNet>) -> Result<Self> {
        let mut component_map = BTreeMap::new();
        for comp in components {
            let reference = comp.reference.clone();
            if component_map.insert(reference.clone(), comp).is_some() {
                return Err(NetlistError::Inconsistent(format!(
                    "component {} declared twice",
                    reference
                )));
            }
        }

        let mut by_component: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut by_net: BTreeMap<String, BTreeSet<PinRef>> = BTreeMap::new();
        let mut codes = HashSet::new();

        for net in &nets {
            if !codes.insert(net.code.as_str()) {
                return Err(NetlistError::Inconsistent(format!(
                    "net code {} declared twice",
                    net.code
                )));
            }
            if by_net.contains_key(&net.name) {
                return Err(NetlistError::Inconsistent(format!(
                    "net {} declared twice",
                    net.name
                )));
            }
            let members = by_net.entry(net.name.clone()).or_default();

            for node in &net.nodes {
                if !component_map.is_empty() && !component_map.contains_key(&node.reference) {
                    return Err(NetlistError::Inconsistent(format!(
                        "net {} references undeclared component {}",
                        net.name, node.reference
                    )));
                }
                let pins = by_component.entry(node.reference.clone()).or_default();
                if let Some(previous) = pins.insert(node.pin.clone(), net.name.clone()) {
                    return Err(NetlistError::Inconsistent(format!(
                        "pin {}.{} assigned to both {} and {}",
                        node.reference, node.pin, previous, net.name
                    )));
                }
                members.insert(node.pin_ref());
            }
        }

        let index = Self {
            format: None,
            components: component_map,
            nets,
            by_component,
            by_net,
        };
        index.check_consistency()?;

        tracing::debug!(
            "Indexed authoritative netlist: {} components, {} nets, {} pin assignments",
            index.components.len(),
            index.nets.len(),
            index.assignment_count()
        );

        Ok(index)
    }

    /// Every (reference, pin, net) triple of one view must be derivable from
    /// the other, with equal cardinality.
    fn check_consistency(&self) -> Result<()> {
        let forward: usize = self.by_component.values().map(|pins| pins.len()).sum();
        let backward: usize = self.by_net.values().map(|pins| pins.len()).sum();
        if forward != backward {
            return Err(NetlistError::Inconsistent(format!(
                "component view holds {} pin assignments, net view holds {}",
                forward, backward
            )));
        }

        for (reference, pins) in &self.by_component {
            for (pin, net) in pins {
                let found = self
                    .by_net
                    .get(net)
                    .is_some_and(|members| members.contains(&PinRef::new(reference, pin)));
                if !found {
                    return Err(NetlistError::Inconsistent(format!(
                        "{}.{} -> {} missing from the net view",
                        reference, pin, net
                    )));
                }
            }
        }

        for (net, members) in &self.by_net {
            for pin_ref in members {
                let found = self
                    .by_component
                    .get(&pin_ref.reference)
                    .and_then(|pins| pins.get(&pin_ref.pin))
                    .is_some_and(|n| n == net);
                if !found {
                    return Err(NetlistError::Inconsistent(format!(
                        "{} -> {} missing from the component view",
                        pin_ref, net
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn format(&self) -> Option<NetlistFormat> {
        self.format
    }

    /// Net names a component's pins sit on
    pub fn nets_of(&self, reference: &str) -> BTreeSet<String> {
        self.by_component
            .get(reference)
            .map(|pins| pins.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Ordered pin -> net mapping of a component
    pub fn pins_of(&self, reference: &str) -> Option<&BTreeMap<String, String>> {
        self.by_component.get(reference)
    }

    pub fn components_of(&self, net: &str) -> Option<&BTreeSet<PinRef>> {
        self.by_net.get(net)
    }

    pub fn net_of(&self, pin: &PinRef) -> Option<&str> {
        self.by_component
            .get(&pin.reference)
            .and_then(|pins| pins.get(&pin.pin))
            .map(String::as_str)
    }

    pub fn component(&self, reference: &str) -> Option<&NetlistComponent> {
        self.components.get(reference)
    }

    pub fn components(&self) -> impl Iterator<Item = &NetlistComponent> {
        self.components.values()
    }

    /// Nets in declaration order
    pub fn nets(&self) -> &[AuthoritativeNet] {
        &self.nets
    }

    pub fn net(&self, name: &str) -> Option<&AuthoritativeNet> {
        self.nets.iter().find(|n| n.name == name)
    }

    pub fn net_by_code(&self, code: &str) -> Option<&AuthoritativeNet> {
        self.nets.iter().find(|n| n.code == code)
    }

    pub fn assignment_count(&self) -> usize {
        self.by_component.values().map(|pins| pins.len()).sum()
    }

    /// (reference, pin, net) triples in reference, pin order
    pub fn assignments(&self) -> impl Iterator<Item = (PinRef, &str)> + '_ {
        self.by_component.iter().flat_map(|(reference, pins)| {
            pins.iter()
                .map(move |(pin, net)| (PinRef::new(reference, pin), net.as_str()))
        })
    }
}

/// Format: (comp (ref "R1") (value "10k") (footprint "...") (libsource (lib "Device") (part "R")))
fn sexpr_component(comp: &SExp) -> Result<NetlistComponent> {
    let reference = comp
        .value("ref")
        .ok_or_else(|| NetlistError::MissingField("comp ref".to_string()))?;
    let libsource = comp.child("libsource");
    Ok(NetlistComponent {
        reference: reference.to_string(),
        value: comp.value("value").unwrap_or_default().to_string(),
        footprint: comp
            .value("footprint")
            .filter(|f| !f.is_empty())
            .map(|f| f.to_string()),
        lib: libsource.and_then(|l| l.value("lib")).map(|l| l.to_string()),
        part: libsource.and_then(|l| l.value("part")).map(|p| p.to_string()),
    })
}

/// Format: (net (code "1") (name "GND") (node (ref "R1") (pin "2") (pintype "passive")) ...)
fn sexpr_net(net: &SExp) -> Result<AuthoritativeNet> {
    let code = net
        .value("code")
        .ok_or_else(|| NetlistError::MissingField("net code".to_string()))?
        .to_string();
    let name = net
        .value("name")
        .filter(|n| !n.is_empty())
        .map(|n| n.to_string())
        .unwrap_or_else(|| format!("net_{}", code));

    let mut nodes = Vec::new();
    for node in net.children("node") {
        let (Some(reference), Some(pin)) = (node.value("ref"), node.value("pin")) else {
            return Err(NetlistError::MissingField(format!(
                "ref/pin of a node on net {}",
                name
            )));
        };
        nodes.push(NetNode {
            reference: reference.to_string(),
            pin: pin.to_string(),
            pin_function: node.value("pinfunction").map(|f| f.to_string()),
            pin_type: node.value("pintype").map(|t| t.to_string()),
        });
    }

    Ok(AuthoritativeNet { code, name, nodes })
}

fn xml_component(comp: &roxmltree::Node) -> Result<NetlistComponent> {
    let reference = comp
        .attribute("ref")
        .ok_or_else(|| NetlistError::MissingField("comp ref attribute".to_string()))?;
    let child_text = |tag: &str| {
        comp.children()
            .find(|n| n.has_tag_name(tag))
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
    };
    let libsource = comp.children().find(|n| n.has_tag_name("libsource"));
    Ok(NetlistComponent {
        reference: reference.to_string(),
        value: child_text("value").unwrap_or_default(),
        footprint: child_text("footprint").filter(|f| !f.is_empty()),
        lib: libsource.and_then(|l| l.attribute("lib")).map(|l| l.to_string()),
        part: libsource.and_then(|l| l.attribute("part")).map(|p| p.to_string()),
    })
}

fn xml_net(net: &roxmltree::Node) -> Result<AuthoritativeNet> {
    let code = net
        .attribute("code")
        .ok_or_else(|| NetlistError::MissingField("net code attribute".to_string()))?
        .to_string();
    let name = net
        .attribute("name")
        .filter(|n| !n.is_empty())
        .map(|n| n.to_string())
        .unwrap_or_else(|| format!("net_{}", code));

    let mut nodes = Vec::new();
    for node in net.children().filter(|n| n.has_tag_name("node")) {
        let (Some(reference), Some(pin)) = (node.attribute("ref"), node.attribute("pin")) else {
            return Err(NetlistError::MissingField(format!(
                "ref/pin of a node on net {}",
                name
            )));
        };
        nodes.push(NetNode {
            reference: reference.to_string(),
            pin: pin.to_string(),
            pin_function: node.attribute("pinfunction").map(|f| f.to_string()),
            pin_type: node.attribute("pintype").map(|t| t.to_string()),
        });
    }

    Ok(AuthoritativeNet { code, name, nodes })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEXPR: &str = r#"(export (version "E")
      (design (source "demo.kicad_sch") (tool "Eeschema 8.0.4"))
      (components
        (comp (ref "R1") (value "10k") (footprint "Resistor_SMD:R_0603_1608Metric")
          (libsource (lib "Device") (part "R") (description "Resistor")))
        (comp (ref "C1") (value "100n") (libsource (lib "Device") (part "C"))))
      (nets
        (net (code "1") (name "GND")
          (node (ref "C1") (pin "2") (pintype "passive"))
          (node (ref "R1") (pin "2") (pintype "passive")))
        (net (code "2") (name "/SIG")
          (node (ref "R1") (pin "1") (pinfunction "~") (pintype "passive"))
          (node (ref "C1") (pin "1") (pintype "passive")))))"#;

    fn net(code: &str, name: &str, pins: &[(&str, &str)]) -> AuthoritativeNet {
        AuthoritativeNet {
            code: code.to_string(),
            name: name.to_string(),
            nodes: pins
                .iter()
                .map(|(r, p)| NetNode {
                    reference: r.to_string(),
                    pin: p.to_string(),
                    pin_function: None,
                    pin_type: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_parse_sexpr_export() {
        let index = NetlistIndex::parse(SEXPR).unwrap();
        assert_eq!(index.format(), Some(NetlistFormat::SExpr));
        assert_eq!(index.components().count(), 2);
        assert_eq!(index.nets().len(), 2);
        assert_eq!(
            index.nets_of("R1").into_iter().collect::<Vec<_>>(),
            vec!["/SIG".to_string(), "GND".to_string()]
        );
        assert_eq!(index.net_of(&PinRef::new("C1", "2")), Some("GND"));
        assert_eq!(index.components_of("GND").unwrap().len(), 2);
        assert_eq!(index.assignment_count(), 4);
        let r1 = index.component("R1").unwrap();
        assert_eq!(r1.part.as_deref(), Some("R"));
        assert_eq!(r1.footprint.as_deref(), Some("Resistor_SMD:R_0603_1608Metric"));
        assert_eq!(
            index.net("/SIG").unwrap().nodes[0].pin_function.as_deref(),
            Some("~")
        );
    }

    #[test]
    fn test_parse_xml_export() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<export version="E">
  <components>
    <comp ref="R1"><value>10k</value><libsource lib="Device" part="R"/></comp>
    <comp ref="C1"><value>100n</value></comp>
  </components>
  <nets>
    <net code="1" name="GND"><node ref="R1" pin="2" pintype="passive"/><node ref="C1" pin="2"/></net>
    <net code="2"><node ref="R1" pin="1"/></net>
  </nets>
</export>"#;
        let index = NetlistIndex::parse(xml).unwrap();
        assert_eq!(index.format(), Some(NetlistFormat::Xml));
        assert_eq!(index.component("R1").unwrap().value, "10k");
        assert_eq!(index.net_of(&PinRef::new("R1", "1")), Some("net_2"));
        assert_eq!(index.net_by_code("1").unwrap().name, "GND");
    }

    #[test]
    fn test_unquoted_codes_and_names() {
        let legacy = "(export (version D) (components (comp (ref U1))) \
                      (nets (net (code 7) (name VCC) (node (ref U1) (pin 14)))))";
        let index = NetlistIndex::parse(legacy).unwrap();
        assert_eq!(index.net_of(&PinRef::new("U1", "14")), Some("VCC"));
        assert_eq!(index.net_by_code("7").unwrap().name, "VCC");
    }

    #[test]
    fn test_pin_on_two_nets_is_rejected() {
        let err = NetlistIndex::build(
            Vec::new(),
            vec![
                net("1", "A", &[("R1", "1")]),
                net("2", "B", &[("R1", "1"), ("R2", "1")]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, NetlistError::Inconsistent(ref m) if m.contains("R1.1")));
    }

    #[test]
    fn test_duplicate_net_name_and_code_rejected() {
        assert!(matches!(
            NetlistIndex::build(
                Vec::new(),
                vec![net("1", "A", &[("R1", "1")]), net("2", "A", &[("R2", "1")])]
            ),
            Err(NetlistError::Inconsistent(_))
        ));
        assert!(matches!(
            NetlistIndex::build(
                Vec::new(),
                vec![net("1", "A", &[("R1", "1")]), net("1", "B", &[("R2", "1")])]
            ),
            Err(NetlistError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_undeclared_component_rejected() {
        let components = vec![NetlistComponent {
            reference: "R1".to_string(),
            value: String::new(),
            footprint: None,
            lib: None,
            part: None,
        }];
        let err = NetlistIndex::build(components, vec![net("1", "A", &[("R9", "1")])]).unwrap_err();
        assert!(matches!(err, NetlistError::Inconsistent(ref m) if m.contains("R9")));
    }

    #[test]
    fn test_views_agree() {
        let index = NetlistIndex::parse(SEXPR).unwrap();
        let forward: BTreeSet<(PinRef, String)> = index
            .assignments()
            .map(|(pin, net)| (pin, net.to_string()))
            .collect();
        let backward: BTreeSet<(PinRef, String)> = index
            .nets()
            .iter()
            .flat_map(|n| n.pins().map(move |p| (p, n.name.clone())))
            .collect();
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), index.assignment_count());
    }

    #[test]
    fn test_unconnected_placeholder() {
        assert!(net("9", "unconnected-(U1-NC-Pad4)", &[("U1", "4")]).is_unconnected_placeholder());
        assert!(!net("9", "NC", &[("U1", "4")]).is_unconnected_placeholder());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            NetlistIndex::parse("hello"),
            Err(NetlistError::UnknownFormat)
        ));
        assert!(matches!(
            NetlistIndex::parse("(export (nets (net (code 1)"),
            Err(NetlistError::Parse(_))
        ));
        assert!(matches!(
            NetlistIndex::parse("<export><nets></export>"),
            Err(NetlistError::Xml(_))
        ));
    }
}
