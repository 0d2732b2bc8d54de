//! Source-agnostic net snapshot
//!
//! Both sources of truth are flattened into the same shape, a map of
//! net name to pins plus the reverse pin to net map, so every query and the
//! diff work the same way regardless of where the data came from.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::connectivity::{Resolution, UnconnectedReason};
use crate::parser::netlist::NetlistIndex;
use crate::parser::schema::{PinRef, Schematic};
use crate::query::diff::DiffOptions;

/// Which representation a view or query reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Nets reconstructed from sheet geometry
    Geometric,
    /// Nets read from the exported netlist
    Authoritative,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Geometric => "geometric",
            Source::Authoritative => "authoritative",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewNet {
    pub name: String,
    pub pins: BTreeSet<PinRef>,
    /// Name was generated rather than written by a designer
    pub synthesized: bool,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetView {
    source: Source,
    nets: BTreeMap<String, ViewNet>,
    pin_net: BTreeMap<PinRef, String>,
    components: BTreeSet<String>,
    unconnected: BTreeMap<PinRef, UnconnectedReason>,
}

impl NetView {
    fn empty(source: Source) -> Self {
        Self {
            source,
            nets: BTreeMap::new(),
            pin_net: BTreeMap::new(),
            components: BTreeSet::new(),
            unconnected: BTreeMap::new(),
        }
    }

    /// Resolved geometric nets. Separate wire groups carrying the same name
    /// are one net here, as labels with equal text join by name.
    pub fn from_resolution(schematic: &Schematic, resolution: &Resolution) -> Self {
        let mut view = Self::empty(Source::Geometric);
        view.components = schematic
            .symbols
            .iter()
            .map(|s| s.reference.clone())
            .collect();

        for net in resolution.nets() {
            view.merge(&net.name, &net.pins, net.synthesized, &net.aliases);
        }
        for unconnected in resolution.unconnected() {
            view.unconnected
                .insert(unconnected.pin.clone(), unconnected.reason);
        }
        view
    }

    pub fn from_netlist(index: &NetlistIndex) -> Self {
        let mut view = Self::empty(Source::Authoritative);
        view.components = index.components().map(|c| c.reference.clone()).collect();

        for net in index.nets() {
            let pins: BTreeSet<PinRef> = net.pins().collect();
            view.components
                .extend(pins.iter().map(|p| p.reference.clone()));
            let synthesized = is_generated_name(&net.name) || net.name == format!("net_{}", net.code);
            view.merge(&net.name, &pins, synthesized, &[]);
        }
        view
    }

    fn merge(&mut self, name: &str, pins: &BTreeSet<PinRef>, synthesized: bool, aliases: &[String]) {
        let entry = self.nets.entry(name.to_string()).or_insert_with(|| ViewNet {
            name: name.to_string(),
            pins: BTreeSet::new(),
            synthesized,
            aliases: Vec::new(),
        });
        entry.synthesized &= synthesized;
        entry.pins.extend(pins.iter().cloned());
        for alias in aliases {
            if !entry.aliases.contains(alias) {
                entry.aliases.push(alias.clone());
            }
        }
        entry.aliases.sort();
        for pin in pins {
            self.pin_net.insert(pin.clone(), name.to_string());
        }
    }

    /// Copy prepared for comparison: authoritative sheet prefixes and
    /// single-pin placeholder nets are handled per `options`.
    ///
    /// A prefix is only stripped when the bare name stays unique. Nets such
    /// as `/a/SIG` and `/b/SIG` are distinct and keep their full names.
    pub fn normalized(&self, options: &DiffOptions) -> NetView {
        if self.source != Source::Authoritative {
            return self.clone();
        }
        let kept: Vec<&ViewNet> = self
            .nets
            .values()
            .filter(|net| {
                !(options.ignore_unconnected_placeholders && is_placeholder(&net.name, net.pins.len()))
            })
            .collect();
        let mut bare_names: BTreeMap<&str, usize> = BTreeMap::new();
        if options.strip_sheet_prefix {
            for net in kept.iter().copied() {
                *bare_names.entry(strip_sheet_prefix(&net.name)).or_default() += 1;
            }
        }

        let mut view = Self::empty(self.source);
        view.components = self.components.clone();
        view.unconnected = self.unconnected.clone();
        for net in kept {
            let bare = strip_sheet_prefix(&net.name);
            let name = if bare_names.get(bare) == Some(&1) {
                bare
            } else {
                net.name.as_str()
            };
            view.merge(name, &net.pins, net.synthesized, &net.aliases);
        }
        view
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn nets(&self) -> impl Iterator<Item = &ViewNet> {
        self.nets.values()
    }

    pub fn net(&self, name: &str) -> Option<&ViewNet> {
        self.nets.get(name)
    }

    pub fn net_count(&self) -> usize {
        self.nets.len()
    }

    pub fn net_of(&self, pin: &PinRef) -> Option<&str> {
        self.pin_net.get(pin).map(String::as_str)
    }

    /// Ordered set of net names a component's pins sit on
    pub fn nets_of(&self, reference: &str) -> BTreeSet<String> {
        self.pin_net
            .range(PinRef::new(reference, "")..)
            .take_while(|(pin, _)| pin.reference == reference)
            .map(|(_, net)| net.clone())
            .collect()
    }

    /// Ordered pin -> net mapping of one component
    pub fn pins_of(&self, reference: &str) -> BTreeMap<String, String> {
        self.pin_net
            .range(PinRef::new(reference, "")..)
            .take_while(|(pin, _)| pin.reference == reference)
            .map(|(pin, net)| (pin.pin.clone(), net.clone()))
            .collect()
    }

    /// Ordered set of (reference, pin) on a net
    pub fn components_of(&self, net: &str) -> BTreeSet<PinRef> {
        self.nets
            .get(net)
            .map(|n| n.pins.clone())
            .unwrap_or_default()
    }

    /// Every pin that sits on some net
    pub fn connected_pins(&self) -> impl Iterator<Item = (&PinRef, &str)> {
        self.pin_net.iter().map(|(p, n)| (p, n.as_str()))
    }

    pub fn components(&self) -> &BTreeSet<String> {
        &self.components
    }

    pub fn has_component(&self, reference: &str) -> bool {
        self.components.contains(reference)
    }

    /// Pins known to be on no net, with the reason (geometric views only)
    pub fn unconnected(&self) -> &BTreeMap<PinRef, UnconnectedReason> {
        &self.unconnected
    }

    pub fn unconnected_reason(&self, pin: &PinRef) -> Option<UnconnectedReason> {
        self.unconnected.get(pin).copied()
    }
}

fn is_generated_name(name: &str) -> bool {
    name.starts_with("Net-(") || name.starts_with("unconnected-(")
}

fn is_placeholder(name: &str, pin_count: usize) -> bool {
    name.starts_with("unconnected-(") && pin_count <= 1
}

/// `/power/VBUS` -> `VBUS`; global names have no leading slash
pub fn strip_sheet_prefix(name: &str) -> &str {
    if name.starts_with('/') {
        name.rsplit('/').next().unwrap_or(name)
    } else {
        name
    }
}
