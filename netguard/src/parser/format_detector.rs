//! Input format detection
//!
//! Design buffers are identified by their file-format version stamp, netlist
//! buffers by their outer syntax (s-expression or XML export).

use serde::{Deserialize, Serialize};

/// KiCad file format generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KicadVersion {
    /// KiCad 4/5 text format, not a nested-expression file
    Legacy,
    /// KiCad 6.0 - Modern S-expression format
    Modern6,
    /// KiCad 7.0 - Modern S-expression format
    Modern7,
    /// KiCad 8.0 - Modern S-expression format
    Modern8,
    /// KiCad 9.0 - Modern S-expression format
    Modern9,
}

impl KicadVersion {
    /// Get version string for display
    pub fn as_str(&self) -> &'static str {
        match self {
            KicadVersion::Legacy => "KiCad 4/5",
            KicadVersion::Modern6 => "KiCad 6",
            KicadVersion::Modern7 => "KiCad 7",
            KicadVersion::Modern8 => "KiCad 8",
            KicadVersion::Modern9 => "KiCad 9",
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, KicadVersion::Legacy)
    }

    /// Map a `(version YYYYMMDD)` stamp to a generation.
    ///
    /// - 20211014: KiCad 6.0
    /// - 20221118: KiCad 7.0
    /// - 20231120: KiCad 8.0
    /// - 20241017: KiCad 9.0
    pub fn from_file_version(stamp: u32) -> Option<Self> {
        if stamp >= 20241017 {
            Some(KicadVersion::Modern9)
        } else if stamp >= 20231120 {
            Some(KicadVersion::Modern8)
        } else if stamp >= 20221118 {
            Some(KicadVersion::Modern7)
        } else if stamp >= 20211014 {
            Some(KicadVersion::Modern6)
        } else {
            None
        }
    }
}

/// Detect the generation of a design buffer from its leading bytes.
pub fn detect_format(content: &str) -> Option<KicadVersion> {
    let trimmed = content.trim_start();

    if trimmed.starts_with("EESchema Schematic File Version") {
        return Some(KicadVersion::Legacy);
    }

    if trimmed.starts_with("(kicad_sch") {
        return Some(detect_modern_version(trimmed).unwrap_or(KicadVersion::Modern6));
    }

    None
}

fn detect_modern_version(content: &str) -> Option<KicadVersion> {
    let start = content.find("(version ")? + "(version ".len();
    let digits: String = content[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    KicadVersion::from_file_version(digits.parse().ok()?)
}

/// Syntax of an authoritative netlist export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetlistFormat {
    /// `(export (version "E") ...)`
    SExpr,
    /// `<export version="E"> ...`
    Xml,
}

pub fn detect_netlist_format(content: &str) -> Option<NetlistFormat> {
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("(export") {
        Some(NetlistFormat::SExpr)
    } else if trimmed.starts_with("<?xml") || trimmed.starts_with("<export") {
        Some(NetlistFormat::Xml)
    } else {
        None
    }
}
