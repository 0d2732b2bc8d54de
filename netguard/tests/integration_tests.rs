//! Integration tests for NetGuard: both sources, queries and the diff

use netguard::prelude::*;
use netguard::query::{diff, FindingKind, NetView, Side};
use netguard::{NetlistIndex, UnconnectedReason};
use std::collections::BTreeSet;
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn analyze_fixture(netlist: &str) -> Analysis {
    NetGuardCore::analyze_files(
        &fixture_path("divider.kicad_sch"),
        Some(&fixture_path(netlist)),
        &AnalysisOptions::default(),
    )
    .expect("Fixture should analyze")
}

#[test]
fn test_authoritative_only_pin_is_a_warning() {
    let analysis = analyze_fixture("divider.net");
    let report = analysis.diff().expect("netlist supplied");

    assert_eq!(report.left, Source::Geometric);
    assert_eq!(report.right, Source::Authoritative);
    assert_eq!(report.findings.len(), 1, "{:#?}", report.findings);

    let finding = &report.findings[0];
    assert_eq!(finding.severity, Severity::Warning);
    assert_eq!(
        finding.kind,
        FindingKind::UnconnectedPin {
            side: Side::Right,
            pin: PinRef::new("R3", "1"),
            net: "+3V3".to_string(),
        }
    );
    assert!(finding.message().contains("R3.1"));
}

#[test]
fn test_xml_netlist_gives_the_same_diff() {
    let sexpr = analyze_fixture("divider.net").diff().expect("diff");
    let xml = analyze_fixture("divider.xml").diff().expect("diff");
    assert_eq!(sexpr, xml);
}

#[test]
fn test_queries_on_both_sources() {
    let analysis = analyze_fixture("divider.net");

    assert_eq!(
        analysis.nets_of("R3", Source::Authoritative).expect("authoritative"),
        BTreeSet::from(["+3V3".to_string(), "VOUT".to_string()])
    );
    assert_eq!(
        analysis.nets_of("R3", Source::Geometric).expect("geometric"),
        BTreeSet::from(["VOUT".to_string()])
    );
    assert_eq!(
        analysis.components_of("GND", Source::Authoritative).expect("authoritative"),
        BTreeSet::from([PinRef::new("C1", "2"), PinRef::new("R2", "2")])
    );
    assert_eq!(
        analysis.components_of("GND", Source::Geometric).expect("geometric"),
        analysis.components_of("GND", Source::Authoritative).expect("authoritative"),
    );
    assert!(analysis.nets_of("U99", Source::Geometric).expect("geometric").is_empty());
}

#[test]
fn test_diff_is_symmetric() {
    let analysis = analyze_fixture("divider.net");
    let forward = analysis
        .diff_sources(Source::Geometric, Source::Authoritative)
        .expect("diff");
    let backward = analysis
        .diff_sources(Source::Authoritative, Source::Geometric)
        .expect("diff");

    assert_eq!(forward.mismatched_pins(), backward.mismatched_pins());
    assert_eq!(forward.findings.len(), backward.findings.len());
    match &backward.findings[0].kind {
        FindingKind::UnconnectedPin { side, .. } => assert_eq!(*side, Side::Left),
        other => panic!("unexpected finding {:?}", other),
    }
}

#[test]
fn test_diff_missing_pieces() {
    // Netlist knows a sheet the schematic has not wired yet, and lacks J1
    let design = r#"(kicad_sch (version 20231120)
      (lib_symbols
        (symbol "Device:R"
          (symbol "R_1_1"
            (pin passive line (at 0 3.81 270) (length 1.27) (name "~") (number "1"))
            (pin passive line (at 0 -3.81 90) (length 1.27) (name "~") (number "2")))))
      (wire (pts (xy 10 6.19) (xy 10 0)))
      (global_label "PWR" (at 10 0 0))
      (symbol (lib_id "Device:R") (at 10 10 0) (unit 1)
        (property "Reference" "R1" (at 0 0 0)) (property "Value" "1k" (at 0 0 0)))
      (symbol (lib_id "Device:R") (at 40 10 0) (unit 1)
        (property "Reference" "J1" (at 0 0 0)) (property "Value" "1k" (at 0 0 0)))
    )"#;
    let netlist = r#"(export (version "E")
      (components
        (comp (ref "R1") (value "1k"))
        (comp (ref "U2") (value "MCU")))
      (nets
        (net (code "1") (name "PWR") (node (ref "R1") (pin "1")))
        (net (code "2") (name "/io/SDA") (node (ref "U2") (pin "7")) (node (ref "U2") (pin "8")))))"#;

    let analysis =
        NetGuardCore::analyze(design, Some(netlist), &AnalysisOptions::default()).expect("analyze");
    let report = analysis.diff().expect("diff");

    let kinds: Vec<&FindingKind> = report.findings.iter().map(|f| &f.kind).collect();
    assert!(kinds.contains(&&FindingKind::ComponentMissing {
        side: Side::Left,
        reference: "U2".to_string(),
    }));
    assert!(kinds.contains(&&FindingKind::ComponentMissing {
        side: Side::Right,
        reference: "J1".to_string(),
    }));
    assert!(kinds.contains(&&FindingKind::NetMissing {
        side: Side::Left,
        net: "SDA".to_string(),
    }));

    for finding in &report.findings {
        let expected = match &finding.kind {
            FindingKind::ComponentMissing { side: Side::Left, .. }
            | FindingKind::NetMissing { side: Side::Left, .. } => Severity::Info,
            FindingKind::ComponentMissing { side: Side::Right, .. } => Severity::Warning,
            _ => continue,
        };
        assert_eq!(finding.severity, expected, "{}", finding.message());
    }
    // R1.1 agrees on PWR
    assert!(!report.mismatched_pins().contains(&PinRef::new("R1", "1")));
}

#[test]
fn test_short_between_sheet_local_nets_is_reported() {
    // One wire joins pins the netlist keeps on two distinct sheet-local nets
    let design = r#"(kicad_sch (version 20231120)
      (lib_symbols
        (symbol "Device:R"
          (symbol "R_1_1"
            (pin passive line (at 0 3.81 270) (length 1.27) (name "~") (number "1"))
            (pin passive line (at 0 -3.81 90) (length 1.27) (name "~") (number "2")))))
      (wire (pts (xy 10 6.19) (xy 40 6.19)))
      (label "SIG" (at 20 6.19 0))
      (symbol (lib_id "Device:R") (at 10 10 0) (unit 1)
        (property "Reference" "R1" (at 0 0 0)) (property "Value" "1k" (at 0 0 0)))
      (symbol (lib_id "Device:R") (at 40 10 0) (unit 1)
        (property "Reference" "R2" (at 0 0 0)) (property "Value" "1k" (at 0 0 0)))
    )"#;
    let netlist = r#"(export (version "E")
      (components
        (comp (ref "R1") (value "1k"))
        (comp (ref "R2") (value "1k")))
      (nets
        (net (code "1") (name "/a/SIG") (node (ref "R1") (pin "1")))
        (net (code "2") (name "/b/SIG") (node (ref "R2") (pin "1")))))"#;

    let analysis =
        NetGuardCore::analyze(design, Some(netlist), &AnalysisOptions::default()).expect("analyze");
    assert_eq!(
        analysis.components_of("SIG", Source::Geometric).expect("geometric").len(),
        2
    );

    let report = analysis.diff().expect("diff");
    assert_eq!(report.findings.len(), 2, "{:#?}", report.findings);
    assert_eq!(report.count(Severity::Warning), 2);
    let right_nets: BTreeSet<&str> = report
        .findings
        .iter()
        .map(|f| match &f.kind {
            FindingKind::NetMembershipMismatch { right, .. } => right.as_str(),
            other => panic!("unexpected finding {:?}", other),
        })
        .collect();
    assert_eq!(right_nets, BTreeSet::from(["/a/SIG", "/b/SIG"]));
}

#[test]
fn test_unplaced_and_no_connect_pins_on_a_net_are_warnings() {
    let design = r#"(kicad_sch (version 20231120)
      (lib_symbols
        (symbol "Device:R"
          (symbol "R_1_1"
            (pin passive line (at 0 3.81 270) (length 1.27) (name "~") (number "1"))
            (pin passive line (at 0 -3.81 90) (length 1.27) (name "~") (number "2")))))
      (symbol (lib_id "Vendor:Odd") (at 10 10 0) (unit 1)
        (property "Reference" "U1" (at 0 0 0)) (property "Value" "ODD" (at 0 0 0))
        (pin "1" (uuid "cccccccc-0000-4000-8000-000000000001")))
      (symbol (lib_id "Device:R") (at 40 10 0) (unit 1)
        (property "Reference" "R2" (at 0 0 0)) (property "Value" "1k" (at 0 0 0)))
      (no_connect (at 40 6.19))
    )"#;
    let netlist = r#"(export (version "E")
      (components
        (comp (ref "U1") (value "ODD"))
        (comp (ref "R2") (value "1k")))
      (nets
        (net (code "1") (name "PWR") (node (ref "U1") (pin "1")) (node (ref "R2") (pin "1")))))"#;

    let pin_findings = |options: &AnalysisOptions| -> Vec<(PinRef, Severity)> {
        NetGuardCore::analyze(design, Some(netlist), options)
            .expect("analyze")
            .diff()
            .expect("diff")
            .findings
            .into_iter()
            .filter_map(|f| match f.kind {
                FindingKind::PinOnlyIn { side: Side::Right, pin, net } if net == "PWR" => {
                    Some((pin, f.severity))
                }
                _ => None,
            })
            .collect()
    };

    assert_eq!(
        pin_findings(&AnalysisOptions::default()),
        vec![
            (PinRef::new("R2", "1"), Severity::Warning),
            (PinRef::new("U1", "1"), Severity::Warning),
        ]
    );

    let mut lenient = AnalysisOptions::default();
    lenient.diff.downgrade_unplaced_pins = true;
    let downgraded = pin_findings(&lenient);
    assert_eq!(downgraded.len(), 2);
    assert!(downgraded.iter().all(|(_, severity)| *severity == Severity::Info));
}

#[test]
fn test_net_name_mismatch() {
    let left = NetlistIndex::parse(
        r#"(export (version "E") (nets (net (code "1") (name "VBUS") (node (ref "R1") (pin "1")) (node (ref "C1") (pin "1")))))"#,
    )
    .expect("left");
    let right = NetlistIndex::parse(
        r#"<export version="E"><nets><net code="9" name="VIN"><node ref="C1" pin="1"/><node ref="R1" pin="1"/></net></nets></export>"#,
    )
    .expect("right");

    let report = diff(
        &NetView::from_netlist(&left),
        &NetView::from_netlist(&right),
        &DiffOptions::default(),
    );
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].severity, Severity::Warning);
    assert!(matches!(
        &report.findings[0].kind,
        FindingKind::NetNameMismatch { left, right, pins }
            if left == "VBUS" && right == "VIN" && pins.len() == 2
    ));
}

#[test]
fn test_trace_connection() {
    let analysis = analyze_fixture("divider.net");

    let trace = analysis
        .trace_connection("R1", "2", Source::Geometric)
        .expect("geometric")
        .expect("R1.2 is connected");
    assert_eq!(trace.net, "VOUT");
    assert_eq!(
        trace.connected,
        vec![PinRef::new("C1", "1"), PinRef::new("R2", "1"), PinRef::new("R3", "2")]
    );

    assert!(analysis
        .trace_connection("R3", "1", Source::Geometric)
        .expect("geometric")
        .is_none());
    let authoritative = analysis
        .trace_connection("R3", "1", Source::Authoritative)
        .expect("authoritative")
        .expect("netlist has R3.1");
    assert_eq!(authoritative.connected, vec![PinRef::new("R1", "1")]);
}

#[test]
fn test_trace_component() {
    let analysis = analyze_fixture("divider.net");

    let pins = analysis.trace_component("R3");
    assert_eq!(pins.len(), 2);

    let pin1 = pins.iter().find(|p| p.pin.pin == "1").expect("pin 1");
    assert_eq!(pin1.net, None);
    assert_eq!(pin1.unconnected, Some(UnconnectedReason::NoCoincidentNode));
    assert!(pin1.wire_points.is_empty());

    let pin2 = pins.iter().find(|p| p.pin.pin == "2").expect("pin 2");
    assert_eq!(pin2.net.as_deref(), Some("VOUT"));
    assert_eq!(pin2.wire_points.len(), 2);
    assert_eq!(pin2.labels.len(), 1);
    assert_eq!(pin2.labels[0].text, "VOUT");

    assert!(analysis.trace_component("U99").is_empty());
}

#[test]
fn test_search_components() {
    let analysis = analyze_fixture("divider.net");

    let mut resistors: Vec<&str> = analysis
        .search_components("^r\\d+$")
        .expect("valid pattern")
        .iter()
        .map(|s| s.reference.as_str())
        .collect();
    resistors.sort_unstable();
    assert_eq!(resistors, vec!["R1", "R2", "R3"]);

    let by_value = analysis.search_components("100NF").expect("valid pattern");
    assert_eq!(by_value.len(), 1);
    assert_eq!(by_value[0].reference, "C1");
    assert!(matches!(
        analysis.search_components("[R"),
        Err(NetGuardError::Pattern(_))
    ));
}

#[test]
fn test_find_path() {
    let analysis = analyze_fixture("divider.net");

    let path = analysis
        .find_path("R1", "C1", Source::Geometric)
        .expect("geometric")
        .expect("R1 and C1 share VOUT");
    assert_eq!(path, vec!["R1", "[VOUT]", "C1"]);

    let authoritative = analysis
        .find_path("R3", "R1", Source::Authoritative)
        .expect("authoritative")
        .expect("connected");
    assert_eq!(authoritative.len(), 3);
}

#[test]
fn test_stats() {
    let analysis = analyze_fixture("divider.net");
    let stats = analysis.stats();

    assert_eq!(stats.symbols, 4);
    assert_eq!(stats.wire_segments, 7);
    assert_eq!(stats.junctions, 1);
    assert_eq!(stats.geometric_nets, 3);
    assert_eq!(stats.authoritative_nets, Some(3));
    assert_eq!(stats.unconnected_pins, 1);
    assert_eq!(stats.errors, 0);
}

#[test]
fn test_report_serializes_to_json() {
    let report = analyze_fixture("divider.net").diff().expect("diff");
    let json = serde_json::to_value(&report).expect("serialize");

    assert_eq!(json["left"], "geometric");
    assert_eq!(json["right"], "authoritative");
    let finding = &json["findings"][0];
    assert_eq!(finding["kind"], "unconnected_pin");
    assert_eq!(finding["severity"], "Warning");
    assert_eq!(finding["side"], "right");
    assert_eq!(finding["pin"]["reference"], "R3");
    assert_eq!(finding["net"], "+3V3");
}

#[test]
fn test_options_loaded_from_json() {
    let options = AnalysisOptions::from_json(
        r#"{ "epsilon": 0.02, "diff": { "strip_sheet_prefix": false } }"#,
    )
    .expect("options");
    assert!(!options.diff.strip_sheet_prefix);
    assert!(options.diff.ignore_unconnected_placeholders);

    let design = std::fs::read_to_string(fixture_path("divider.kicad_sch")).expect("fixture");
    let netlist = std::fs::read_to_string(fixture_path("divider.net")).expect("fixture");
    let analysis = NetGuardCore::analyze(&design, Some(&netlist), &options).expect("analyze");
    assert_eq!(analysis.options().epsilon, 0.02);
    assert_eq!(analysis.diff().expect("diff").findings.len(), 1);
}

#[test]
fn test_analysis_is_shareable_across_threads() {
    let analysis = std::sync::Arc::new(analyze_fixture("divider.net"));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let analysis = std::sync::Arc::clone(&analysis);
            std::thread::spawn(move || {
                analysis
                    .nets_of("R1", Source::Geometric)
                    .map(|nets| nets.len())
                    .unwrap_or(0)
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().expect("thread"), 2);
    }
}
