//! Trace example: print a design's nets and, given a netlist export, the
//! differences between the two.

use netguard::prelude::*;
use std::path::Path;

fn main() -> Result<(), NetGuardError> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(design) = args.next() else {
        eprintln!("Usage: cargo run --example trace_nets <file.kicad_sch> [file.net|file.xml]");
        std::process::exit(1);
    };
    let netlist = args.next();

    let analysis = NetGuardCore::analyze_files(
        Path::new(&design),
        netlist.as_deref().map(Path::new),
        &AnalysisOptions::default(),
    )?;

    let view = analysis.view(Source::Geometric)?;
    println!("Nets in {} ({}):", design, view.source());
    for net in view.nets() {
        let pins: Vec<String> = net.pins.iter().map(|p| p.to_string()).collect();
        let marker = if net.synthesized { " (unnamed)" } else { "" };
        println!("  {}{}: {}", net.name, marker, pins.join(" "));
    }

    if !view.unconnected().is_empty() {
        println!();
        println!("Unconnected pins:");
        for (pin, reason) in view.unconnected() {
            println!("  {} ({:?})", pin, reason);
        }
    }

    if !analysis.issues().is_empty() {
        println!();
        println!("Issues:");
        for issue in analysis.issues() {
            println!("  [{:?}] {}", issue.severity, issue.message);
        }
    }

    if analysis.has_source(Source::Authoritative) {
        let report = analysis.diff()?;
        println!();
        if report.is_clean() {
            println!("Schematic geometry matches the netlist.");
        } else {
            println!(
                "{} differences ({} warnings):",
                report.findings.len(),
                report.count(Severity::Warning)
            );
            for finding in &report.findings {
                println!("  [{:?}] {}", finding.severity, finding.message());
            }
        }
    }

    Ok(())
}
