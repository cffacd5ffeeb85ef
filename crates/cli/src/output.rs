//! Report rendering for the map command

use anyhow::Result;
use serde_json::json;

use remora_graph::{GraphNode, NetworkGraph};
use remora_orchestrator::RunReport;

/// Print a run report in the requested format.
pub fn print_report(report: &RunReport, format: &str) -> Result<()> {
    match format.trim().to_lowercase().as_str() {
        "json" | "j" => print_json(report)?,
        "text" | "t" | "" => print_text(report),
        other => {
            eprintln!("Warning: Unknown format '{}', using text", other);
            print_text(report);
        }
    }
    Ok(())
}

fn print_text(report: &RunReport) {
    println!("\nLogical graph ({} node(s))", report.logical.len());
    println!("{:-<78}", "");
    println!("{:<40} {:<8} {:<8} {}", "ADDRESS", "SESSIONS", "EVIDENCE", "LABELS");
    for node in report.logical.iter() {
        let labels: Vec<&str> = node.labels.iter().map(String::as_str).collect();
        println!(
            "{:<40} {:<8} {:<8} {}",
            node.key.to_string(),
            node.sessions,
            node.evidence,
            labels.join(", ")
        );
    }
    print_edges(&report.logical, |g, i| g.node_at(i).key.to_string());

    println!("\nPhysical graph ({} node(s))", report.physical.len());
    println!("{:-<78}", "");
    println!("{:<24} {:<8} {}", "IDENTITY", "SESSIONS", "ADDRESSES");
    for node in report.physical.iter() {
        let addrs: Vec<String> = node.addresses.iter().map(ToString::to_string).collect();
        println!(
            "{:<24} {:<8} {}",
            node.key.to_string(),
            node.sessions,
            addrs.join(", ")
        );
    }
    print_edges(&report.physical, |g, i| g.node_at(i).key.to_string());

    let s = &report.stats;
    println!("\nSummary:");
    println!("  Packets decoded: {}", s.packets);
    println!("  Malformed frames: {}", s.malformed_packets);
    println!("  Sessions: {} ({} matched)", s.sessions, s.matched_sessions);
    println!("  Match results: {}", s.match_results);
    println!("  Unattributed sessions: {}", s.unattributed_sessions);
    println!();
}

fn print_edges<N: GraphNode>(
    graph: &NetworkGraph<N>,
    key_of: impl Fn(&NetworkGraph<N>, usize) -> String,
) {
    for edge in graph.edges() {
        let labels: Vec<&str> = edge.labels.iter().map(String::as_str).collect();
        println!(
            "  {} <-> {} [{}]",
            key_of(graph, edge.a),
            key_of(graph, edge.b),
            labels.join(", ")
        );
    }
}

fn print_json(report: &RunReport) -> Result<()> {
    let logical_edges: Vec<_> = report
        .logical
        .edges()
        .map(|e| {
            json!({
                "a": report.logical.node_at(e.a).key,
                "b": report.logical.node_at(e.b).key,
                "labels": e.labels,
            })
        })
        .collect();
    let physical_edges: Vec<_> = report
        .physical
        .edges()
        .map(|e| {
            json!({
                "a": report.physical.node_at(e.a).key,
                "b": report.physical.node_at(e.b).key,
                "labels": e.labels,
            })
        })
        .collect();

    let output = json!({
        "logical": {
            "nodes": report.logical.iter().collect::<Vec<_>>(),
            "edges": logical_edges,
        },
        "physical": {
            "nodes": report.physical.iter().collect::<Vec<_>>(),
            "edges": physical_edges,
        },
        "stats": {
            "packets": report.stats.packets,
            "malformed_packets": report.stats.malformed_packets,
            "sessions": report.stats.sessions,
            "matched_sessions": report.stats.matched_sessions,
            "match_results": report.stats.match_results,
            "unattributed_sessions": report.stats.unattributed_sessions,
        },
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
