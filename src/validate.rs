//! Structural checks on a rendered flow (G001–G004).
//!
//! Runs after rendering, on the interchange shape itself, so it catches
//! whatever the builder produced rather than what it intended. Dangling
//! references are fatal; reachability and shape oddities only warn, since
//! authors legitimately park unfinished branches.

use std::collections::HashMap;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;

use crate::error::CompilerError;
use crate::flow::types::{Flow, RouterDef};

/// Run all structural rules. Fatal findings come back as errors; the rest
/// is logged.
pub fn check_flow(flow: &Flow) -> Result<(), Vec<CompilerError>> {
    let (graph, index) = build_graph(flow);

    let mut errors = Vec::new();
    g001_exits_reference_existing_nodes(flow, &index, &mut errors);
    g002_router_categories_consistent(flow, &mut errors);
    if !errors.is_empty() {
        return Err(errors);
    }

    g003_all_reachable_from_entry(flow, &graph, &index);
    g004_report_cycles(flow, &graph);
    Ok(())
}

fn build_graph(flow: &Flow) -> (DiGraph<(), ()>, HashMap<&str, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut index = HashMap::new();
    for node in &flow.nodes {
        index.insert(node.uuid.as_str(), graph.add_node(()));
    }
    for node in &flow.nodes {
        for exit in &node.exits {
            if let Some(dest) = &exit.destination_uuid
                && let (Some(&from), Some(&to)) =
                    (index.get(node.uuid.as_str()), index.get(dest.as_str()))
            {
                graph.add_edge(from, to, ());
            }
        }
    }
    (graph, index)
}

fn g001_exits_reference_existing_nodes(
    flow: &Flow,
    index: &HashMap<&str, NodeIndex>,
    errors: &mut Vec<CompilerError>,
) {
    for node in &flow.nodes {
        for exit in &node.exits {
            if let Some(dest) = &exit.destination_uuid
                && !index.contains_key(dest.as_str())
            {
                errors.push(CompilerError::render(
                    "G001",
                    format!(
                        "exit '{}' of node '{}' points at unknown node '{}'",
                        exit.uuid, node.uuid, dest
                    ),
                ));
            }
        }
    }
}

fn g002_router_categories_consistent(flow: &Flow, errors: &mut Vec<CompilerError>) {
    for node in &flow.nodes {
        let Some(router) = &node.router else { continue };
        let (categories, cases, default) = match router {
            RouterDef::Switch(r) => (&r.categories, Some(&r.cases), Some(&r.default_category_uuid)),
            RouterDef::Random(r) => (&r.categories, None, None),
        };
        for category in categories {
            if !node.exits.iter().any(|e| e.uuid == category.exit_uuid) {
                errors.push(CompilerError::render(
                    "G002",
                    format!(
                        "category '{}' of node '{}' references missing exit '{}'",
                        category.name, node.uuid, category.exit_uuid
                    ),
                ));
            }
        }
        if let Some(cases) = cases {
            for case in cases {
                if !categories.iter().any(|c| c.uuid == case.category_uuid) {
                    errors.push(CompilerError::render(
                        "G002",
                        format!(
                            "case '{}' of node '{}' references missing category '{}'",
                            case.uuid, node.uuid, case.category_uuid
                        ),
                    ));
                }
            }
        }
        if let Some(default) = default
            && !categories.iter().any(|c| &c.uuid == default)
        {
            errors.push(CompilerError::render(
                "G002",
                format!("node '{}' default category '{}' does not exist", node.uuid, default),
            ));
        }
    }
}

fn g003_all_reachable_from_entry(
    flow: &Flow,
    graph: &DiGraph<(), ()>,
    index: &HashMap<&str, NodeIndex>,
) {
    let Some(entry) = flow.nodes.first() else { return };
    let mut bfs = Bfs::new(graph, index[entry.uuid.as_str()]);
    let mut reachable = 0usize;
    while bfs.next(graph).is_some() {
        reachable += 1;
    }
    if reachable < flow.nodes.len() {
        tracing::warn!(
            flow = %flow.name,
            unreachable = flow.nodes.len() - reachable,
            "flow has nodes unreachable from its entry"
        );
    }
}

fn g004_report_cycles(flow: &Flow, graph: &DiGraph<(), ()>) {
    if is_cyclic_directed(graph) {
        tracing::debug!(flow = %flow.name, "flow contains cycles");
    }
}
