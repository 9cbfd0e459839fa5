use std::collections::HashMap;
use std::fmt::Write;

use sheetflow::build::{NoSheets, compile_single};
use sheetflow::flow::types::{Action, Flow, NodeDef, RouterDef};

// =============================================================================
// Sheet builders
// =============================================================================

pub fn table(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|r| r.iter().map(|s| s.to_string()).collect())
        .collect()
}

/// Compile a sheet (header row first) into a finished flow, panicking with
/// the full error list on failure.
pub fn compile(rows: &[&[&str]]) -> Flow {
    match compile_single("test_flow", table(rows), &NoSheets) {
        Ok(flow) => flow,
        Err(errors) => {
            let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            panic!("compilation failed:\n{}", rendered.join("\n"));
        }
    }
}

pub fn compile_err(rows: &[&[&str]]) -> Vec<sheetflow::error::CompilerError> {
    compile_single("test_flow", table(rows), &NoSheets)
        .expect_err("compilation unexpectedly succeeded")
}

// =============================================================================
// Structural fingerprint
// =============================================================================

/// A deterministic description of a flow's observable structure, with node
/// and exit uuids replaced by traversal ordinals. Nodes are numbered in
/// depth-first order from the entry (exits in declaration order), so two
/// flows that only differ in node storage order and uuids fingerprint
/// identically.
pub fn fingerprint(flow: &Flow) -> String {
    let by_uuid: HashMap<&str, &NodeDef> =
        flow.nodes.iter().map(|n| (n.uuid.as_str(), n)).collect();
    let mut order: Vec<&NodeDef> = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    if let Some(entry) = flow.nodes.first() {
        dfs_order(entry, &by_uuid, &mut order, &mut seen);
    }
    for node in &flow.nodes {
        if !seen.contains_key(node.uuid.as_str()) {
            seen.insert(node.uuid.as_str(), order.len());
            order.push(node);
        }
    }
    let index = seen;
    let dest = |uuid: &Option<String>| -> String {
        match uuid {
            Some(u) => match index.get(u.as_str()) {
                Some(i) => format!("#{}", i),
                None => format!("?{}", u),
            },
            None => "-".into(),
        }
    };

    let mut out = String::new();
    for (i, node) in order.iter().enumerate() {
        let _ = write!(out, "#{}", i);
        for action in &node.actions {
            let _ = write!(out, " {}", describe_action(action));
        }
        match &node.router {
            None => {
                for exit in &node.exits {
                    let _ = write!(out, " ->{}", dest(&exit.destination_uuid));
                }
            }
            Some(RouterDef::Switch(r)) => {
                let _ = write!(out, " switch({}", r.operand);
                if let Some(wait) = &r.wait {
                    let seconds = wait.timeout.as_ref().map(|t| t.seconds).unwrap_or(0);
                    let _ = write!(out, " wait:{}", seconds);
                }
                let _ = write!(out, ")");
                for cat in &r.categories {
                    let case = r.cases.iter().find(|c| c.category_uuid == cat.uuid);
                    let test = match case {
                        Some(c) => format!("{}[{}]", c.comparison_type, c.arguments.join(",")),
                        None if cat.uuid == r.default_category_uuid => "default".into(),
                        None => "reserved".into(),
                    };
                    let exit = node.exits.iter().find(|e| e.uuid == cat.exit_uuid);
                    let _ = write!(
                        out,
                        " {}:{}->{}",
                        cat.name,
                        test,
                        exit.map(|e| dest(&e.destination_uuid)).unwrap_or_default()
                    );
                }
            }
            Some(RouterDef::Random(r)) => {
                let _ = write!(out, " random");
                for cat in &r.categories {
                    let exit = node.exits.iter().find(|e| e.uuid == cat.exit_uuid);
                    let _ = write!(
                        out,
                        " {}->{}",
                        cat.name,
                        exit.map(|e| dest(&e.destination_uuid)).unwrap_or_default()
                    );
                }
            }
        }
        out.push('\n');
    }
    out
}

fn dfs_order<'a>(
    node: &'a NodeDef,
    by_uuid: &HashMap<&'a str, &'a NodeDef>,
    order: &mut Vec<&'a NodeDef>,
    seen: &mut HashMap<&'a str, usize>,
) {
    if seen.contains_key(node.uuid.as_str()) {
        return;
    }
    seen.insert(node.uuid.as_str(), order.len());
    order.push(node);
    // Routers declare their exit order through their categories.
    let exit_order: Vec<&str> = match &node.router {
        Some(RouterDef::Switch(r)) => r.categories.iter().map(|c| c.exit_uuid.as_str()).collect(),
        Some(RouterDef::Random(r)) => r.categories.iter().map(|c| c.exit_uuid.as_str()).collect(),
        None => node.exits.iter().map(|e| e.uuid.as_str()).collect(),
    };
    for exit_uuid in exit_order {
        if let Some(exit) = node.exits.iter().find(|e| e.uuid == exit_uuid)
            && let Some(dest) = &exit.destination_uuid
            && let Some(target) = by_uuid.get(dest.as_str())
        {
            dfs_order(target, by_uuid, order, seen);
        }
    }
}

fn describe_action(action: &Action) -> String {
    match action {
        Action::SendMsg { text, quick_replies, .. } => {
            format!("msg({}|{})", text, quick_replies.join(","))
        }
        Action::SetContactField { field, value, .. } => {
            format!("field({}={})", field.key, value)
        }
        Action::SetRunResult { name, value, .. } => format!("result({}={})", name, value),
        Action::AddContactGroups { groups, .. } => format!(
            "add_groups({})",
            groups.iter().map(|g| g.name.as_str()).collect::<Vec<_>>().join(",")
        ),
        Action::RemoveContactGroups { groups, .. } => format!(
            "remove_groups({})",
            groups.iter().map(|g| g.name.as_str()).collect::<Vec<_>>().join(",")
        ),
        Action::EnterFlow { flow, .. } => format!("enter({})", flow.name),
        Action::CallWebhook { method, url, result_name, .. } => {
            format!("webhook({} {} => {})", method, url, result_name)
        }
        Action::TransferAirtime { result_name, .. } => format!("airtime(=> {})", result_name),
    }
}

pub fn node_with_action<'a>(flow: &'a Flow, text: &str) -> &'a NodeDef {
    flow.nodes
        .iter()
        .find(|n| {
            n.actions.iter().any(|a| match a {
                Action::SendMsg { text: t, .. } => t == text,
                _ => false,
            })
        })
        .unwrap_or_else(|| panic!("no node sends '{}'", text))
}
