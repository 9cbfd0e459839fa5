//! The reverse compiler: a finished interchange flow back into an ordered,
//! cycle-free row sequence.
//!
//! A depth-first walk from the entry node, with three node states. Forward
//! and shared references become extra edges prepended onto already-emitted
//! rows; back references to an ancestor become go_to rows. Completed nodes
//! prepend their rows to the accumulator, which yields topological order
//! with the entry first.

pub mod renumber;

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::CompilerError;
use crate::flow::router::DEFAULT_OPERAND;
use crate::flow::types::{Action, Flow, NodeDef, RouterDef, SwitchRouterDef};
use crate::row::{Condition, Edge, FlowRow, RowKind, unparse_flow_row};

pub use renumber::renumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    InProgress,
    Completed,
}

/// Serialize a flow back into rows. Row ids are freshly numbered; node and
/// exit uuids do not survive the trip.
pub fn to_rows(flow: &Flow) -> Result<Vec<FlowRow>, Vec<CompilerError>> {
    let mut walker = Walker {
        flow,
        index: flow
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.uuid.as_str(), i))
            .collect(),
        state: vec![VisitState::Unvisited; flow.nodes.len()],
        first_row_id: vec![String::new(); flow.nodes.len()],
        rows: Vec::new(),
        errors: Vec::new(),
    };
    if !flow.nodes.is_empty() {
        walker.visit(0, Edge::default_from("start"));
    }
    let visited = walker
        .state
        .iter()
        .filter(|s| **s == VisitState::Completed)
        .count();
    if visited < flow.nodes.len() {
        tracing::warn!(
            flow = %flow.name,
            skipped = flow.nodes.len() - visited,
            "nodes unreachable from the entry were not serialized"
        );
    }
    if !walker.errors.is_empty() {
        return Err(walker.errors);
    }
    let mut rows = walker.rows;
    renumber(&mut rows);
    Ok(rows)
}

/// Serialize a flow into a table: one header row (the union of every row's
/// columns, in first-use order) followed by one line per row.
pub fn to_table(flow: &Flow) -> Result<Vec<Vec<String>>, Vec<CompilerError>> {
    let rows = to_rows(flow)?;
    let flats: Vec<IndexMap<String, String>> = rows.iter().map(unparse_flow_row).collect();

    let mut headers: Vec<String> = Vec::new();
    for flat in &flats {
        for header in flat.keys() {
            if !headers.contains(header) {
                headers.push(header.clone());
            }
        }
    }
    let mut table = vec![headers.clone()];
    for flat in &flats {
        table.push(
            headers
                .iter()
                .map(|h| flat.get(h).cloned().unwrap_or_default())
                .collect(),
        );
    }
    Ok(table)
}

struct Walker<'a> {
    flow: &'a Flow,
    index: HashMap<&'a str, usize>,
    state: Vec<VisitState>,
    first_row_id: Vec<String>,
    rows: Vec<FlowRow>,
    errors: Vec<CompilerError>,
}

impl<'a> Walker<'a> {
    fn visit(&mut self, idx: usize, incoming: Edge) {
        self.state[idx] = VisitState::InProgress;
        let node = &self.flow.nodes[idx];

        let (mut local, outgoing) = rows_for_node(node, idx);
        if let Some(first) = local.first_mut() {
            first.edges = vec![incoming];
        }
        self.first_row_id[idx] = local
            .first()
            .map(|r| r.row_id.clone())
            .unwrap_or_default();
        let from_id = local
            .last()
            .map(|r| r.row_id.clone())
            .unwrap_or_default();
        let own_rows = local.len();

        // Reverse declaration order, so that prepending (and inserting
        // go_to rows at a fixed offset) restores left-to-right reading
        // order in the final sheet.
        let mut goto_count = 0usize;
        for (cond, dest) in outgoing.into_iter().rev() {
            let Some(dest) = dest else { continue };
            let Some(&target) = self.index.get(dest.as_str()) else {
                self.errors.push(CompilerError::uncompile(
                    "D001",
                    format!("exit of node '{}' points at unknown node '{}'", node.uuid, dest),
                ));
                continue;
            };
            match self.state[target] {
                VisitState::Unvisited => {
                    self.visit(target, Edge { from_: from_id.clone(), condition: cond });
                }
                VisitState::InProgress => {
                    // A back edge to an ancestor: a direct edge would be
                    // unreadable (and unorderable), so jump instead.
                    let mut jump = FlowRow::new(RowKind::GoTo);
                    jump.row_id = format!("{}.goto.{}", node.uuid, goto_count);
                    goto_count += 1;
                    jump.edges = vec![Edge { from_: from_id.clone(), condition: cond }];
                    jump.main_text = self.first_row_id[target].clone();
                    local.insert(own_rows, jump);
                }
                VisitState::Completed => {
                    // Shared target, already emitted: give its row one more
                    // incoming edge, in front.
                    let target_id = &self.first_row_id[target];
                    if let Some(row) = self.rows.iter_mut().find(|r| &r.row_id == target_id) {
                        row.edges.insert(0, Edge { from_: from_id.clone(), condition: cond });
                    }
                }
            }
        }

        self.rows.splice(0..0, local);
        self.state[idx] = VisitState::Completed;
    }
}

// =============================================================================
// NODE CLASSIFICATION
// =============================================================================

/// The rows one node serializes to, plus its outgoing (condition,
/// destination) pairs in declaration order. Multi-action nodes emit one row
/// per action, chained by trivial default edges and sharing an id prefix.
fn rows_for_node(node: &NodeDef, idx: usize) -> (Vec<FlowRow>, Vec<(Condition, Option<String>)>) {
    let base_id = format!("n{}-{}", idx, short_uuid(&node.uuid));
    let mut rows: Vec<FlowRow> = Vec::new();
    for action in &node.actions {
        let mut row = action_row(action);
        row.row_id = if node.actions.len() == 1 {
            base_id.clone()
        } else {
            format!("{}.{}", base_id, rows.len() + 1)
        };
        if let Some(prev) = rows.last() {
            row.edges = vec![Edge::default_from(&prev.row_id)];
        }
        rows.push(row);
    }
    // A shared node name is what makes the rows merge back into one node.
    if node.actions.len() > 1 {
        for row in &mut rows {
            row.node_name = base_id.clone();
        }
    }

    let outgoing = match &node.router {
        None => node
            .exits
            .first()
            .map(|e| vec![(Condition::default(), e.destination_uuid.clone())])
            .unwrap_or_default(),
        Some(RouterDef::Switch(router)) => {
            if rows.is_empty() {
                rows.push(switch_row(router, &base_id));
                switch_conditions(node, router, None)
            } else if is_gated_action(&node.actions) {
                // The action's own success/failure gates; the failure gate
                // is the default category but still round-trips by name.
                gate_conditions(node, router)
            } else {
                // A promoted action node: its branch conditions carry the
                // operand, since no dedicated split row exists.
                let variable = (router.operand != DEFAULT_OPERAND)
                    .then(|| router.operand.clone());
                switch_conditions(node, router, variable)
            }
        }
        Some(RouterDef::Random(router)) => {
            if rows.is_empty() {
                let mut row = FlowRow::new(RowKind::SplitRandom);
                row.row_id = base_id.clone();
                row.save_name = router.result_name.clone().unwrap_or_default();
                rows.push(row);
            }
            router
                .categories
                .iter()
                .map(|cat| {
                    let exit = node.exits.iter().find(|e| e.uuid == cat.exit_uuid);
                    (
                        Condition::with_value(&cat.name),
                        exit.and_then(|e| e.destination_uuid.clone()),
                    )
                })
                .collect()
        }
    };

    if rows.is_empty() {
        let mut row = FlowRow::new(RowKind::NoOp);
        row.row_id = base_id;
        rows.push(row);
    }
    (rows, outgoing)
}

fn short_uuid(uuid: &str) -> &str {
    uuid.split('-').next().unwrap_or(uuid)
}

fn action_row(action: &Action) -> FlowRow {
    match action {
        Action::SendMsg { text, quick_replies, .. } => {
            let mut row = FlowRow::new(RowKind::SendMessage);
            row.main_text = text.clone();
            row.choices = quick_replies.clone();
            row
        }
        Action::SetContactField { field, value, .. } => {
            let mut row = FlowRow::new(RowKind::SaveValue);
            row.save_name = field.name.clone();
            row.main_text = value.clone();
            row
        }
        Action::SetRunResult { name, value, .. } => {
            let mut row = FlowRow::new(RowKind::SaveFlowResult);
            row.save_name = name.clone();
            row.main_text = value.clone();
            row
        }
        Action::AddContactGroups { groups, .. } => {
            let mut row = FlowRow::new(RowKind::AddToGroup);
            if let Some(group) = groups.first() {
                row.main_text = group.name.clone();
                row.obj_id = group.uuid.clone();
            }
            row
        }
        Action::RemoveContactGroups { groups, .. } => {
            let mut row = FlowRow::new(RowKind::RemoveFromGroup);
            if let Some(group) = groups.first() {
                row.main_text = group.name.clone();
                row.obj_id = group.uuid.clone();
            }
            row
        }
        Action::EnterFlow { flow, .. } => {
            let mut row = FlowRow::new(RowKind::StartNewFlow);
            row.main_text = flow.name.clone();
            row.obj_id = flow.uuid.clone();
            row
        }
        Action::CallWebhook { method, url, headers, body, result_name, .. } => {
            let mut row = FlowRow::new(RowKind::CallWebhook);
            row.main_text = url.clone();
            row.save_name = result_name.clone();
            row.webhook.method = method.clone();
            row.webhook.headers = headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            row.webhook.body = body.clone();
            row
        }
        Action::TransferAirtime { amounts, result_name, .. } => {
            let mut row = FlowRow::new(RowKind::TransferAirtime);
            row.main_text = amounts.values().next().cloned().unwrap_or_default();
            row.save_name = result_name.clone();
            row
        }
    }
}

/// The row for a routing-only switch node: a wait if the router waits,
/// otherwise an expression split.
fn switch_row(router: &SwitchRouterDef, base_id: &str) -> FlowRow {
    let mut row = if router.wait.is_some() {
        let mut row = FlowRow::new(RowKind::WaitForResponse);
        if let Some(timeout) = router.wait.as_ref().and_then(|w| w.timeout.as_ref()) {
            row.no_response = timeout.seconds.to_string();
        }
        row
    } else {
        let mut row = FlowRow::new(RowKind::SplitByValue);
        row.main_text = router.operand.clone();
        row
    };
    row.row_id = base_id.to_string();
    row.save_name = router.result_name.clone().unwrap_or_default();
    row
}

fn is_gated_action(actions: &[Action]) -> bool {
    matches!(
        actions,
        [Action::EnterFlow { .. }]
            | [Action::CallWebhook { .. }]
            | [Action::TransferAirtime { .. }]
    )
}

/// Conditions for a gated node's categories: each branch round-trips
/// through its category name ("Complete", "Expired", "Success", "Failure"),
/// which the builder recognizes as gate keywords.
fn gate_conditions(node: &NodeDef, router: &SwitchRouterDef) -> Vec<(Condition, Option<String>)> {
    router
        .categories
        .iter()
        .map(|cat| {
            let exit = node.exits.iter().find(|e| e.uuid == cat.exit_uuid);
            (
                Condition::with_value(&cat.name),
                exit.and_then(|e| e.destination_uuid.clone()),
            )
        })
        .collect()
}

fn switch_conditions(
    node: &NodeDef,
    router: &SwitchRouterDef,
    variable: Option<String>,
) -> Vec<(Condition, Option<String>)> {
    let timeout_category = router
        .wait
        .as_ref()
        .and_then(|w| w.timeout.as_ref())
        .map(|t| t.category_uuid.as_str());

    router
        .categories
        .iter()
        .map(|cat| {
            let exit = node.exits.iter().find(|e| e.uuid == cat.exit_uuid);
            let dest = exit.and_then(|e| e.destination_uuid.clone());
            if cat.uuid == router.default_category_uuid {
                return (Condition::default(), dest);
            }
            if Some(cat.uuid.as_str()) == timeout_category {
                return (Condition::with_value("No Response"), dest);
            }
            let cond = match router.cases.iter().find(|c| c.category_uuid == cat.uuid) {
                Some(case) => Condition {
                    value: case.arguments.join(" "),
                    variable: variable.clone().unwrap_or_default(),
                    // The default comparison stays implicit in the sheet.
                    type_: if case.comparison_type == "has_any_word" {
                        String::new()
                    } else {
                        case.comparison_type.clone()
                    },
                    name: cat.name.clone(),
                },
                None => Condition::with_value(&cat.name),
            };
            (cond, dest)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::{CaseDef, CategoryDef, ExitDef};

    fn basic(uuid: &str, text: &str, dest: Option<&str>) -> NodeDef {
        NodeDef {
            uuid: uuid.into(),
            actions: vec![Action::SendMsg {
                uuid: format!("{}-a", uuid),
                text: text.into(),
                quick_replies: vec![],
            }],
            router: None,
            exits: vec![ExitDef {
                uuid: format!("{}-e", uuid),
                destination_uuid: dest.map(String::from),
            }],
        }
    }

    fn flow_of(nodes: Vec<NodeDef>) -> Flow {
        Flow {
            uuid: "f".into(),
            name: "test".into(),
            language: "eng".into(),
            flow_type: "messaging".into(),
            nodes,
            spec_version: crate::flow::types::SPEC_VERSION.into(),
            revision: 0,
            expire_after_minutes: 60,
            metadata: serde_json::json!({}),
            localization: serde_json::json!({}),
        }
    }

    #[test]
    fn chain_serializes_in_order() {
        let flow = flow_of(vec![
            basic("a", "one", Some("b")),
            basic("b", "two", Some("c")),
            basic("c", "three", None),
        ]);
        let rows = to_rows(&flow).unwrap();
        let texts: Vec<&str> = rows.iter().map(|r| r.main_text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(rows[0].edges[0].from_, "start");
        assert_eq!(rows[1].edges[0].from_, "1");
        assert_eq!(rows[2].edges[0].from_, "2");
    }

    #[test]
    fn multi_action_node_chains_suffixed_rows() {
        let node = NodeDef {
            uuid: "a".into(),
            actions: vec![
                Action::SendMsg { uuid: "a1".into(), text: "x".into(), quick_replies: vec![] },
                Action::SendMsg { uuid: "a2".into(), text: "y".into(), quick_replies: vec![] },
            ],
            router: None,
            exits: vec![ExitDef { uuid: "e".into(), destination_uuid: None }],
        };
        let flow = flow_of(vec![node]);
        let rows = to_rows(&flow).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].edges[0].from_, rows[0].row_id);
    }

    #[test]
    fn back_edge_becomes_go_to() {
        // a -> b -> a
        let flow = flow_of(vec![basic("a", "one", Some("b")), basic("b", "two", Some("a"))]);
        let rows = to_rows(&flow).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].kind, RowKind::GoTo);
        assert_eq!(rows[2].main_text, rows[0].row_id);
        assert_eq!(rows[2].edges[0].from_, rows[1].row_id);
    }

    #[test]
    fn shared_target_gets_prepended_edge() {
        // switch: yes -> b, default -> c; both b and c -> d
        let switch = NodeDef {
            uuid: "s".into(),
            actions: vec![],
            router: Some(RouterDef::Switch(SwitchRouterDef {
                result_name: None,
                wait: None,
                operand: "@fields.x".into(),
                cases: vec![CaseDef {
                    uuid: "case".into(),
                    comparison_type: "has_any_word".into(),
                    arguments: vec!["yes".into()],
                    category_uuid: "cat-yes".into(),
                }],
                categories: vec![
                    CategoryDef { uuid: "cat-other".into(), name: "Other".into(), exit_uuid: "e0".into() },
                    CategoryDef { uuid: "cat-yes".into(), name: "Yes".into(), exit_uuid: "e1".into() },
                ],
                default_category_uuid: "cat-other".into(),
            })),
            exits: vec![
                ExitDef { uuid: "e0".into(), destination_uuid: Some("c".into()) },
                ExitDef { uuid: "e1".into(), destination_uuid: Some("b".into()) },
            ],
        };
        let flow = flow_of(vec![
            switch,
            basic("b", "yes-branch", Some("d")),
            basic("c", "other-branch", Some("d")),
            basic("d", "join", None),
        ]);
        let rows = to_rows(&flow).unwrap();
        assert_eq!(rows[0].kind, RowKind::SplitByValue);
        let join = rows.iter().find(|r| r.main_text == "join").unwrap();
        assert_eq!(join.edges.len(), 2);
    }

    #[test]
    fn wait_router_round_trips_timeout_and_conditions() {
        let wait = NodeDef {
            uuid: "w".into(),
            actions: vec![],
            router: Some(RouterDef::Switch(SwitchRouterDef {
                result_name: Some("answer".into()),
                wait: Some(crate::flow::types::WaitDef::msg(Some(
                    crate::flow::types::TimeoutDef { seconds: 300, category_uuid: "cat-nr".into() },
                ))),
                operand: DEFAULT_OPERAND.into(),
                cases: vec![],
                categories: vec![
                    CategoryDef { uuid: "cat-other".into(), name: "Other".into(), exit_uuid: "e0".into() },
                    CategoryDef { uuid: "cat-nr".into(), name: "No Response".into(), exit_uuid: "e1".into() },
                ],
                default_category_uuid: "cat-other".into(),
            })),
            exits: vec![
                ExitDef { uuid: "e0".into(), destination_uuid: None },
                ExitDef { uuid: "e1".into(), destination_uuid: None },
            ],
        };
        let flow = flow_of(vec![wait]);
        let rows = to_rows(&flow).unwrap();
        assert_eq!(rows[0].kind, RowKind::WaitForResponse);
        assert_eq!(rows[0].no_response, "300");
        assert_eq!(rows[0].save_name, "answer");
    }
}
