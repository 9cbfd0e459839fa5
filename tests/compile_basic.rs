//! End-to-end compilation of single sheets into interchange flows.

mod helpers;

use helpers::{compile, compile_err, node_with_action};
use pretty_assertions::assert_eq;
use sheetflow::flow::types::{Action, RouterDef};

#[test]
fn linear_flow_shape() {
    let flow = compile(&[
        &["row_id", "type", "from", "message_text", "choice"],
        &["1", "send_message", "start", "Welcome!", "Sign up|Not now"],
        &["2", "send_message", "", "Here is how it works.", ""],
    ]);
    assert_eq!(flow.name, "test_flow");
    assert_eq!(flow.spec_version, "13.1.0");
    assert_eq!(flow.nodes.len(), 2);

    let first = &flow.nodes[0];
    let Action::SendMsg { text, quick_replies, .. } = &first.actions[0] else {
        panic!("expected send_msg");
    };
    assert_eq!(text, "Welcome!");
    assert_eq!(quick_replies, &vec!["Sign up".to_string(), "Not now".to_string()]);
    assert_eq!(
        first.exits[0].destination_uuid.as_deref(),
        Some(flow.nodes[1].uuid.as_str())
    );
    assert_eq!(flow.nodes[1].exits[0].destination_uuid, None);
}

#[test]
fn conditional_edge_promotes_and_keeps_default() {
    let flow = compile(&[
        &["row_id", "type", "from", "condition", "message_text"],
        &["1", "send_message", "start", "", "pick a door"],
        &["2", "send_message", "1", "", "default door"],
        &["3", "send_message", "1", "red", "the red door"],
    ]);
    let pick = node_with_action(&flow, "pick a door");
    let Some(RouterDef::Switch(router)) = &pick.router else {
        panic!("expected promotion to a switch");
    };
    let default = router
        .categories
        .iter()
        .find(|c| c.uuid == router.default_category_uuid)
        .unwrap();
    let default_exit = pick.exits.iter().find(|e| e.uuid == default.exit_uuid).unwrap();
    assert_eq!(
        default_exit.destination_uuid.as_deref(),
        Some(node_with_action(&flow, "default door").uuid.as_str())
    );
    assert_eq!(router.cases.len(), 1);
    assert_eq!(router.cases[0].arguments, vec!["red"]);
}

#[test]
fn named_rows_merge_into_one_node() {
    let flow = compile(&[
        &["row_id", "type", "from", "node_name", "message_text", "value", "save_name"],
        &["1", "send_message", "start", "intro", "Hello", "", ""],
        &["2", "save_value", "", "intro", "", "yes", "consented"],
        &["3", "send_message", "", "", "Saved.", "", ""],
    ]);
    assert_eq!(flow.nodes.len(), 2);
    let merged = &flow.nodes[0];
    assert_eq!(merged.actions.len(), 2);
    assert!(matches!(merged.actions[0], Action::SendMsg { .. }));
    let Action::SetContactField { field, value, .. } = &merged.actions[1] else {
        panic!("expected set_contact_field second");
    };
    assert_eq!(field.key, "consented");
    assert_eq!(value, "yes");
}

#[test]
fn wait_with_timeout_builds_no_response_branch() {
    let flow = compile(&[
        &["row_id", "type", "from", "condition", "message_text", "save_name", "no_response"],
        &["1", "wait_for_response", "start", "", "", "answer", "300"],
        &["2", "send_message", "1", "yes", "Great!", "", ""],
        &["3", "send_message", "1", "No Response", "Still there?", "", ""],
    ]);
    let wait = &flow.nodes[0];
    let Some(RouterDef::Switch(router)) = &wait.router else { panic!() };
    assert_eq!(router.result_name.as_deref(), Some("answer"));
    let wait_def = router.wait.as_ref().unwrap();
    let timeout = wait_def.timeout.as_ref().unwrap();
    assert_eq!(timeout.seconds, 300);
    let no_response = router
        .categories
        .iter()
        .find(|c| c.uuid == timeout.category_uuid)
        .unwrap();
    assert_eq!(no_response.name, "No Response");
    let exit = wait.exits.iter().find(|e| e.uuid == no_response.exit_uuid).unwrap();
    assert_eq!(
        exit.destination_uuid.as_deref(),
        Some(node_with_action(&flow, "Still there?").uuid.as_str())
    );
}

#[test]
fn webhook_routes_success_and_failure() {
    let flow = compile(&[
        &[
            "row_id", "type", "from", "condition", "url", "method", "headers", "body",
            "save_name", "message_text",
        ],
        &[
            "1", "call_webhook", "start", "", "https://api.example.com/check", "POST",
            "Accept;application/json", "{\"id\": 1}", "check", "",
        ],
        &["2", "send_message", "1", "success", "", "", "", "", "", "All good"],
        &["3", "send_message", "1", "failure", "", "", "", "", "", "Something broke"],
    ]);
    let hook = &flow.nodes[0];
    let Action::CallWebhook { method, url, headers, result_name, .. } = &hook.actions[0] else {
        panic!("expected call_webhook");
    };
    assert_eq!(method, "POST");
    assert_eq!(url, "https://api.example.com/check");
    assert_eq!(headers.get("Accept").map(String::as_str), Some("application/json"));
    assert_eq!(result_name, "check");

    let Some(RouterDef::Switch(router)) = &hook.router else { panic!() };
    assert_eq!(router.operand, "@results.check.category");
    assert_eq!(router.default_category_uuid, router.categories[1].uuid);
    let success_exit = hook.exits.iter().find(|e| e.uuid == router.categories[0].exit_uuid);
    assert_eq!(
        success_exit.unwrap().destination_uuid.as_deref(),
        Some(node_with_action(&flow, "All good").uuid.as_str())
    );
}

#[test]
fn enter_flow_rejects_foreign_conditions() {
    let errors = compile_err(&[
        &["row_id", "type", "from", "condition", "flow_name", "message_text"],
        &["1", "start_new_flow", "start", "", "onboarding", ""],
        &["2", "send_message", "1", "maybe", "", "huh"],
    ]);
    assert!(errors.iter().any(|e| e.code == "N001"));
}

#[test]
fn group_uuids_reconcile_across_mentions() {
    let flow = compile(&[
        &["row_id", "type", "from", "group_name", "obj_id", "message_text"],
        &["1", "add_to_group", "start", "Subscribers", "", ""],
        &["2", "send_message", "", "", "", "added"],
        &["3", "remove_from_group", "", "Subscribers", "", ""],
    ]);
    let uuid_of = |node: &sheetflow::flow::types::NodeDef| match &node.actions[0] {
        Action::AddContactGroups { groups, .. } | Action::RemoveContactGroups { groups, .. } => {
            groups[0].uuid.clone()
        }
        _ => panic!("expected a group action"),
    };
    let added = uuid_of(&flow.nodes[0]);
    let removed = uuid_of(&flow.nodes[2]);
    assert!(!added.is_empty());
    assert_eq!(added, removed);
}

#[test]
fn conflicting_group_uuids_are_fatal() {
    let errors = compile_err(&[
        &["row_id", "type", "from", "group_name", "obj_id"],
        &["1", "add_to_group", "start", "Subscribers", "uuid-one"],
        &["2", "remove_from_group", "", "Subscribers", "uuid-two"],
    ]);
    assert!(errors.iter().any(|e| e.code == "U001"));
}

#[test]
fn errors_carry_sheet_coordinates() {
    let errors = compile_err(&[
        &["row_id", "type", "from", "message_text"],
        &["1", "send_message", "start", "fine"],
        &["2", "send_message", "missing_row", "broken"],
    ]);
    let err = errors.iter().find(|e| e.code == "B001").unwrap();
    let location = err.location.as_ref().unwrap();
    assert_eq!(location.sheet, "test_flow");
    assert_eq!(location.row, 3);
}
