//! Block scoping, loop replay, and cross-sheet block insertion.

mod helpers;

use helpers::{compile, node_with_action, table};
use pretty_assertions::assert_eq;
use sheetflow::build::{MemoryCatalog, compile_single};
use sheetflow::flow::types::{Action, RouterDef};

#[test]
fn block_dangling_exits_join_the_next_row() {
    let flow = compile(&[
        &["row_id", "type", "from", "condition", "message_text"],
        &["1", "wait_for_response", "start", "", ""],
        &["b", "begin_block", "1", "", ""],
        &["2", "send_message", "", "yes", "You said yes"],
        &["3", "send_message", "", "no", "You said no"],
        &["", "end_block", "", "", ""],
        &["4", "send_message", "b", "", "Either way, moving on"],
    ]);
    let after = node_with_action(&flow, "Either way, moving on");
    for text in ["You said yes", "You said no"] {
        let node = node_with_action(&flow, text);
        assert_eq!(node.exits[0].destination_uuid.as_deref(), Some(after.uuid.as_str()));
    }
}

#[test]
fn hard_exit_stays_disconnected() {
    let flow = compile(&[
        &["row_id", "type", "from", "condition", "message_text"],
        &["b", "begin_block", "start", "", ""],
        &["1", "wait_for_response", "", "", ""],
        &["2", "send_message", "1", "stop", "Goodbye"],
        &["", "hard_exit", "2", "", ""],
        &["", "end_block", "", "", ""],
        &["3", "send_message", "b", "", "Next question"],
    ]);
    let bye = node_with_action(&flow, "Goodbye");
    assert_eq!(bye.exits[0].destination_uuid, None);
    // The wait's remaining branches did join the follow-up node.
    let next = node_with_action(&flow, "Next question");
    let wait = &flow.nodes[0];
    assert!(
        wait.exits
            .iter()
            .any(|e| e.destination_uuid.as_deref() == Some(next.uuid.as_str()))
    );
}

#[test]
fn loop_replays_rows_once_per_value() {
    let flow = compile(&[
        &["row_id", "type", "from", "list", "loop_variable", "index_variable", "message_text"],
        &["f", "begin_for", "start", "soup|salad", "dish", "i", ""],
        &["1", "send_message", "", "", "", "", "Option {{i}}: {{dish}}"],
        &["", "end_for", "", "", "", "", ""],
        &["2", "send_message", "f", "", "", "", "That is the menu"],
    ]);
    assert_eq!(flow.nodes.len(), 3);
    let first = node_with_action(&flow, "Option 0: soup");
    let second = node_with_action(&flow, "Option 1: salad");
    assert_eq!(first.exits[0].destination_uuid.as_deref(), Some(second.uuid.as_str()));
    let after = node_with_action(&flow, "That is the menu");
    assert_eq!(second.exits[0].destination_uuid.as_deref(), Some(after.uuid.as_str()));
}

#[test]
fn empty_loop_passes_the_chain_through() {
    let flow = compile(&[
        &["row_id", "type", "from", "list", "loop_variable", "message_text"],
        &["1", "send_message", "start", "", "", "Before"],
        &["f", "begin_for", "", "", "item", ""],
        &["2", "send_message", "", "", "", "Skipped entirely"],
        &["", "end_for", "", "", "", ""],
        &["3", "send_message", "f", "", "", "After"],
    ]);
    assert_eq!(flow.nodes.len(), 2);
    let before = node_with_action(&flow, "Before");
    let after = node_with_action(&flow, "After");
    assert_eq!(before.exits[0].destination_uuid.as_deref(), Some(after.uuid.as_str()));
}

#[test]
fn named_rows_merge_inside_each_loop_pass() {
    let flow = compile(&[
        &[
            "row_id", "type", "from", "list", "loop_variable", "node_name", "message_text",
            "value", "save_name",
        ],
        &["f", "begin_for", "start", "a|b", "item", "", "", "", ""],
        &["1", "send_message", "", "", "", "step", "Hi {{item}}", "", ""],
        &["2", "save_value", "", "", "", "step", "", "{{item}}", "seen"],
        &["", "end_for", "", "", "", "", "", "", ""],
    ]);
    // One merged node per replay, each carrying both actions.
    assert_eq!(flow.nodes.len(), 2);
    for node in &flow.nodes {
        assert_eq!(node.actions.len(), 2);
    }
    let first = node_with_action(&flow, "Hi a");
    let second = node_with_action(&flow, "Hi b");
    assert_eq!(first.exits[0].destination_uuid.as_deref(), Some(second.uuid.as_str()));
}

#[test]
fn nested_loop_binds_both_variables() {
    let flow = compile(&[
        &["row_id", "type", "from", "list", "loop_variable", "message_text"],
        &["outer", "begin_for", "start", "A|B", "letter", ""],
        &["inner", "begin_for", "", "1|2", "digit", ""],
        &["m", "send_message", "", "", "", "{{letter}}{{digit}}"],
        &["", "end_for", "", "", "", ""],
        &["", "end_for", "", "", "", ""],
    ]);
    let texts: Vec<String> = flow
        .nodes
        .iter()
        .map(|n| match &n.actions[0] {
            Action::SendMsg { text, .. } => text.clone(),
            _ => panic!(),
        })
        .collect();
    assert_eq!(texts, vec!["A1", "A2", "B1", "B2"]);
}

#[test]
fn insert_as_block_splices_another_sheet() {
    let mut catalog = MemoryCatalog::new();
    catalog.insert(
        "consent_block",
        table(&[
            &["row_id", "type", "from", "condition", "message_text"],
            &["c1", "wait_for_response", "", "", ""],
            &["c2", "send_message", "c1", "no", "No problem."],
            &["", "hard_exit", "c2", "", ""],
        ]),
    );
    let main = table(&[
        &["row_id", "type", "from", "data_sheet", "message_text"],
        &["1", "send_message", "start", "", "May we contact you?"],
        &["2", "insert_as_block", "", "consent_block", ""],
        &["3", "send_message", "2", "", "Thanks!"],
    ]);
    let flow = compile_single("main", main, &catalog).unwrap();
    assert_eq!(flow.nodes.len(), 4);

    // The inserted wait connects from the question...
    let question = node_with_action(&flow, "May we contact you?");
    let wait = flow.nodes.iter().find(|n| n.uuid != question.uuid && n.router.is_some()).unwrap();
    assert_eq!(question.exits[0].destination_uuid.as_deref(), Some(wait.uuid.as_str()));

    // ...and the block's loose branches join the row after it, while the
    // hard-exited branch stays out.
    let thanks = node_with_action(&flow, "Thanks!");
    let Some(RouterDef::Switch(router)) = &wait.router else { panic!() };
    let default_exit = wait
        .exits
        .iter()
        .find(|e| {
            router
                .categories
                .iter()
                .find(|c| c.uuid == router.default_category_uuid)
                .map(|c| c.exit_uuid == e.uuid)
                .unwrap_or(false)
        })
        .unwrap();
    assert_eq!(default_exit.destination_uuid.as_deref(), Some(thanks.uuid.as_str()));
    let refused = node_with_action(&flow, "No problem.");
    assert_eq!(refused.exits[0].destination_uuid, None);
}

#[test]
fn random_split_buckets() {
    let flow = compile(&[
        &["row_id", "type", "from", "condition", "message_text"],
        &["1", "split_random", "start", "", ""],
        &["2", "send_message", "1", "A", "Variant A"],
        &["3", "send_message", "1", "B", "Variant B"],
    ]);
    let split = &flow.nodes[0];
    let Some(RouterDef::Random(router)) = &split.router else { panic!() };
    assert_eq!(router.categories.len(), 2);
    assert_eq!(router.categories[0].name, "A");
    assert_eq!(split.exits.len(), 2);
}
