//! The typed row record and its sheet-header dialect.
//!
//! Sheet headers are generic ("message_text", "condition", "choice") and
//! resolve to canonical record fields depending on the row's `type`; the
//! reverse direction renames them back. This is the only place that knows
//! the mapping, in either direction.

use indexmap::IndexMap;

use crate::cell::CellValue;
use crate::error::CompilerError;
use crate::row::mapper::{UnparseOptions, parse_row, unparse_row};
use crate::row::schema::{FieldKind, RecordValue, Schema};

// =============================================================================
// ROW KINDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    SendMessage,
    SaveValue,
    SaveFlowResult,
    AddToGroup,
    RemoveFromGroup,
    SplitByValue,
    SplitRandom,
    WaitForResponse,
    StartNewFlow,
    CallWebhook,
    TransferAirtime,
    GoTo,
    NoOp,
    HardExit,
    LooseExit,
    BeginFor,
    EndFor,
    BeginBlock,
    EndBlock,
    InsertAsBlock,
}

impl RowKind {
    pub fn parse(s: &str) -> Result<Self, CompilerError> {
        match s.trim() {
            "send_message" => Ok(RowKind::SendMessage),
            "save_value" => Ok(RowKind::SaveValue),
            "save_flow_result" => Ok(RowKind::SaveFlowResult),
            "add_to_group" => Ok(RowKind::AddToGroup),
            "remove_from_group" => Ok(RowKind::RemoveFromGroup),
            "split_by_value" => Ok(RowKind::SplitByValue),
            "split_random" => Ok(RowKind::SplitRandom),
            "wait_for_response" => Ok(RowKind::WaitForResponse),
            "start_new_flow" => Ok(RowKind::StartNewFlow),
            "call_webhook" => Ok(RowKind::CallWebhook),
            "transfer_airtime" => Ok(RowKind::TransferAirtime),
            "go_to" => Ok(RowKind::GoTo),
            "no_op" => Ok(RowKind::NoOp),
            "hard_exit" => Ok(RowKind::HardExit),
            "loose_exit" => Ok(RowKind::LooseExit),
            "begin_for" => Ok(RowKind::BeginFor),
            "end_for" => Ok(RowKind::EndFor),
            "begin_block" => Ok(RowKind::BeginBlock),
            "end_block" => Ok(RowKind::EndBlock),
            "insert_as_block" => Ok(RowKind::InsertAsBlock),
            other => Err(CompilerError::row(
                "R005",
                format!("Unknown row type '{}'", other),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RowKind::SendMessage => "send_message",
            RowKind::SaveValue => "save_value",
            RowKind::SaveFlowResult => "save_flow_result",
            RowKind::AddToGroup => "add_to_group",
            RowKind::RemoveFromGroup => "remove_from_group",
            RowKind::SplitByValue => "split_by_value",
            RowKind::SplitRandom => "split_random",
            RowKind::WaitForResponse => "wait_for_response",
            RowKind::StartNewFlow => "start_new_flow",
            RowKind::CallWebhook => "call_webhook",
            RowKind::TransferAirtime => "transfer_airtime",
            RowKind::GoTo => "go_to",
            RowKind::NoOp => "no_op",
            RowKind::HardExit => "hard_exit",
            RowKind::LooseExit => "loose_exit",
            RowKind::BeginFor => "begin_for",
            RowKind::EndFor => "end_for",
            RowKind::BeginBlock => "begin_block",
            RowKind::EndBlock => "end_block",
            RowKind::InsertAsBlock => "insert_as_block",
        }
    }

    /// The sheet header that carries this kind's main argument, if any.
    pub fn main_header(&self) -> Option<&'static str> {
        match self {
            RowKind::SendMessage => Some("message_text"),
            RowKind::SaveValue | RowKind::SaveFlowResult => Some("value"),
            RowKind::SplitByValue => Some("expression"),
            RowKind::AddToGroup | RowKind::RemoveFromGroup => Some("group_name"),
            RowKind::StartNewFlow => Some("flow_name"),
            RowKind::CallWebhook => Some("url"),
            RowKind::TransferAirtime => Some("amount"),
            RowKind::GoTo => Some("destination"),
            _ => None,
        }
    }
}

// =============================================================================
// EDGES AND CONDITIONS
// =============================================================================

/// One incoming edge of a row: "this row's node connects from row `from_`
/// under `condition`".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Edge {
    pub from_: String,
    pub condition: Condition,
}

impl Edge {
    pub fn default_from(from: impl Into<String>) -> Self {
        Edge {
            from_: from.into(),
            condition: Condition::default(),
        }
    }
}

/// A branch condition. All-empty is the sentinel for the unconditional /
/// default branch; equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Condition {
    pub value: String,
    pub variable: String,
    pub type_: String,
    pub name: String,
}

impl Condition {
    pub fn is_default(&self) -> bool {
        self.value.is_empty()
            && self.variable.is_empty()
            && self.type_.is_empty()
            && self.name.is_empty()
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        Condition {
            value: value.into(),
            ..Default::default()
        }
    }
}

// =============================================================================
// THE ROW RECORD
// =============================================================================

/// Webhook-specific fields of a `call_webhook` row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WebhookRow {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// One typed record parsed from one spreadsheet row. Immutable once
/// constructed; the mapper fills defaults for absent headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRow {
    pub row_id: String,
    pub kind: RowKind,
    pub edges: Vec<Edge>,
    pub node_name: String,
    /// Kind-specific main argument: message text, operand expression, group
    /// or flow name, webhook URL, go_to destination.
    pub main_text: String,
    /// Iteration values of a `begin_for` row.
    pub main_list: Vec<String>,
    /// Quick replies of a `send_message` row.
    pub choices: Vec<String>,
    /// Result / contact-field name.
    pub save_name: String,
    /// Known UUID for the referenced group or flow, if the sheet carries one.
    pub obj_id: String,
    /// Wait timeout in seconds (as written); blank means no timeout.
    pub no_response: String,
    pub loop_var: String,
    pub index_var: String,
    pub data_sheet: String,
    pub webhook: WebhookRow,
}

impl FlowRow {
    pub fn new(kind: RowKind) -> Self {
        FlowRow {
            row_id: String::new(),
            kind,
            edges: vec![],
            node_name: String::new(),
            main_text: String::new(),
            main_list: vec![],
            choices: vec![],
            save_name: String::new(),
            obj_id: String::new(),
            no_response: String::new(),
            loop_var: String::new(),
            index_var: String::new(),
            data_sheet: String::new(),
            webhook: WebhookRow::default(),
        }
    }
}

// =============================================================================
// CANONICAL SCHEMA
// =============================================================================

fn condition_schema() -> Schema {
    Schema::new(vec![
        ("value", FieldKind::scalar("")),
        ("variable", FieldKind::scalar("")),
        ("type", FieldKind::scalar("")),
        ("name", FieldKind::scalar("")),
    ])
}

fn edge_schema() -> Schema {
    Schema::new(vec![
        ("from_", FieldKind::scalar("")),
        ("condition", FieldKind::Record(condition_schema())),
    ])
}

fn header_schema() -> Schema {
    Schema::new(vec![
        ("key", FieldKind::scalar("")),
        ("value", FieldKind::scalar("")),
    ])
}

fn webhook_schema() -> Schema {
    Schema::new(vec![
        ("method", FieldKind::scalar("")),
        ("headers", FieldKind::list(FieldKind::Record(header_schema()))),
        ("body", FieldKind::scalar("")),
    ])
}

/// The canonical row schema the mapper works against.
pub fn flow_row_schema() -> Schema {
    Schema::new(vec![
        ("row_id", FieldKind::scalar("")),
        ("type", FieldKind::scalar("")),
        ("edges", FieldKind::list(FieldKind::Record(edge_schema()))),
        ("node_name", FieldKind::scalar("")),
        ("main_text", FieldKind::scalar("")),
        ("main_list", FieldKind::list(FieldKind::scalar(""))),
        ("choices", FieldKind::list(FieldKind::scalar(""))),
        ("save_name", FieldKind::scalar("")),
        ("obj_id", FieldKind::scalar("")),
        ("no_response", FieldKind::scalar("")),
        ("loop_var", FieldKind::scalar("")),
        ("index_var", FieldKind::scalar("")),
        ("data_sheet", FieldKind::scalar("")),
        ("webhook", FieldKind::Record(webhook_schema())),
    ])
}

// =============================================================================
// HEADER REMAPPING
// =============================================================================

/// Resolve a sheet header to its canonical path, given the row's kind.
/// Returns None for headers that have no canonical counterpart.
fn remap_in(header: &str, kind: RowKind) -> Option<String> {
    if let Some(main) = kind.main_header()
        && header == main
    {
        return Some("main_text".into());
    }

    let canonical = match header {
        "row_id" | "type" | "node_name" | "save_name" | "obj_id" | "no_response"
        | "data_sheet" => header,
        "from" => "edges.*.from_",
        "condition" => "edges.*.condition.value",
        "condition.var" | "condition.variable" => "edges.*.condition.variable",
        "condition.type" => "edges.*.condition.type",
        "condition.name" => "edges.*.condition.name",
        "choice" => "choices",
        "list" => "main_list",
        "loop_variable" => "loop_var",
        "index_variable" => "index_var",
        "method" => "webhook.method",
        "headers" => "webhook.headers",
        "body" => "webhook.body",
        _ => return None,
    };
    Some(canonical.to_string())
}

/// Rename a canonical output path back to its sheet header.
fn remap_out(path: &str, kind: RowKind) -> String {
    if path == "main_text" {
        return kind.main_header().unwrap_or("main_text").to_string();
    }
    match path {
        "choices" => "choice".into(),
        "main_list" => "list".into(),
        "loop_var" => "loop_variable".into(),
        "index_var" => "index_variable".into(),
        "webhook.method" => "method".into(),
        "webhook.headers" => "headers".into(),
        "webhook.body" => "body".into(),
        other => other.to_string(),
    }
}

// =============================================================================
// PARSE / UNPARSE
// =============================================================================

/// Map a flat dict of parsed cells into a typed `FlowRow`.
pub fn parse_flow_row(
    flat: &IndexMap<String, CellValue>,
) -> Result<FlowRow, Vec<CompilerError>> {
    let kind_text = flat
        .get("type")
        .map(|v| v.as_text())
        .unwrap_or_default();
    let kind = RowKind::parse(&kind_text).map_err(|e| vec![e])?;

    let mut canonical: IndexMap<String, CellValue> = IndexMap::new();
    let mut errors = Vec::new();
    for (header, value) in flat {
        if value.is_empty() {
            continue;
        }
        match remap_in(header, kind) {
            Some(path) => {
                canonical.insert(path, value.clone());
            }
            None => errors.push(CompilerError::row(
                "R002",
                format!("Unknown header '{}' for row type '{}'", header, kind.as_str()),
            )),
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let schema = flow_row_schema();
    let record = parse_row(&canonical, &schema)?;
    let mut row = row_from_record(kind, &record);

    // Most rows have exactly one implicit edge "from previous row".
    if row.edges.is_empty() {
        row.edges.push(Edge::default());
    }
    Ok(row)
}

fn row_from_record(kind: RowKind, record: &RecordValue) -> FlowRow {
    let get = |name: &str| -> String { record.get(name).map(|v| v.as_str().to_string()).unwrap_or_default() };
    let get_list = |name: &str| -> Vec<String> {
        record
            .get(name)
            .map(|v| v.items().iter().map(|i| i.as_str().to_string()).collect())
            .unwrap_or_default()
    };

    let edges = record
        .get("edges")
        .map(|v| {
            v.items()
                .iter()
                .map(|e| Edge {
                    from_: e.get("from_").map(|v| v.as_str().to_string()).unwrap_or_default(),
                    condition: e
                        .get("condition")
                        .map(|c| Condition {
                            value: c.get("value").map(|v| v.as_str().to_string()).unwrap_or_default(),
                            variable: c
                                .get("variable")
                                .map(|v| v.as_str().to_string())
                                .unwrap_or_default(),
                            type_: c.get("type").map(|v| v.as_str().to_string()).unwrap_or_default(),
                            name: c.get("name").map(|v| v.as_str().to_string()).unwrap_or_default(),
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let webhook = record
        .get("webhook")
        .map(|w| WebhookRow {
            method: w.get("method").map(|v| v.as_str().to_string()).unwrap_or_default(),
            headers: w
                .get("headers")
                .map(|h| {
                    h.items()
                        .iter()
                        .map(|p| {
                            (
                                p.get("key").map(|v| v.as_str().to_string()).unwrap_or_default(),
                                p.get("value").map(|v| v.as_str().to_string()).unwrap_or_default(),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default(),
            body: w.get("body").map(|v| v.as_str().to_string()).unwrap_or_default(),
        })
        .unwrap_or_default();

    FlowRow {
        row_id: get("row_id"),
        kind,
        edges,
        node_name: get("node_name"),
        main_text: get("main_text"),
        main_list: get_list("main_list"),
        choices: get_list("choices"),
        save_name: get("save_name"),
        obj_id: get("obj_id"),
        no_response: get("no_response"),
        loop_var: get("loop_var"),
        index_var: get("index_var"),
        data_sheet: get("data_sheet"),
        webhook,
    }
}

fn record_from_row(row: &FlowRow) -> RecordValue {
    let schema = flow_row_schema();
    let mut record = schema.default_record();
    let RecordValue::Record(map) = &mut record else {
        unreachable!();
    };

    let set = |map: &mut IndexMap<String, RecordValue>, name: &str, value: &str| {
        map.insert(name.to_string(), RecordValue::Str(value.to_string()));
    };

    set(map, "row_id", &row.row_id);
    set(map, "type", row.kind.as_str());
    set(map, "node_name", &row.node_name);
    set(map, "main_text", &row.main_text);
    set(map, "save_name", &row.save_name);
    set(map, "obj_id", &row.obj_id);
    set(map, "no_response", &row.no_response);
    set(map, "loop_var", &row.loop_var);
    set(map, "index_var", &row.index_var);
    set(map, "data_sheet", &row.data_sheet);

    map.insert(
        "main_list".into(),
        RecordValue::List(row.main_list.iter().map(|s| RecordValue::Str(s.clone())).collect()),
    );
    map.insert(
        "choices".into(),
        RecordValue::List(row.choices.iter().map(|s| RecordValue::Str(s.clone())).collect()),
    );

    let edges = row
        .edges
        .iter()
        .map(|e| {
            let mut edge = IndexMap::new();
            edge.insert("from_".to_string(), RecordValue::Str(e.from_.clone()));
            let mut cond = IndexMap::new();
            cond.insert("value".to_string(), RecordValue::Str(e.condition.value.clone()));
            cond.insert(
                "variable".to_string(),
                RecordValue::Str(e.condition.variable.clone()),
            );
            cond.insert("type".to_string(), RecordValue::Str(e.condition.type_.clone()));
            cond.insert("name".to_string(), RecordValue::Str(e.condition.name.clone()));
            edge.insert("condition".to_string(), RecordValue::Record(cond));
            RecordValue::Record(edge)
        })
        .collect();
    map.insert("edges".into(), RecordValue::List(edges));

    let mut webhook = IndexMap::new();
    webhook.insert("method".to_string(), RecordValue::Str(row.webhook.method.clone()));
    webhook.insert(
        "headers".to_string(),
        RecordValue::List(
            row.webhook
                .headers
                .iter()
                .map(|(k, v)| {
                    let mut pair = IndexMap::new();
                    pair.insert("key".to_string(), RecordValue::Str(k.clone()));
                    pair.insert("value".to_string(), RecordValue::Str(v.clone()));
                    RecordValue::Record(pair)
                })
                .collect(),
        ),
    );
    webhook.insert("body".to_string(), RecordValue::Str(row.webhook.body.clone()));
    map.insert("webhook".into(), RecordValue::Record(webhook));

    record
}

/// Flatten a typed row back into `{sheet header: cell text}`.
///
/// Edges are emitted as joined `from` / `condition` columns (one list cell
/// per column); everything else goes through the generic unparse walk with
/// the list-valued fields collapsed into single cells.
pub fn unparse_flow_row(row: &FlowRow) -> IndexMap<String, String> {
    let schema = flow_row_schema();
    let record = record_from_row(row);
    let opts = UnparseOptions {
        collapse: vec!["main_list".into(), "choices".into(), "webhook.headers".into()],
        exclude: vec!["edges".into()],
    };
    let flat = unparse_row(&record, &schema, &opts);

    let mut out: IndexMap<String, String> = IndexMap::new();
    for (path, value) in flat {
        out.insert(remap_out(&path, row.kind), value);
    }

    // Edge columns: one cell per column, edges joined with the outer
    // separator. Columns that are default across every edge are omitted.
    let join = |f: &dyn Fn(&Edge) -> String| -> Option<String> {
        let mut parts: Vec<String> = row.edges.iter().map(|e| f(e)).collect();
        if parts.iter().all(|p| p.is_empty()) {
            None
        } else if parts.len() == 1 {
            parts.pop()
        } else {
            Some(parts.join("|"))
        }
    };
    let mut edge_cols: Vec<(&str, Option<String>)> = vec![
        ("from", join(&|e| crate::cell::escape(&e.from_))),
        ("condition", join(&|e| crate::cell::escape(&e.condition.value))),
        (
            "condition.var",
            join(&|e| crate::cell::escape(&e.condition.variable)),
        ),
        (
            "condition.type",
            join(&|e| crate::cell::escape(&e.condition.type_)),
        ),
        (
            "condition.name",
            join(&|e| crate::cell::escape(&e.condition.name)),
        ),
    ];
    for (header, cell) in edge_cols.drain(..) {
        if let Some(cell) = cell {
            out.insert(header.to_string(), cell);
        }
    }

    out
}
