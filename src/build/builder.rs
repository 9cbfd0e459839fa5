//! The graph builder: a single pass over a row stream with scoped blocks,
//! replayed loops, and incremental edge resolution.
//!
//! Rows arrive in sheet order. Each content row becomes one node (or merges
//! into a named one); block and loop rows push a scope whose groups later
//! rows address as a unit. Edges resolve against rows already seen; the
//! only forward reference mechanism is a go_to row.

use indexmap::IndexMap;

use crate::build::group::{GroupArena, GroupId, NodeGroup};
use crate::build::source::{RawRow, RowSource, SheetCatalog};
use crate::cell::{TemplateContext, VarExpander, parse_cell};
use crate::error::{CompilerError, RowLocation};
use crate::flow::router::{DEFAULT_OPERAND, new_uuid};
use crate::flow::types::{Action, FieldRef, NamedRef};
use crate::flow::{
    ExitTarget, FlowContainer, FlowNode, GatedNode, NodeId, RandomNode, RandomRouter, SwitchNode,
    SwitchRouter,
};
use crate::registry::UuidRegistry;
use crate::row::{Condition, FlowRow, RowKind, parse_flow_row};

/// What a processing pass is allowed to be terminated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopAt {
    EndOfStream,
    EndBlock,
    EndFor,
}

/// One block scope: the groups completed in it, in order, plus the sources
/// the enclosing begin row connected from. Until the scope completes its
/// first group, a blank `from_` resolves to those inherited sources; a
/// `None` source is the graph root.
#[derive(Debug, Default)]
struct Scope {
    entries: Vec<GroupId>,
    inherited: Vec<(Option<GroupId>, Condition)>,
}

/// How a row's `from_` resolved.
enum Resolved {
    Group(GroupId),
    /// The implicit graph root; no edge is attached.
    Start,
    /// Blank `from_` at the top of a block: the begin row's own sources.
    Inherited(Vec<(Option<GroupId>, Condition)>),
}

pub struct FlowBuilder<'a> {
    flow: FlowContainer,
    arena: GroupArena,
    registry: &'a mut UuidRegistry,
    catalog: &'a dyn SheetCatalog,
    ctx: TemplateContext,
    row_groups: IndexMap<String, GroupId>,
    nodes_by_name: IndexMap<String, (GroupId, NodeId)>,
    /// Blocks that built no nodes, mapped to their incoming edge sources.
    /// Edges from such a block fall through to those sources, so the chain
    /// stays connected across a zero-iteration loop or an empty block.
    passthrough: IndexMap<GroupId, Vec<(Option<GroupId>, Condition)>>,
    scopes: Vec<Scope>,
    errors: Vec<CompilerError>,
    loop_depth: usize,
}

/// Compile one sheet into a node graph. Group and flow names mentioned by
/// rows are recorded into `registry` as a side effect; resolution happens
/// after every flow of the compilation unit has been built.
pub fn compile_flow(
    name: &str,
    source: &mut dyn RowSource,
    catalog: &dyn SheetCatalog,
    registry: &mut UuidRegistry,
) -> Result<FlowContainer, Vec<CompilerError>> {
    let mut builder = FlowBuilder {
        flow: FlowContainer::new(name),
        arena: GroupArena::new(),
        registry,
        catalog,
        ctx: TemplateContext::new(),
        row_groups: IndexMap::new(),
        nodes_by_name: IndexMap::new(),
        passthrough: IndexMap::new(),
        scopes: vec![Scope::default()],
        errors: Vec::new(),
        loop_depth: 0,
    };
    builder.process(source, StopAt::EndOfStream);
    if builder.errors.is_empty() {
        Ok(builder.flow)
    } else {
        Err(builder.errors)
    }
}

impl<'a> FlowBuilder<'a> {
    fn process(&mut self, source: &mut dyn RowSource, stop: StopAt) -> StopAt {
        while let Some((raw, row_number)) = source.next_row() {
            if raw.values().all(|v| v.trim().is_empty()) {
                continue;
            }
            let loc = RowLocation {
                sheet: source.sheet_name().to_string(),
                row: row_number,
            };
            let row = match self.parse(&raw) {
                Ok(row) => row,
                Err(errs) => {
                    self.errors.extend(errs.into_iter().map(|e| e.at(&loc)));
                    continue;
                }
            };
            match row.kind {
                RowKind::EndBlock => {
                    if stop == StopAt::EndBlock {
                        return StopAt::EndBlock;
                    }
                    self.errors.push(
                        CompilerError::build("B003", "end_block without a begin_block").at(&loc),
                    );
                }
                RowKind::EndFor => {
                    if stop == StopAt::EndFor {
                        return StopAt::EndFor;
                    }
                    self.errors.push(
                        CompilerError::build("B003", "end_for without a begin_for").at(&loc),
                    );
                }
                RowKind::BeginBlock => self.begin_block(&row, source, &loc),
                RowKind::BeginFor => self.begin_for(&row, source, &loc),
                RowKind::InsertAsBlock => self.insert_block(&row, &loc),
                RowKind::GoTo => self.go_to(&row, &loc),
                RowKind::HardExit => self.attach_edges(&row, ExitTarget::Seal, &loc),
                RowKind::LooseExit => self.attach_edges(&row, ExitTarget::Loose, &loc),
                _ => self.content_row(&row, &loc),
            }
        }
        StopAt::EndOfStream
    }

    fn parse(&self, raw: &RawRow) -> Result<FlowRow, Vec<CompilerError>> {
        let mut cells = IndexMap::new();
        let mut errors = Vec::new();
        for (header, text) in raw {
            match parse_cell(text, &VarExpander, &self.ctx) {
                Ok(value) => {
                    cells.insert(header.clone(), value);
                }
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        parse_flow_row(&cells)
    }

    // =========================================================================
    // EDGE RESOLUTION
    // =========================================================================

    fn resolve_from(&self, from_: &str) -> Result<Resolved, CompilerError> {
        let from_ = from_.trim();
        if from_ == "start" {
            return Ok(Resolved::Start);
        }
        if from_.is_empty() {
            // Most recently completed group, innermost scope first. Groups
            // without nodes cannot be connected from and are skipped.
            for scope in self.scopes.iter().rev() {
                for gid in scope.entries.iter().rev().copied() {
                    if self.arena.entry(gid).is_some() {
                        return Ok(Resolved::Group(gid));
                    }
                    if let Some(sources) = self.passthrough.get(&gid) {
                        return Ok(Resolved::Inherited(sources.clone()));
                    }
                }
                if !scope.inherited.is_empty() {
                    return Ok(Resolved::Inherited(scope.inherited.clone()));
                }
            }
            return Err(CompilerError::build(
                "B002",
                "no previous row to connect from; use an explicit 'from' or 'start'",
            ));
        }
        match self.row_groups.get(from_) {
            Some(gid) => match self.passthrough.get(gid) {
                Some(sources) => Ok(Resolved::Inherited(sources.clone())),
                None => Ok(Resolved::Group(*gid)),
            },
            None => Err(CompilerError::build(
                "B001",
                format!("'from' references unknown row_id '{}'", from_),
            )),
        }
    }

    fn attach_group(
        &mut self,
        src: GroupId,
        cond: &Condition,
        target: ExitTarget,
    ) -> Result<(), CompilerError> {
        match self.arena.get(src) {
            NodeGroup::Unit { node } => self.flow.attach_exit(*node, cond, target),
            NodeGroup::Block { .. } => {
                if !cond.is_default() {
                    return Err(CompilerError::build(
                        "B006",
                        "a conditional edge cannot originate from a block; \
                         name the row inside the block instead",
                    ));
                }
                self.arena.apply_loose(src, &mut self.flow, target);
                Ok(())
            }
        }
    }

    fn attach_edges(&mut self, row: &FlowRow, target: ExitTarget, loc: &RowLocation) {
        for edge in &row.edges {
            match self.resolve_from(&edge.from_) {
                Ok(Resolved::Group(src)) => {
                    if let Err(e) = self.attach_group(src, &edge.condition, target) {
                        self.errors.push(e.at(loc));
                    }
                }
                Ok(Resolved::Inherited(sources)) => {
                    // The row's own condition wins over the one the begin
                    // row stated, when both are present.
                    for (src, begin_cond) in sources {
                        let Some(src) = src else { continue };
                        let cond = if edge.condition.is_default() {
                            &begin_cond
                        } else {
                            &edge.condition
                        };
                        if let Err(e) = self.attach_group(src, cond, target) {
                            self.errors.push(e.at(loc));
                        }
                    }
                }
                Ok(Resolved::Start) => {}
                Err(e) => self.errors.push(e.at(loc)),
            }
        }
    }

    /// Resolve a begin row's edges now; rows at the top of the new scope
    /// inherit them through blank `from_`.
    fn collect_inherited(
        &mut self,
        row: &FlowRow,
        loc: &RowLocation,
    ) -> Vec<(Option<GroupId>, Condition)> {
        let mut inherited = Vec::new();
        for edge in &row.edges {
            match self.resolve_from(&edge.from_) {
                Ok(Resolved::Group(src)) => inherited.push((Some(src), edge.condition.clone())),
                Ok(Resolved::Start) => inherited.push((None, edge.condition.clone())),
                Ok(Resolved::Inherited(sources)) => inherited.extend(sources),
                Err(e) => self.errors.push(e.at(loc)),
            }
        }
        inherited
    }

    /// Complete a group: make it the most recent of the current scope and
    /// map its row id.
    fn register_group(&mut self, gid: GroupId, row_id: &str, loc: &RowLocation) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.entries.push(gid);
        }
        if !row_id.is_empty() {
            self.map_row_id(row_id, gid, loc);
        }
    }

    fn map_row_id(&mut self, row_id: &str, gid: GroupId, loc: &RowLocation) {
        // Loop replays legitimately redefine a row id once per iteration;
        // later references resolve to the latest replay.
        if self.loop_depth == 0 && self.row_groups.contains_key(row_id) {
            self.errors.push(
                CompilerError::build("B007", format!("duplicate row_id '{}'", row_id)).at(loc),
            );
            return;
        }
        self.row_groups.insert(row_id.to_string(), gid);
    }

    // =========================================================================
    // ROW DISPATCH
    // =========================================================================

    fn content_row(&mut self, row: &FlowRow, loc: &RowLocation) {
        if !row.node_name.is_empty()
            && let Some(&(gid, node)) = self.nodes_by_name.get(&row.node_name)
        {
            self.merge_row(row, gid, node, loc);
            return;
        }
        let Some(node_id) = self.make_node(row, loc) else {
            return;
        };
        let gid = self.arena.new_unit(node_id);
        self.attach_edges(row, ExitTarget::Connect(node_id), loc);
        self.register_group(gid, &row.row_id, loc);
        if !row.node_name.is_empty() {
            self.nodes_by_name.insert(row.node_name.clone(), (gid, node_id));
        }
    }

    /// A row naming an already-built node appends its action to that node
    /// instead of creating a new one. Only the exact shape "one
    /// unconditional edge from that same node" qualifies.
    fn merge_row(&mut self, row: &FlowRow, gid: GroupId, node: NodeId, loc: &RowLocation) {
        let from_matches = row.edges.len() == 1
            && row.edges[0].condition.is_default()
            && matches!(self.resolve_from(&row.edges[0].from_), Ok(Resolved::Group(g)) if g == gid);
        if !from_matches {
            self.errors.push(
                CompilerError::build(
                    "B006",
                    format!(
                        "cannot merge into node '{}': a merging row needs exactly one \
                         unconditional edge from that node",
                        row.node_name
                    ),
                )
                .at(loc),
            );
            return;
        }
        match self.make_action(row, loc) {
            Some(action) => {
                if let Err(e) = self.flow.push_action(node, action) {
                    self.errors.push(e.at(loc));
                }
            }
            None => {
                self.errors.push(
                    CompilerError::build(
                        "B006",
                        format!(
                            "cannot merge a '{}' row into node '{}': only action rows merge",
                            row.kind.as_str(),
                            row.node_name
                        ),
                    )
                    .at(loc),
                );
                return;
            }
        }
        // The merged node becomes the chain position again.
        if let Some(scope) = self.scopes.last_mut() {
            scope.entries.push(gid);
        }
        if !row.row_id.is_empty() {
            self.map_row_id(&row.row_id, gid, loc);
        }
    }

    fn go_to(&mut self, row: &FlowRow, loc: &RowLocation) {
        let target = row.main_text.trim();
        let Some(&gid) = self.row_groups.get(target) else {
            self.errors.push(
                CompilerError::build(
                    "B001",
                    format!("go_to references unknown row_id '{}'", target),
                )
                .at(loc),
            );
            return;
        };
        let Some(entry) = self.arena.entry(gid) else {
            self.errors.push(
                CompilerError::build(
                    "B001",
                    format!("go_to target '{}' produced no node", target),
                )
                .at(loc),
            );
            return;
        };
        self.attach_edges(row, ExitTarget::Connect(entry), loc);
    }

    // =========================================================================
    // BLOCKS AND LOOPS
    // =========================================================================

    /// Close a block group: record its pass-through sources when it built
    /// no nodes, then register it like any completed group.
    fn finish_block(
        &mut self,
        entries: Vec<GroupId>,
        inherited: Vec<(Option<GroupId>, Condition)>,
        row_id: &str,
        loc: &RowLocation,
    ) {
        let gid = self.arena.new_block(entries);
        if self.arena.entry(gid).is_none() && !inherited.is_empty() {
            self.passthrough.insert(gid, inherited);
        }
        self.register_group(gid, row_id, loc);
    }

    fn begin_block(&mut self, row: &FlowRow, source: &mut dyn RowSource, loc: &RowLocation) {
        let inherited = self.collect_inherited(row, loc);
        self.scopes.push(Scope {
            entries: Vec::new(),
            inherited,
        });
        let end = self.process(source, StopAt::EndBlock);
        let scope = self.scopes.pop().unwrap_or_default();
        if end != StopAt::EndBlock {
            self.errors
                .push(CompilerError::build("B004", "begin_block is never closed").at(loc));
        }
        self.finish_block(scope.entries, scope.inherited, &row.row_id, loc);
    }

    fn begin_for(&mut self, row: &FlowRow, source: &mut dyn RowSource, loc: &RowLocation) {
        let inherited = self.collect_inherited(row, loc);
        let values = &row.main_list;
        if values.is_empty() {
            // Zero iterations: consume the body without building anything.
            // The empty block passes the incoming edges through.
            self.skip_loop_body(source, loc);
            self.finish_block(Vec::new(), inherited, &row.row_id, loc);
            return;
        }

        self.scopes.push(Scope {
            entries: Vec::new(),
            inherited,
        });
        self.loop_depth += 1;
        let mark = source.bookmark();
        let named_before = self.nodes_by_name.clone();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                source.rewind(mark);
                // Names defined in the body rebind per replay, like row ids.
                self.nodes_by_name = named_before.clone();
            }
            let saved_loop = (!row.loop_var.is_empty())
                .then(|| self.ctx.bind(&row.loop_var, value.clone()));
            let saved_index = (!row.index_var.is_empty())
                .then(|| self.ctx.bind(&row.index_var, i.to_string()));

            self.scopes.push(Scope::default());
            let end = self.process(source, StopAt::EndFor);
            let iteration = self.scopes.pop().unwrap_or_default();

            if let Some(previous) = saved_loop {
                self.ctx.restore(&row.loop_var, previous);
            }
            if let Some(previous) = saved_index {
                self.ctx.restore(&row.index_var, previous);
            }

            let child = self.arena.new_block(iteration.entries);
            self.register_group(child, "", loc);
            if end != StopAt::EndFor {
                self.errors
                    .push(CompilerError::build("B004", "begin_for is never closed").at(loc));
                break;
            }
        }
        self.loop_depth -= 1;
        let scope = self.scopes.pop().unwrap_or_default();
        self.finish_block(scope.entries, scope.inherited, &row.row_id, loc);
    }

    fn skip_loop_body(&mut self, source: &mut dyn RowSource, loc: &RowLocation) {
        let mut depth = 0usize;
        while let Some((raw, _)) = source.next_row() {
            match raw.get("type").map(String::as_str).unwrap_or("").trim() {
                "begin_for" => depth += 1,
                "end_for" if depth == 0 => return,
                "end_for" => depth -= 1,
                _ => {}
            }
        }
        self.errors
            .push(CompilerError::build("B004", "begin_for is never closed").at(loc));
    }

    /// Splice another sheet in as a block: its rows compile in their own
    /// scope, and the result joins the current scope like an inline block.
    fn insert_block(&mut self, row: &FlowRow, loc: &RowLocation) {
        let sheet = if row.data_sheet.is_empty() {
            row.main_text.trim()
        } else {
            row.data_sheet.trim()
        };
        let Some(mut sub) = self.catalog.open(sheet) else {
            self.errors.push(
                CompilerError::build("B005", format!("unknown sheet '{}'", sheet)).at(loc),
            );
            return;
        };
        let inherited = self.collect_inherited(row, loc);
        self.scopes.push(Scope {
            entries: Vec::new(),
            inherited,
        });
        self.process(&mut sub, StopAt::EndOfStream);
        let scope = self.scopes.pop().unwrap_or_default();
        self.finish_block(scope.entries, scope.inherited, &row.row_id, loc);
    }

    // =========================================================================
    // NODE CONSTRUCTION
    // =========================================================================

    fn make_action(&mut self, row: &FlowRow, loc: &RowLocation) -> Option<Action> {
        let action = match row.kind {
            RowKind::SendMessage => Action::SendMsg {
                uuid: new_uuid(),
                text: row.main_text.clone(),
                quick_replies: row.choices.clone(),
            },
            RowKind::SaveValue => Action::SetContactField {
                uuid: new_uuid(),
                field: FieldRef {
                    key: field_key(&row.save_name),
                    name: row.save_name.clone(),
                },
                value: row.main_text.clone(),
            },
            RowKind::SaveFlowResult => Action::SetRunResult {
                uuid: new_uuid(),
                name: row.save_name.clone(),
                value: row.main_text.clone(),
                category: String::new(),
            },
            RowKind::AddToGroup => {
                self.record_group_name(row, loc);
                Action::AddContactGroups {
                    uuid: new_uuid(),
                    groups: vec![NamedRef {
                        uuid: row.obj_id.clone(),
                        name: row.main_text.clone(),
                    }],
                }
            }
            RowKind::RemoveFromGroup => {
                self.record_group_name(row, loc);
                Action::RemoveContactGroups {
                    uuid: new_uuid(),
                    groups: vec![NamedRef {
                        uuid: row.obj_id.clone(),
                        name: row.main_text.clone(),
                    }],
                }
            }
            _ => return None,
        };
        Some(action)
    }

    fn make_node(&mut self, row: &FlowRow, loc: &RowLocation) -> Option<NodeId> {
        if let Some(action) = self.make_action(row, loc) {
            return Some(self.flow.add_basic(vec![action]));
        }
        let node = match row.kind {
            RowKind::NoOp => return Some(self.flow.add_basic(vec![])),
            RowKind::SplitByValue => {
                let operand = if row.main_text.trim().is_empty() {
                    DEFAULT_OPERAND.to_string()
                } else {
                    row.main_text.clone()
                };
                let mut router = SwitchRouter::new(operand);
                router.result_name = non_empty(&row.save_name);
                FlowNode::Switch(SwitchNode {
                    uuid: new_uuid(),
                    actions: vec![],
                    router,
                })
            }
            RowKind::WaitForResponse => {
                let mut router = SwitchRouter::new(DEFAULT_OPERAND);
                router.wait = true;
                router.result_name = non_empty(&row.save_name);
                router.wait_timeout = self.parse_timeout(&row.no_response, loc);
                if router.wait_timeout.is_some() {
                    router.no_response_category_mut();
                }
                FlowNode::Switch(SwitchNode {
                    uuid: new_uuid(),
                    actions: vec![],
                    router,
                })
            }
            RowKind::SplitRandom => {
                let mut router = RandomRouter::new();
                router.result_name = non_empty(&row.save_name);
                FlowNode::Random(RandomNode {
                    uuid: new_uuid(),
                    actions: vec![],
                    router,
                })
            }
            RowKind::StartNewFlow => {
                if let Err(e) = self
                    .registry
                    .record_flow(&row.main_text, non_empty(&row.obj_id).as_deref())
                {
                    self.errors.push(CompilerError::from(e).at(loc));
                }
                FlowNode::Gated(GatedNode::enter_flow(Action::EnterFlow {
                    uuid: new_uuid(),
                    flow: NamedRef {
                        uuid: row.obj_id.clone(),
                        name: row.main_text.clone(),
                    },
                }))
            }
            RowKind::CallWebhook => {
                let result_name = if row.save_name.is_empty() {
                    "result".to_string()
                } else {
                    field_key(&row.save_name)
                };
                let method = if row.webhook.method.is_empty() {
                    "GET".to_string()
                } else {
                    row.webhook.method.to_uppercase()
                };
                let action = Action::CallWebhook {
                    uuid: new_uuid(),
                    method,
                    url: row.main_text.clone(),
                    headers: row.webhook.headers.iter().cloned().collect(),
                    body: row.webhook.body.clone(),
                    result_name: result_name.clone(),
                };
                FlowNode::Gated(GatedNode::webhook(action, &result_name))
            }
            RowKind::TransferAirtime => {
                let result_name = if row.save_name.is_empty() {
                    "airtime".to_string()
                } else {
                    field_key(&row.save_name)
                };
                let mut amounts = IndexMap::new();
                amounts.insert("USD".to_string(), row.main_text.clone());
                let action = Action::TransferAirtime {
                    uuid: new_uuid(),
                    amounts,
                    result_name: result_name.clone(),
                };
                FlowNode::Gated(GatedNode::airtime(action, &result_name))
            }
            _ => return None,
        };
        Some(self.flow.add(node))
    }

    fn record_group_name(&mut self, row: &FlowRow, loc: &RowLocation) {
        if let Err(e) = self
            .registry
            .record_group(&row.main_text, non_empty(&row.obj_id).as_deref())
        {
            self.errors.push(CompilerError::from(e).at(loc));
        }
    }

    fn parse_timeout(&mut self, text: &str, loc: &RowLocation) -> Option<u64> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        match text.parse::<u64>() {
            Ok(seconds) if seconds > 0 => Some(seconds),
            _ => {
                tracing::warn!(timeout = %text, location = %loc, "ignoring invalid no_response timeout");
                None
            }
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Contact field key derived from the display name.
fn field_key(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}
