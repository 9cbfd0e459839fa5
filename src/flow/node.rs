//! The node model: a closed set of node shapes and the exit-attachment
//! protocol that connects them.
//!
//! Nodes live in a `FlowContainer` arena and reference each other by index;
//! uuids only matter at render time. Attaching an edge goes through a fixed
//! priority: default branch, gate keywords, no-response, then conditional
//! routing with lazy promotion of plain nodes to switches.

use crate::error::CompilerError;
use crate::flow::router::{
    DEFAULT_OPERAND, Exit, ExitTarget, NodeId, RandomRouter, RouterCase, RouterCategory,
    SwitchRouter, new_uuid,
};
use crate::flow::types::{
    Action, CaseDef, DEFAULT_EXPIRE_MINUTES, DEFAULT_FLOW_TYPE, DEFAULT_LANGUAGE, ExitDef, Flow,
    NodeDef, RouterDef, SPEC_VERSION, SwitchRouterDef, RandomRouterDef, TimeoutDef, WaitDef,
};

// =============================================================================
// NODE SHAPES
// =============================================================================

/// A node with actions and a single exit.
#[derive(Debug, Clone)]
pub struct BasicNode {
    pub uuid: String,
    pub actions: Vec<Action>,
    pub exit: Exit,
}

#[derive(Debug, Clone)]
pub struct SwitchNode {
    pub uuid: String,
    pub actions: Vec<Action>,
    pub router: SwitchRouter,
}

#[derive(Debug, Clone)]
pub struct RandomNode {
    pub uuid: String,
    pub actions: Vec<Action>,
    pub router: RandomRouter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    EnterFlow,
    Webhook,
    Airtime,
}

/// An action whose outcome is routed by a fixed two-way switch: the action's
/// own result decides between a success gate and a failure gate. The failure
/// gate doubles as the default category.
#[derive(Debug, Clone)]
pub struct GatedNode {
    pub uuid: String,
    pub action: Action,
    pub kind: GateKind,
    pub operand: String,
    pub success: RouterCategory,
    pub failure: RouterCategory,
}

impl GatedNode {
    pub fn enter_flow(action: Action) -> Self {
        GatedNode {
            uuid: new_uuid(),
            action,
            kind: GateKind::EnterFlow,
            operand: "@child.run.status".into(),
            success: RouterCategory::new("Complete"),
            failure: RouterCategory::new("Expired"),
        }
    }

    pub fn webhook(action: Action, result_name: &str) -> Self {
        GatedNode {
            uuid: new_uuid(),
            action,
            kind: GateKind::Webhook,
            operand: format!("@results.{}.category", result_name),
            success: RouterCategory::new("Success"),
            failure: RouterCategory::new("Failure"),
        }
    }

    pub fn airtime(action: Action, result_name: &str) -> Self {
        GatedNode {
            uuid: new_uuid(),
            action,
            kind: GateKind::Airtime,
            operand: format!("@results.{}", result_name),
            success: RouterCategory::new("Success"),
            failure: RouterCategory::new("Failure"),
        }
    }

    fn cases(&self) -> Vec<CaseDef> {
        let case = |args: &[&str], category: &RouterCategory| CaseDef {
            uuid: new_uuid(),
            comparison_type: "has_only_text".into(),
            arguments: args.iter().map(|s| s.to_string()).collect(),
            category_uuid: category.uuid.clone(),
        };
        match self.kind {
            GateKind::EnterFlow => vec![
                case(&["completed"], &self.success),
                case(&["expired"], &self.failure),
            ],
            GateKind::Webhook | GateKind::Airtime => vec![case(&["Success"], &self.success)],
        }
    }
}

#[derive(Debug, Clone)]
pub enum FlowNode {
    Basic(BasicNode),
    Switch(SwitchNode),
    Random(RandomNode),
    Gated(GatedNode),
}

impl FlowNode {
    pub fn uuid(&self) -> &str {
        match self {
            FlowNode::Basic(n) => &n.uuid,
            FlowNode::Switch(n) => &n.uuid,
            FlowNode::Random(n) => &n.uuid,
            FlowNode::Gated(n) => &n.uuid,
        }
    }

    pub fn actions(&self) -> &[Action] {
        match self {
            FlowNode::Basic(n) => &n.actions,
            FlowNode::Switch(n) => &n.actions,
            FlowNode::Random(n) => &n.actions,
            FlowNode::Gated(n) => std::slice::from_ref(&n.action),
        }
    }

    fn loose_exits_mut(&mut self) -> Vec<&mut Exit> {
        match self {
            FlowNode::Basic(n) => {
                if n.exit.is_loose() {
                    vec![&mut n.exit]
                } else {
                    vec![]
                }
            }
            FlowNode::Switch(n) => n.router.loose_exits_mut(),
            FlowNode::Random(n) => n.router.loose_exits_mut(),
            FlowNode::Gated(n) => [&mut n.success.exit, &mut n.failure.exit]
                .into_iter()
                .filter(|e| e.is_loose())
                .collect(),
        }
    }
}

// =============================================================================
// GATE KEYWORDS
// =============================================================================

enum Gate {
    Success,
    Failure,
    NoResponse,
}

/// Reserved condition values that select a fixed branch instead of creating
/// a case. Matching is case-insensitive.
fn gate_keyword(value: &str) -> Option<Gate> {
    match value.trim().to_lowercase().as_str() {
        "completed" | "complete" | "success" => Some(Gate::Success),
        "expired" | "failure" => Some(Gate::Failure),
        "no response" | "no_response" => Some(Gate::NoResponse),
        _ => None,
    }
}

// =============================================================================
// CONTAINER
// =============================================================================

/// The flow under construction: an arena of nodes plus the flow-level
/// envelope fields.
#[derive(Debug, Clone)]
pub struct FlowContainer {
    pub uuid: String,
    pub name: String,
    pub language: String,
    pub flow_type: String,
    pub expire_after_minutes: u32,
    nodes: Vec<FlowNode>,
}

impl FlowContainer {
    pub fn new(name: impl Into<String>) -> Self {
        FlowContainer {
            uuid: new_uuid(),
            name: name.into(),
            language: DEFAULT_LANGUAGE.into(),
            flow_type: DEFAULT_FLOW_TYPE.into(),
            expire_after_minutes: DEFAULT_EXPIRE_MINUTES,
            nodes: vec![],
        }
    }

    pub fn add(&mut self, node: FlowNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn add_basic(&mut self, actions: Vec<Action>) -> NodeId {
        self.add(FlowNode::Basic(BasicNode {
            uuid: new_uuid(),
            actions,
            exit: Exit::dangling(),
        }))
    }

    pub fn node(&self, id: NodeId) -> &FlowNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut FlowNode {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &FlowNode)> {
        self.nodes.iter().enumerate()
    }

    /// Append an action to an existing node. Only single-exit action nodes
    /// accept more actions.
    pub fn push_action(&mut self, id: NodeId, action: Action) -> Result<(), CompilerError> {
        match &mut self.nodes[id] {
            FlowNode::Basic(n) => {
                n.actions.push(action);
                Ok(())
            }
            _ => Err(CompilerError::build(
                "B006",
                "cannot append an action to a routing node",
            )),
        }
    }

    /// Point every loose exit of `from` at `dest`.
    pub fn connect_loose(&mut self, from: NodeId, dest: NodeId) {
        self.apply_loose(from, ExitTarget::Connect(dest));
    }

    /// Apply a target to every loose exit of `from`. Sealed exits are
    /// already excluded from the loose set.
    pub fn apply_loose(&mut self, from: NodeId, target: ExitTarget) {
        for exit in self.nodes[from].loose_exits_mut() {
            exit.apply(target);
        }
    }

    // =========================================================================
    // EXIT ATTACHMENT
    // =========================================================================

    /// Attach one outgoing edge of `id` under `cond`. The checks run in a
    /// fixed order; the first that claims the condition wins.
    pub fn attach_exit(
        &mut self,
        id: NodeId,
        cond: &crate::row::Condition,
        target: ExitTarget,
    ) -> Result<(), CompilerError> {
        // 1. Unconditional edge: the default branch. Random routers have no
        //    default, every edge is a bucket.
        if cond.is_default() && !matches!(self.nodes[id], FlowNode::Random(_)) {
            match &mut self.nodes[id] {
                FlowNode::Basic(n) => {
                    if n.exit.destination.is_some() {
                        tracing::warn!(node = %n.uuid, "overwriting connected default exit");
                    }
                    n.exit.apply(target);
                }
                FlowNode::Switch(n) => n.router.update_default(target, None),
                FlowNode::Gated(n) => {
                    if n.failure.exit.destination.is_some() {
                        tracing::warn!(node = %n.uuid, "overwriting connected failure branch");
                    }
                    n.failure.exit.apply(target);
                }
                FlowNode::Random(_) => unreachable!(),
            }
            return Ok(());
        }

        // 2 + 3. Gate keywords on gated nodes. Anything else coming out of a
        //    gated node is an error, its branches are fixed.
        if let FlowNode::Gated(n) = &mut self.nodes[id] {
            return match gate_keyword(&cond.value) {
                Some(Gate::Success) => {
                    if n.success.exit.destination.is_some() {
                        tracing::warn!(node = %n.uuid, "overwriting connected success branch");
                    }
                    n.success.exit.apply(target);
                    Ok(())
                }
                Some(Gate::Failure) if !cond.is_default() => {
                    if n.failure.exit.destination.is_some() {
                        tracing::warn!(node = %n.uuid, "overwriting connected failure branch");
                    }
                    n.failure.exit.apply(target);
                    Ok(())
                }
                _ => Err(CompilerError::build(
                    "N001",
                    format!(
                        "condition '{}' is not a valid branch of this node; expected {}",
                        cond.value,
                        match n.kind {
                            GateKind::EnterFlow => "completed or expired",
                            GateKind::Webhook | GateKind::Airtime => "success or failure",
                        }
                    ),
                )),
            };
        }

        // 4. The reserved no-response branch of a waiting switch.
        if matches!(gate_keyword(&cond.value), Some(Gate::NoResponse)) {
            return match &mut self.nodes[id] {
                FlowNode::Switch(n) if n.router.wait => match n.router.no_response_category_mut() {
                    Some(cat) => {
                        if cat.exit.destination.is_some() {
                            tracing::warn!(category = %cat.name, "overwriting connected no-response branch");
                        }
                        cat.exit.apply(target);
                        Ok(())
                    }
                    None => Err(CompilerError::build(
                        "N002",
                        "'no response' requires a positive wait timeout on the source row",
                    )),
                },
                _ => Err(CompilerError::build(
                    "N002",
                    "'no response' is only valid from a wait_for_response row",
                )),
            };
        }

        // 5. Conditional branch: route through a switch, promoting if needed.
        match &mut self.nodes[id] {
            FlowNode::Basic(_) => {
                self.promote_to_switch(id, cond);
                let FlowNode::Switch(n) = &mut self.nodes[id] else {
                    unreachable!();
                };
                n.router.add_choice(cond, target);
            }
            FlowNode::Switch(n) => n.router.add_choice(cond, target),
            FlowNode::Random(n) => n.router.add_choice(cond, target),
            FlowNode::Gated(_) => unreachable!(),
        }
        Ok(())
    }

    /// Rebuild a basic node as a switch in place. The old exit survives as
    /// the default category's exit, so an already-attached default branch
    /// keeps its destination and uuid.
    fn promote_to_switch(&mut self, id: NodeId, cond: &crate::row::Condition) {
        let FlowNode::Basic(basic) = &self.nodes[id] else {
            return;
        };
        let operand = if cond.variable.is_empty() {
            DEFAULT_OPERAND.to_string()
        } else {
            cond.variable.clone()
        };
        let mut router = SwitchRouter::new(operand);
        router.categories[0].exit = basic.exit.clone();
        self.nodes[id] = FlowNode::Switch(SwitchNode {
            uuid: basic.uuid.clone(),
            actions: basic.actions.clone(),
            router,
        });
    }

    // =========================================================================
    // RENDER
    // =========================================================================

    /// Serialize into the interchange shape. Node indices become uuids;
    /// sealed and never-connected exits render with a null destination.
    pub fn render(&self, revision: u32) -> Result<Flow, Vec<CompilerError>> {
        let uuids: Vec<String> = self.nodes.iter().map(|n| n.uuid().to_string()).collect();
        let resolve = |exit: &Exit| -> ExitDef {
            ExitDef {
                uuid: exit.uuid.clone(),
                destination_uuid: exit.destination.map(|d| uuids[d].clone()),
            }
        };

        let mut errors = Vec::new();
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            nodes.push(match node {
                FlowNode::Basic(n) => NodeDef {
                    uuid: n.uuid.clone(),
                    actions: n.actions.clone(),
                    router: None,
                    exits: vec![resolve(&n.exit)],
                },
                FlowNode::Switch(n) => {
                    let r = &n.router;
                    let timeout = match (r.wait_timeout, r.no_response_category) {
                        (Some(seconds), Some(idx)) if seconds > 0 => Some(TimeoutDef {
                            seconds,
                            category_uuid: r.categories[idx].uuid.clone(),
                        }),
                        (Some(seconds), None) if seconds > 0 => {
                            errors.push(CompilerError::render(
                                "N002",
                                format!(
                                    "node '{}' has a wait timeout but no 'no response' branch",
                                    n.uuid
                                ),
                            ));
                            None
                        }
                        _ => None,
                    };
                    NodeDef {
                        uuid: n.uuid.clone(),
                        actions: n.actions.clone(),
                        router: Some(RouterDef::Switch(SwitchRouterDef {
                            result_name: r.result_name.clone(),
                            wait: r.wait.then(|| WaitDef::msg(timeout)),
                            operand: r.operand.clone(),
                            cases: r.cases.iter().map(RouterCase::render).collect(),
                            categories: r.categories.iter().map(RouterCategory::render).collect(),
                            default_category_uuid: r.default_category().uuid.clone(),
                        })),
                        exits: r.categories.iter().map(|c| resolve(&c.exit)).collect(),
                    }
                }
                FlowNode::Random(n) => NodeDef {
                    uuid: n.uuid.clone(),
                    actions: n.actions.clone(),
                    router: Some(RouterDef::Random(RandomRouterDef {
                        result_name: n.router.result_name.clone(),
                        categories: n.router.categories.iter().map(RouterCategory::render).collect(),
                    })),
                    exits: n.router.categories.iter().map(|c| resolve(&c.exit)).collect(),
                },
                FlowNode::Gated(n) => NodeDef {
                    uuid: n.uuid.clone(),
                    actions: vec![n.action.clone()],
                    router: Some(RouterDef::Switch(SwitchRouterDef {
                        result_name: None,
                        wait: None,
                        operand: n.operand.clone(),
                        cases: n.cases(),
                        categories: vec![n.success.render(), n.failure.render()],
                        default_category_uuid: n.failure.uuid.clone(),
                    })),
                    exits: vec![resolve(&n.success.exit), resolve(&n.failure.exit)],
                },
            });
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Flow {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            language: self.language.clone(),
            flow_type: self.flow_type.clone(),
            nodes,
            spec_version: SPEC_VERSION.into(),
            revision,
            expire_after_minutes: self.expire_after_minutes,
            metadata: serde_json::json!({}),
            localization: serde_json::json!({}),
        })
    }
}
