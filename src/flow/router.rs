//! Router domain model: categories, cases, and their update protocol.
//!
//! Arity mismatches and re-stated defaults warn and continue; everything
//! else is checked when the owning node renders.

use uuid::Uuid;

use crate::flow::types::{CaseDef, CategoryDef};
use crate::row::Condition;

pub type NodeId = usize;

pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// EXITS
// =============================================================================

/// An internal exit. `sealed` marks a hard exit: it renders with no
/// destination and is never auto-connected when loose exits are joined.
#[derive(Debug, Clone)]
pub struct Exit {
    pub uuid: String,
    pub destination: Option<NodeId>,
    pub sealed: bool,
}

impl Exit {
    pub fn dangling() -> Self {
        Exit {
            uuid: new_uuid(),
            destination: None,
            sealed: false,
        }
    }

    pub fn is_loose(&self) -> bool {
        self.destination.is_none() && !self.sealed
    }
}

/// Where an attached edge should point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTarget {
    Connect(NodeId),
    /// Leave the exit dangling; it stays loose and joins later.
    Loose,
    /// Leave the exit dangling and seal it against later joins.
    Seal,
}

impl Exit {
    pub fn apply(&mut self, target: ExitTarget) {
        match target {
            ExitTarget::Connect(dest) => self.destination = Some(dest),
            ExitTarget::Loose => {}
            ExitTarget::Seal => {
                self.destination = None;
                self.sealed = true;
            }
        }
    }
}

// =============================================================================
// CATEGORIES AND CASES
// =============================================================================

/// A named router branch owning exactly one exit. `explicit` flips once a
/// caller supplies a name or destination; overwriting an explicit default
/// warns rather than failing.
#[derive(Debug, Clone)]
pub struct RouterCategory {
    pub uuid: String,
    pub name: String,
    pub exit: Exit,
    pub explicit: bool,
}

impl RouterCategory {
    pub fn new(name: impl Into<String>) -> Self {
        RouterCategory {
            uuid: new_uuid(),
            name: name.into(),
            exit: Exit::dangling(),
            explicit: false,
        }
    }

    pub fn render(&self) -> CategoryDef {
        CategoryDef {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            exit_uuid: self.exit.uuid.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterCase {
    pub uuid: String,
    pub comparison_type: String,
    pub arguments: Vec<String>,
    pub category_uuid: String,
}

impl RouterCase {
    pub fn render(&self) -> CaseDef {
        CaseDef {
            uuid: self.uuid.clone(),
            comparison_type: self.comparison_type.clone(),
            arguments: self.arguments.clone(),
            category_uuid: self.category_uuid.clone(),
        }
    }
}

/// Expected argument count per comparison type. Unknown types return None
/// and are warned about, not rejected.
pub fn comparison_arity(comparison_type: &str) -> Option<usize> {
    match comparison_type {
        "has_text" | "has_number" | "has_email" | "has_phone" | "has_date" | "has_time" => Some(0),
        "has_any_word" | "has_all_words" | "has_phrase" | "has_only_phrase" | "has_only_text"
        | "has_beginning" | "has_pattern" | "has_number_eq" | "has_number_lt"
        | "has_number_lte" | "has_number_gt" | "has_number_gte" | "has_date_eq"
        | "has_date_lt" | "has_date_gt" => Some(1),
        "has_number_between" | "has_group" => Some(2),
        _ => None,
    }
}

pub const DEFAULT_COMPARISON: &str = "has_any_word";
pub const DEFAULT_OPERAND: &str = "@input.text";

/// Turn a condition into its case shape. Two-argument comparisons split the
/// single condition value on whitespace.
pub fn condition_case_shape(cond: &Condition) -> (String, Vec<String>) {
    let comparison = if cond.type_.is_empty() {
        DEFAULT_COMPARISON.to_string()
    } else {
        cond.type_.clone()
    };
    let arity = comparison_arity(&comparison);
    let arguments: Vec<String> = match arity {
        Some(0) => vec![],
        Some(2) => cond.value.split_whitespace().map(String::from).collect(),
        _ => vec![cond.value.clone()],
    };
    if let Some(expected) = arity
        && arguments.len() != expected
    {
        tracing::warn!(
            comparison = %comparison,
            expected,
            got = arguments.len(),
            "comparison argument count mismatch"
        );
    }
    if arity.is_none() {
        tracing::warn!(comparison = %comparison, "unknown comparison type");
    }
    (comparison, arguments)
}

/// Deterministic category name for a condition without one: the condition
/// value itself, suffixed on collision.
fn generate_category_name(base: &str, taken: &[String]) -> String {
    let base = if base.trim().is_empty() {
        "Other".to_string()
    } else {
        base.trim().to_string()
    };
    if !taken.iter().any(|t| t == &base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !taken.iter().any(|t| t == &candidate) {
            return candidate;
        }
        n += 1;
    }
}

// =============================================================================
// SWITCH ROUTER
// =============================================================================

#[derive(Debug, Clone)]
pub struct SwitchRouter {
    pub operand: String,
    pub cases: Vec<RouterCase>,
    pub categories: Vec<RouterCategory>,
    /// Index into `categories`.
    pub default_category: usize,
    /// Index into `categories`; only with a positive wait timeout.
    pub no_response_category: Option<usize>,
    pub wait: bool,
    pub wait_timeout: Option<u64>,
    pub result_name: Option<String>,
}

impl SwitchRouter {
    /// New router with its implicit default category.
    pub fn new(operand: impl Into<String>) -> Self {
        SwitchRouter {
            operand: operand.into(),
            cases: vec![],
            categories: vec![RouterCategory::new("Other")],
            default_category: 0,
            no_response_category: None,
            wait: false,
            wait_timeout: None,
            result_name: None,
        }
    }

    pub fn default_category(&self) -> &RouterCategory {
        &self.categories[self.default_category]
    }

    /// Update the default branch. Lazily promotes the implicit default to
    /// explicit; re-stating an already-explicit default warns.
    pub fn update_default(&mut self, target: ExitTarget, name: Option<&str>) {
        let cat = &mut self.categories[self.default_category];
        if cat.explicit && (cat.exit.destination.is_some() || name.is_some()) {
            tracing::warn!(category = %cat.name, "overwriting explicit default category");
        }
        if let Some(name) = name {
            cat.name = name.to_string();
        }
        cat.exit.apply(target);
        cat.explicit = true;
    }

    /// The reserved no-response category, created on first use. Only legal
    /// when the wait timeout is a positive number.
    pub fn no_response_category_mut(&mut self) -> Option<&mut RouterCategory> {
        if !matches!(self.wait_timeout, Some(t) if t > 0) {
            return None;
        }
        let idx = match self.no_response_category {
            Some(idx) => idx,
            None => {
                let mut cat = RouterCategory::new("No Response");
                cat.explicit = true;
                self.categories.push(cat);
                let idx = self.categories.len() - 1;
                self.no_response_category = Some(idx);
                idx
            }
        };
        Some(&mut self.categories[idx])
    }

    /// Attach a conditional branch. A case with identical comparison type
    /// and arguments is reused: only its category's destination is updated,
    /// never the category name.
    pub fn add_choice(&mut self, cond: &Condition, target: ExitTarget) {
        let (comparison, arguments) = condition_case_shape(cond);

        if let Some(case) = self
            .cases
            .iter()
            .find(|c| c.comparison_type == comparison && c.arguments == arguments)
        {
            let category_uuid = case.category_uuid.clone();
            if let Some(cat) = self.categories.iter_mut().find(|c| c.uuid == category_uuid) {
                cat.exit.apply(target);
            }
            return;
        }

        let taken: Vec<String> = self.categories.iter().map(|c| c.name.clone()).collect();
        let name = if cond.name.is_empty() {
            generate_category_name(&cond.value, &taken)
        } else {
            cond.name.clone()
        };
        let mut cat = RouterCategory::new(name);
        cat.explicit = true;
        cat.exit.apply(target);
        let category_uuid = cat.uuid.clone();
        self.categories.push(cat);
        self.cases.push(RouterCase {
            uuid: new_uuid(),
            comparison_type: comparison,
            arguments,
            category_uuid,
        });
    }

    pub fn loose_exits_mut(&mut self) -> Vec<&mut Exit> {
        self.categories
            .iter_mut()
            .map(|c| &mut c.exit)
            .filter(|e| e.is_loose())
            .collect()
    }
}

// =============================================================================
// RANDOM ROUTER
// =============================================================================

#[derive(Debug, Clone)]
pub struct RandomRouter {
    pub categories: Vec<RouterCategory>,
    pub result_name: Option<String>,
}

impl RandomRouter {
    pub fn new() -> Self {
        RandomRouter {
            categories: vec![],
            result_name: None,
        }
    }

    /// Random routers carry no cases: each distinct condition value is its
    /// own category. Re-stating a value updates that category's destination.
    pub fn add_choice(&mut self, cond: &Condition, target: ExitTarget) {
        let name = if !cond.name.is_empty() {
            cond.name.clone()
        } else if !cond.value.is_empty() {
            cond.value.clone()
        } else {
            format!("Bucket {}", self.categories.len() + 1)
        };

        if let Some(cat) = self.categories.iter_mut().find(|c| c.name == name) {
            cat.exit.apply(target);
            return;
        }
        let mut cat = RouterCategory::new(name);
        cat.explicit = true;
        cat.exit.apply(target);
        self.categories.push(cat);
    }

    pub fn loose_exits_mut(&mut self) -> Vec<&mut Exit> {
        self.categories
            .iter_mut()
            .map(|c| &mut c.exit)
            .filter(|e| e.is_loose())
            .collect()
    }
}

impl Default for RandomRouter {
    fn default() -> Self {
        Self::new()
    }
}
