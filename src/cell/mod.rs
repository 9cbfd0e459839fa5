//! Cell micro-grammar: raw spreadsheet cell text → scalar / list / nested list.
//!
//! Two separator levels (`|` outer, `;` inner) and one escape character (`\`).
//! A cell wrapped in `{@ ... @}` is an opaque template: it is handed to the
//! expansion hook as a whole and never split. Ordinary cells are always
//! expanded first and split second.

use indexmap::IndexMap;

use crate::error::CompilerError;

pub const OUTER_SEP: char = '|';
pub const INNER_SEP: char = ';';
pub const ESCAPE: char = '\\';

pub const OPAQUE_OPEN: &str = "{@";
pub const OPAQUE_CLOSE: &str = "@}";

// =============================================================================
// CELL VALUES
// =============================================================================

/// A parsed cell: a scalar string or an ordered list of cell values.
/// No identity; copied by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Scalar(String),
    List(Vec<CellValue>),
}

impl CellValue {
    pub fn scalar(s: impl Into<String>) -> Self {
        CellValue::Scalar(s.into())
    }

    pub fn list(items: Vec<CellValue>) -> Self {
        CellValue::List(items)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Scalar(s) => s.is_empty(),
            CellValue::List(items) => items.is_empty(),
        }
    }

    /// Scalar view. A list flattens to its joined textual form.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Scalar(s) => s.clone(),
            CellValue::List(_) => self.to_cell_text(),
        }
    }

    /// List view. A scalar is a one-element list; an empty scalar is empty.
    pub fn iter_items(&self) -> Vec<CellValue> {
        match self {
            CellValue::Scalar(s) if s.is_empty() => vec![],
            CellValue::Scalar(_) => vec![self.clone()],
            CellValue::List(items) => items.clone(),
        }
    }

    /// Length under the list view, used by wildcard broadcast in the mapper.
    pub fn list_len(&self) -> usize {
        match self {
            CellValue::Scalar(s) if s.is_empty() => 0,
            CellValue::Scalar(_) => 1,
            CellValue::List(items) => items.len(),
        }
    }

    /// Render back into cell text: `|` at the top level, `;` below it.
    /// Scalars are escaped so the result re-parses to the same value.
    pub fn to_cell_text(&self) -> String {
        self.render(0)
    }

    fn render(&self, depth: usize) -> String {
        match self {
            CellValue::Scalar(s) => escape(s),
            CellValue::List(items) => {
                let sep = if depth == 0 { OUTER_SEP } else { INNER_SEP };
                let parts: Vec<String> = items.iter().map(|v| v.render(depth + 1)).collect();
                let mut joined = parts.join(&sep.to_string());
                // A one-element list needs a trailing separator to stay a list.
                if items.len() == 1 {
                    joined.push(sep);
                }
                joined
            }
        }
    }
}

// =============================================================================
// TEMPLATE EXPANSION HOOK
// =============================================================================

/// Variable bindings visible to template expansion. Loop replays mutate this
/// between iterations, which is why the builder re-parses raw rows per replay.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: IndexMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    /// Bind a variable, returning its previous value so callers can restore it.
    pub fn bind(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        self.vars.insert(name.to_string(), value.into())
    }

    pub fn unbind(&mut self, name: &str) {
        self.vars.shift_remove(name);
    }

    pub fn restore(&mut self, name: &str, previous: Option<String>) {
        match previous {
            Some(v) => {
                self.vars.insert(name.to_string(), v);
            }
            None => self.unbind(name),
        }
    }
}

/// The expansion capability consumed by the cell grammar. The core calls this
/// but does not implement templating itself beyond simple substitution.
pub trait TemplateExpander {
    /// Expand substitution markers in ordinary cell text. Runs before the
    /// text is split into lists.
    fn expand(&self, text: &str, ctx: &TemplateContext) -> Result<String, CompilerError>;

    /// Expand a whole-cell opaque template into a structured value. The
    /// result is returned as-is, without further splitting.
    fn expand_opaque(&self, text: &str, ctx: &TemplateContext)
    -> Result<CellValue, CompilerError>;
}

/// Identity expander for row sources that carry no templates.
pub struct NoExpansion;

impl TemplateExpander for NoExpansion {
    fn expand(&self, text: &str, _ctx: &TemplateContext) -> Result<String, CompilerError> {
        Ok(text.to_string())
    }

    fn expand_opaque(
        &self,
        text: &str,
        _ctx: &TemplateContext,
    ) -> Result<CellValue, CompilerError> {
        Ok(CellValue::scalar(text.trim()))
    }
}

/// Substitutes `{{name}}` markers from the context. Unknown names are left
/// verbatim so downstream tooling can still see them.
pub struct VarExpander;

impl TemplateExpander for VarExpander {
    fn expand(&self, text: &str, ctx: &TemplateContext) -> Result<String, CompilerError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let name = after[..end].trim();
                    match ctx.get(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push_str("{{");
                            out.push_str(&after[..end]);
                            out.push_str("}}");
                        }
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str("{{");
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    fn expand_opaque(
        &self,
        text: &str,
        ctx: &TemplateContext,
    ) -> Result<CellValue, CompilerError> {
        let expanded = self.expand(text.trim(), ctx)?;
        Ok(CellValue::scalar(expanded))
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Parse one cell's raw text into a `CellValue`.
pub fn parse_cell(
    raw: &str,
    expander: &dyn TemplateExpander,
    ctx: &TemplateContext,
) -> Result<CellValue, CompilerError> {
    let trimmed = raw.trim();

    if let Some(inner) = strip_opaque(trimmed)? {
        return expander.expand_opaque(inner, ctx);
    }

    let expanded = expander.expand(trimmed, ctx)?;
    split_levels(&expanded, &[OUTER_SEP, INNER_SEP])
        .map_err(|e| CompilerError::cell(&e.code, format!("{} (in cell '{}')", e.message, raw)))
}

/// Returns the inner text of an opaque-template cell, or None for ordinary
/// cells. Nested opaque delimiters are a fatal grammar error.
fn strip_opaque(text: &str) -> Result<Option<&str>, CompilerError> {
    if !(text.starts_with(OPAQUE_OPEN) && text.ends_with(OPAQUE_CLOSE) && text.len() >= 4) {
        return Ok(None);
    }
    let inner = &text[OPAQUE_OPEN.len()..text.len() - OPAQUE_CLOSE.len()];
    if inner.contains(OPAQUE_OPEN) {
        return Err(CompilerError::cell(
            "C002",
            format!("Nested opaque template delimiters in cell '{}'", text),
        ));
    }
    Ok(Some(inner))
}

fn split_levels(text: &str, seps: &[char]) -> Result<CellValue, CompilerError> {
    let Some(&sep) = seps.first() else {
        return Ok(CellValue::Scalar(unescape(text)?));
    };

    let (mut tokens, found_sep) = tokenize(text, sep)?;
    if !found_sep {
        return split_levels(text, &seps[1..]);
    }

    // A single trailing separator forces list interpretation without adding
    // an empty element: "a|" parses as ["a"].
    if tokens.len() > 1 && tokens.last().is_some_and(|t| t.is_empty()) {
        tokens.pop();
    }

    let items = tokens
        .iter()
        .map(|t| split_levels(t, &seps[1..]))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CellValue::List(items))
}

/// Split on `sep`, honoring the escape character. Escape sequences are kept
/// intact in the tokens; unescaping happens only at the scalar leaves.
fn tokenize(text: &str, sep: char) -> Result<(Vec<String>, bool), CompilerError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut found = false;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            let Some(next) = chars.next() else {
                return Err(CompilerError::cell(
                    "C001",
                    "Malformed escape at end of cell".to_string(),
                ));
            };
            current.push(ESCAPE);
            current.push(next);
        } else if c == sep {
            found = true;
            tokens.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    tokens.push(current);
    Ok((tokens, found))
}

// =============================================================================
// ESCAPING
// =============================================================================

fn is_special(c: char) -> bool {
    c == OUTER_SEP || c == INNER_SEP || c == ESCAPE
}

/// Escape separators and the escape character itself.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_special(c) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Inverse of [`escape`]. A lone escape at end-of-string is a fatal error.
pub fn unescape(text: &str) -> Result<String, CompilerError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            match chars.next() {
                Some(next) => out.push(next),
                None => {
                    return Err(CompilerError::cell(
                        "C001",
                        "Malformed escape at end of cell".to_string(),
                    ));
                }
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}
