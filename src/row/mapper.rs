//! Row mapper: flat `{header: CellValue}` dict ⇄ schema-typed record.
//!
//! `parse_row` maps parsed cells onto a record through the header path
//! grammar, expanding `*` wildcard groups. `unparse_row` is the structural
//! inverse: a depth-first walk that omits defaults and supports collapse
//! points and exclusion lists.

use indexmap::IndexMap;

use crate::cell::CellValue;
use crate::error::CompilerError;
use crate::row::path::{PathSeg, parse_path, render_path};
use crate::row::schema::{FieldKind, RecordValue, Schema};

// =============================================================================
// PARSE DIRECTION
// =============================================================================

/// Map a flat dict of parsed cells onto a record of the given schema.
/// Absent headers keep the schema's declared defaults; unknown headers are
/// rejected.
pub fn parse_row(
    flat: &IndexMap<String, CellValue>,
    schema: &Schema,
) -> Result<RecordValue, Vec<CompilerError>> {
    let mut errors = Vec::new();

    let mut paths: Vec<(Vec<PathSeg>, CellValue)> = Vec::new();
    for (header, value) in flat {
        match parse_path(header) {
            Ok(path) => {
                if path.iter().filter(|s| **s == PathSeg::Wildcard).count() > 1 {
                    errors.push(CompilerError::row(
                        "R003",
                        format!("Header '{}' has more than one wildcard segment", header),
                    ));
                    continue;
                }
                paths.push((path, value.clone()));
            }
            Err(e) => errors.push(e),
        }
    }

    let expanded = expand_wildcards(paths);

    let mut record = schema.default_record();
    for (path, value) in &expanded {
        if let Err(e) = assign(&mut record, &record_kind(schema), path, value) {
            errors.push(e);
        }
    }

    if errors.is_empty() {
        Ok(record)
    } else {
        Err(errors)
    }
}

fn record_kind(schema: &Schema) -> FieldKind {
    FieldKind::Record(schema.clone())
}

/// Expand `*` segments: headers sharing the same prefix before their wildcard
/// form one group; the group repeats for the longest parsed list among its
/// columns, and shorter columns repeat cyclically to fill.
fn expand_wildcards(paths: Vec<(Vec<PathSeg>, CellValue)>) -> Vec<(Vec<PathSeg>, CellValue)> {
    let mut group_len: IndexMap<String, usize> = IndexMap::new();
    for (path, value) in &paths {
        if let Some(pos) = path.iter().position(|s| *s == PathSeg::Wildcard) {
            let key = render_path(&path[..pos]);
            let len = value.list_len();
            let entry = group_len.entry(key).or_insert(0);
            *entry = (*entry).max(len);
        }
    }

    let mut out = Vec::new();
    for (path, value) in paths {
        let Some(pos) = path.iter().position(|s| *s == PathSeg::Wildcard) else {
            out.push((path, value));
            continue;
        };
        let key = render_path(&path[..pos]);
        let n = group_len.get(&key).copied().unwrap_or(0);
        let items = value.iter_items();
        if items.is_empty() {
            continue; // empty column: leave the field's default in place
        }
        for i in 0..n {
            let mut concrete = path.clone();
            concrete[pos] = PathSeg::Index(i + 1);
            out.push((concrete, items[i % items.len()].clone()));
        }
    }
    out
}

fn assign(
    target: &mut RecordValue,
    kind: &FieldKind,
    path: &[PathSeg],
    value: &CellValue,
) -> Result<(), CompilerError> {
    let Some(seg) = path.first() else {
        return set_leaf(target, kind, value);
    };

    match (seg, kind) {
        (PathSeg::Name(name), FieldKind::Record(schema)) => {
            let Some(field) = schema.field(name) else {
                return Err(CompilerError::row(
                    "R002",
                    format!("Unknown header field '{}'", name),
                ));
            };
            let RecordValue::Record(map) = target else {
                unreachable!("record kind always holds a record value");
            };
            let slot = map
                .entry(name.clone())
                .or_insert_with(|| field.kind.default_value());
            assign(slot, &field.kind, &path[1..], value)
        }
        (PathSeg::Index(i), FieldKind::List(elem)) => {
            let RecordValue::List(items) = target else {
                unreachable!("list kind always holds a list value");
            };
            while items.len() < *i {
                items.push(elem.default_value());
            }
            assign(&mut items[*i - 1], elem, &path[1..], value)
        }
        (PathSeg::Wildcard, _) => Err(CompilerError::row(
            "R003",
            "Unexpanded wildcard segment".to_string(),
        )),
        (seg, _) => Err(CompilerError::row(
            "R002",
            format!("Header segment '{}' does not match the schema shape", seg),
        )),
    }
}

fn set_leaf(
    target: &mut RecordValue,
    kind: &FieldKind,
    value: &CellValue,
) -> Result<(), CompilerError> {
    match kind {
        FieldKind::Scalar { .. } => {
            *target = RecordValue::Str(value.as_text());
            Ok(())
        }
        FieldKind::List(elem) => {
            let items = value.iter_items();
            // A flat list of scalars that fits a record element is one
            // element, not several: "key;value" is a single pair.
            if let FieldKind::Record(schema) = elem.as_ref() {
                let all_scalar = items.iter().all(|v| matches!(v, CellValue::Scalar(_)));
                if !items.is_empty() && all_scalar && items.len() <= schema.fields.len() {
                    let mut one = elem.default_value();
                    set_leaf(&mut one, elem, &CellValue::List(items))?;
                    *target = RecordValue::List(vec![one]);
                    return Ok(());
                }
            }
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let mut slot = elem.default_value();
                set_leaf(&mut slot, elem, &item)?;
                out.push(slot);
            }
            *target = RecordValue::List(out);
            Ok(())
        }
        FieldKind::Record(schema) => set_record_leaf(target, schema, value),
    }
}

/// Assign a whole cell value to a record field. A scalar fills the first
/// field; a list is either keyword-argument pairs or positional values.
/// When a two-element list could be read either way, the keyword-argument
/// interpretation wins — by contract, not per call.
fn set_record_leaf(
    target: &mut RecordValue,
    schema: &Schema,
    value: &CellValue,
) -> Result<(), CompilerError> {
    let items = value.iter_items();

    if items.is_empty() {
        return Ok(());
    }

    if items.len() == 1 {
        if let CellValue::Scalar(_) = &items[0] {
            let field = &schema.fields[0];
            return assign_record_field(target, schema, &field.name.clone(), &items[0]);
        }
    }

    let as_kwarg_pair = |item: &CellValue| -> Option<(String, CellValue)> {
        let pair = item.iter_items();
        if pair.len() == 2
            && let CellValue::Scalar(key) = &pair[0]
            && schema.field(key).is_some()
        {
            return Some((key.clone(), pair[1].clone()));
        }
        None
    };

    // All items are (known-field, value) pairs: keyword arguments.
    let kwargs: Vec<Option<(String, CellValue)>> = items.iter().map(as_kwarg_pair).collect();
    if items.len() >= 2 && kwargs.iter().all(|k| k.is_some()) {
        for (key, val) in kwargs.into_iter().flatten() {
            assign_record_field(target, schema, &key, &val)?;
        }
        return Ok(());
    }

    // A single [key, value] list where key names a field: one keyword pair.
    if items.len() == 2
        && let CellValue::Scalar(key) = &items[0]
        && schema.field(key).is_some()
    {
        let key = key.clone();
        return assign_record_field(target, schema, &key, &items[1]);
    }

    // Positional assignment in declared field order.
    if items.len() > schema.fields.len() {
        return Err(CompilerError::row(
            "R004",
            format!(
                "Value has {} elements but the field only has {} sub-fields",
                items.len(),
                schema.fields.len()
            ),
        ));
    }
    for (i, item) in items.iter().enumerate() {
        let name = schema.fields[i].name.clone();
        assign_record_field(target, schema, &name, item)?;
    }
    Ok(())
}

fn assign_record_field(
    target: &mut RecordValue,
    schema: &Schema,
    name: &str,
    value: &CellValue,
) -> Result<(), CompilerError> {
    let Some(field) = schema.field(name).cloned() else {
        return Err(CompilerError::row("R002", format!("unknown field '{}'", name)));
    };
    let RecordValue::Record(map) = target else {
        unreachable!("record kind always holds a record value");
    };
    let slot = map
        .entry(name.to_string())
        .or_insert_with(|| field.kind.default_value());
    set_leaf(slot, &field.kind, value)
}

// =============================================================================
// UNPARSE DIRECTION
// =============================================================================

/// Options for [`unparse_row`]. Paths are canonical header paths without
/// wildcards ("choices", "webhook.headers").
#[derive(Debug, Clone, Default)]
pub struct UnparseOptions {
    /// Sub-structures emitted as one flattened cell instead of recursing.
    pub collapse: Vec<String>,
    /// Sub-structures omitted from the output entirely.
    pub exclude: Vec<String>,
}

/// Flatten a record back into `{header: cell-text}`, omitting fields equal
/// to their schema default.
pub fn unparse_row(
    record: &RecordValue,
    schema: &Schema,
    opts: &UnparseOptions,
) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    walk_record(record, schema, "", opts, &mut out);
    out
}

fn join_path(prefix: &str, seg: &str) -> String {
    if prefix.is_empty() {
        seg.to_string()
    } else {
        format!("{}.{}", prefix, seg)
    }
}

fn walk_record(
    record: &RecordValue,
    schema: &Schema,
    prefix: &str,
    opts: &UnparseOptions,
    out: &mut IndexMap<String, String>,
) {
    for field in &schema.fields {
        let path = join_path(prefix, &field.name);
        let Some(value) = record.get(&field.name) else {
            continue;
        };
        walk_value(value, &field.kind, &path, opts, out);
    }
}

fn walk_value(
    value: &RecordValue,
    kind: &FieldKind,
    path: &str,
    opts: &UnparseOptions,
    out: &mut IndexMap<String, String>,
) {
    if opts.exclude.iter().any(|p| p == path) {
        return;
    }
    if *value == kind.default_value() {
        return;
    }
    if opts.collapse.iter().any(|p| p == path) {
        let cell = collapse_value(value, kind);
        if !cell.is_empty() {
            out.insert(path.to_string(), cell.to_cell_text());
        }
        return;
    }

    match (value, kind) {
        (RecordValue::Str(s), _) => {
            out.insert(path.to_string(), s.clone());
        }
        (RecordValue::List(items), FieldKind::List(elem)) => {
            for (i, item) in items.iter().enumerate() {
                let sub = join_path(path, &(i + 1).to_string());
                walk_value(item, elem, &sub, opts, out);
            }
        }
        (RecordValue::Record(_), FieldKind::Record(schema)) => {
            walk_record(value, schema, path, opts, out);
        }
        _ => {}
    }
}

/// Render a sub-structure as a single nested cell value. Records become
/// positional lists with trailing defaults trimmed.
pub fn collapse_value(value: &RecordValue, kind: &FieldKind) -> CellValue {
    match (value, kind) {
        (RecordValue::Str(s), _) => CellValue::Scalar(s.clone()),
        (RecordValue::List(items), FieldKind::List(elem)) => {
            let mut cells: Vec<CellValue> = items.iter().map(|v| collapse_value(v, elem)).collect();
            if cells.len() == 1 { cells.remove(0) } else { CellValue::List(cells) }
        }
        (RecordValue::Record(_), FieldKind::Record(schema)) => {
            let mut cells: Vec<CellValue> = Vec::new();
            for field in &schema.fields {
                let v = value
                    .get(&field.name)
                    .cloned()
                    .unwrap_or_else(|| field.kind.default_value());
                cells.push(collapse_value(&v, &field.kind));
            }
            while cells.last().is_some_and(|c| c.is_empty()) {
                cells.pop();
            }
            if cells.len() == 1 { cells.remove(0) } else { CellValue::List(cells) }
        }
        _ => CellValue::Scalar(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;
    use crate::row::schema::{FieldKind, Schema};

    fn pair_schema() -> Schema {
        Schema::new(vec![
            ("key", FieldKind::scalar("")),
            ("value", FieldKind::scalar("")),
        ])
    }

    fn test_schema() -> Schema {
        Schema::new(vec![
            ("id", FieldKind::scalar("")),
            ("mode", FieldKind::scalar("plain")),
            ("tags", FieldKind::list(FieldKind::scalar(""))),
            ("meta", FieldKind::Record(pair_schema())),
            (
                "pairs",
                FieldKind::list(FieldKind::Record(pair_schema())),
            ),
        ])
    }

    fn flat(entries: Vec<(&str, CellValue)>) -> IndexMap<String, CellValue> {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn absent_headers_keep_defaults() {
        let record = parse_row(&flat(vec![("id", CellValue::scalar("x"))]), &test_schema())
            .unwrap();
        assert_eq!(record.get("mode").unwrap().as_str(), "plain");
    }

    #[test]
    fn unknown_header_rejected() {
        let errs = parse_row(&flat(vec![("bogus", CellValue::scalar("x"))]), &test_schema())
            .unwrap_err();
        assert_eq!(errs[0].code, "R002");
    }

    #[test]
    fn scalar_into_record_fills_first_field() {
        let record = parse_row(&flat(vec![("meta", CellValue::scalar("k1"))]), &test_schema())
            .unwrap();
        assert_eq!(record.get("meta").unwrap().get("key").unwrap().as_str(), "k1");
    }

    #[test]
    fn kwarg_interpretation_wins_over_positional() {
        // ["value", "x"] could be positional (key="value", value="x") or a
        // keyword pair (value="x"); the keyword reading is the contract.
        let cell = CellValue::list(vec![CellValue::scalar("value"), CellValue::scalar("x")]);
        let record = parse_row(&flat(vec![("meta", cell)]), &test_schema()).unwrap();
        let meta = record.get("meta").unwrap();
        assert_eq!(meta.get("key").unwrap().as_str(), "");
        assert_eq!(meta.get("value").unwrap().as_str(), "x");
    }

    #[test]
    fn positional_assignment_when_not_kwargs() {
        let cell = CellValue::list(vec![CellValue::scalar("a"), CellValue::scalar("b")]);
        let record = parse_row(&flat(vec![("meta", cell)]), &test_schema()).unwrap();
        let meta = record.get("meta").unwrap();
        assert_eq!(meta.get("key").unwrap().as_str(), "a");
        assert_eq!(meta.get("value").unwrap().as_str(), "b");
    }

    #[test]
    fn wildcard_broadcast() {
        let record = parse_row(
            &flat(vec![
                (
                    "pairs.*.key",
                    CellValue::list(vec![
                        CellValue::scalar("a"),
                        CellValue::scalar("b"),
                        CellValue::scalar("c"),
                    ]),
                ),
                ("pairs.*.value", CellValue::scalar("v")),
            ]),
            &test_schema(),
        )
        .unwrap();
        let pairs = record.get("pairs").unwrap().items();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[1].get("key").unwrap().as_str(), "b");
        // Shorter column broadcast across all three repetitions.
        assert_eq!(pairs[2].get("value").unwrap().as_str(), "v");
    }

    #[test]
    fn indexed_assignment_is_one_based() {
        let record = parse_row(
            &flat(vec![("tags.2", CellValue::scalar("second"))]),
            &test_schema(),
        )
        .unwrap();
        let tags = record.get("tags").unwrap().items();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].as_str(), "");
        assert_eq!(tags[1].as_str(), "second");
    }

    #[test]
    fn single_pair_cell_is_one_record_element() {
        let cell = CellValue::list(vec![CellValue::scalar("k"), CellValue::scalar("v")]);
        let record = parse_row(&flat(vec![("pairs", cell)]), &test_schema()).unwrap();
        let pairs = record.get("pairs").unwrap().items();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].get("key").unwrap().as_str(), "k");
        assert_eq!(pairs[0].get("value").unwrap().as_str(), "v");
    }

    #[test]
    fn unparse_omits_defaults() {
        let record = parse_row(&flat(vec![("id", CellValue::scalar("x"))]), &test_schema())
            .unwrap();
        let out = unparse_row(&record, &test_schema(), &UnparseOptions::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out.get("id").unwrap(), "x");
    }

    #[test]
    fn unparse_collapse_point() {
        let record = parse_row(
            &flat(vec![(
                "tags",
                CellValue::list(vec![CellValue::scalar("a"), CellValue::scalar("b")]),
            )]),
            &test_schema(),
        )
        .unwrap();
        let opts = UnparseOptions {
            collapse: vec!["tags".into()],
            exclude: vec![],
        };
        let out = unparse_row(&record, &test_schema(), &opts);
        assert_eq!(out.get("tags").unwrap(), "a|b");
    }

    #[test]
    fn unparse_exclusion() {
        let record = parse_row(
            &flat(vec![
                ("id", CellValue::scalar("x")),
                ("tags.1", CellValue::scalar("a")),
            ]),
            &test_schema(),
        )
        .unwrap();
        let opts = UnparseOptions {
            collapse: vec![],
            exclude: vec!["tags".into()],
        };
        let out = unparse_row(&record, &test_schema(), &opts);
        assert!(!out.keys().any(|k| k.starts_with("tags")));
    }
}
