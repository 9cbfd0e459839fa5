//! Final renumbering pass: UUID-derived temporary row ids become short
//! sequential ones, and every reference follows through the same map.

use indexmap::IndexMap;

use crate::row::{FlowRow, RowKind};

pub fn renumber(rows: &mut [FlowRow]) {
    let mut map: IndexMap<String, String> = IndexMap::new();
    let mut next = 1usize;
    for row in rows.iter() {
        if !row.row_id.is_empty() && !map.contains_key(&row.row_id) {
            map.insert(row.row_id.clone(), next.to_string());
            next += 1;
        }
    }
    for row in rows.iter_mut() {
        if let Some(new_id) = map.get(&row.row_id) {
            row.row_id = new_id.clone();
        }
        for edge in &mut row.edges {
            if let Some(new_id) = map.get(&edge.from_) {
                edge.from_ = new_id.clone();
            }
        }
        // go_to rows reference their target through the main argument.
        if row.kind == RowKind::GoTo
            && let Some(new_id) = map.get(&row.main_text)
        {
            row.main_text = new_id.clone();
        }
    }
}
