//! Row sources: the resettable cursor the builder consumes rows from.
//!
//! Loop constructs replay a row range once per iteration value, so a source
//! must support saving and restoring its cursor position. That is the whole
//! contract; reading sheets off disk belongs to the ingestion adapters, not
//! here.

use indexmap::IndexMap;

use crate::error::CompilerError;

/// One raw data row: header text mapped to unparsed cell text.
pub type RawRow = IndexMap<String, String>;

/// A saved cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bookmark(usize);

pub trait RowSource {
    fn sheet_name(&self) -> &str;

    /// The next data row together with its 1-based sheet position. The
    /// header row counts as row 1, so the first data row reports 2.
    fn next_row(&mut self) -> Option<(RawRow, usize)>;

    fn bookmark(&self) -> Bookmark;

    fn rewind(&mut self, bookmark: Bookmark);
}

/// An in-memory table. The first row is the header row.
#[derive(Debug, Clone)]
pub struct TableSource {
    sheet: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    cursor: usize,
}

impl TableSource {
    pub fn new(sheet: impl Into<String>, mut table: Vec<Vec<String>>) -> Result<Self, CompilerError> {
        let sheet = sheet.into();
        if table.is_empty() {
            return Err(CompilerError::build(
                "B005",
                format!("sheet '{}' has no header row", sheet),
            ));
        }
        let headers = table.remove(0);
        Ok(TableSource {
            sheet,
            headers,
            rows: table,
            cursor: 0,
        })
    }
}

impl RowSource for TableSource {
    fn sheet_name(&self) -> &str {
        &self.sheet
    }

    fn next_row(&mut self) -> Option<(RawRow, usize)> {
        let cells = self.rows.get(self.cursor)?;
        let row_number = self.cursor + 2;
        self.cursor += 1;
        let mut flat = RawRow::new();
        for (i, header) in self.headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            flat.insert(header.clone(), cell.to_string());
        }
        Some((flat, row_number))
    }

    fn bookmark(&self) -> Bookmark {
        Bookmark(self.cursor)
    }

    fn rewind(&mut self, bookmark: Bookmark) {
        self.cursor = bookmark.0;
    }
}

/// Lookup of sheets referenced by name from within a flow, used by rows
/// that splice another sheet in as a block.
pub trait SheetCatalog {
    fn open(&self, name: &str) -> Option<TableSource>;
}

/// A catalog over in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    sheets: IndexMap<String, Vec<Vec<String>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, table: Vec<Vec<String>>) {
        self.sheets.insert(name.into(), table);
    }
}

impl SheetCatalog for MemoryCatalog {
    fn open(&self, name: &str) -> Option<TableSource> {
        let table = self.sheets.get(name)?.clone();
        TableSource::new(name, table).ok()
    }
}

/// The empty catalog, for flows that never reference another sheet.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSheets;

impl SheetCatalog for NoSheets {
    fn open(&self, _name: &str) -> Option<TableSource> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn rows_report_sheet_positions() {
        let mut source =
            TableSource::new("main", table(&[&["type", "message_text"], &["send_message", "hi"]]))
                .unwrap();
        let (row, position) = source.next_row().unwrap();
        assert_eq!(position, 2);
        assert_eq!(row.get("type").unwrap(), "send_message");
        assert!(source.next_row().is_none());
    }

    #[test]
    fn bookmark_replays_rows() {
        let mut source = TableSource::new(
            "main",
            table(&[&["type"], &["send_message"], &["no_op"]]),
        )
        .unwrap();
        let mark = source.bookmark();
        source.next_row().unwrap();
        source.next_row().unwrap();
        assert!(source.next_row().is_none());
        source.rewind(mark);
        let (row, position) = source.next_row().unwrap();
        assert_eq!(position, 2);
        assert_eq!(row.get("type").unwrap(), "send_message");
    }

    #[test]
    fn short_rows_pad_with_empty_cells() {
        let mut source = TableSource::new(
            "main",
            table(&[&["type", "message_text"], &["send_message"]]),
        )
        .unwrap();
        let (row, _) = source.next_row().unwrap();
        assert_eq!(row.get("message_text").unwrap(), "");
    }
}
