//! Unified compiler error type used across all phases.

use crate::registry::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Cell,
    Row,
    Build,
    Resolve,
    Render,
    Uncompile,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Cell => write!(f, "Cell"),
            Phase::Row => write!(f, "Row"),
            Phase::Build => write!(f, "Build"),
            Phase::Resolve => write!(f, "Resolve"),
            Phase::Render => write!(f, "Render"),
            Phase::Uncompile => write!(f, "Uncompile"),
        }
    }
}

/// Sheet coordinates of the row an error originated from.
///
/// `row` is the 1-based position within the sheet, counting the header row
/// as row 1 (so the first data row is row 2, matching what authors see in
/// their spreadsheet application).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLocation {
    pub sheet: String,
    pub row: usize,
}

impl std::fmt::Display for RowLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sheet '{}', row {}", self.sheet, self.row)
    }
}

#[derive(Debug, Clone)]
pub struct CompilerError {
    pub code: String,
    pub phase: Phase,
    pub message: String,
    pub location: Option<RowLocation>,
}

impl std::fmt::Display for CompilerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => write!(
                f,
                "[{}:{}] {} ({})",
                self.phase, self.code, self.message, loc
            ),
            None => write!(f, "[{}:{}] {}", self.phase, self.code, self.message),
        }
    }
}

impl std::error::Error for CompilerError {}

impl From<RegistryError> for CompilerError {
    fn from(e: RegistryError) -> Self {
        CompilerError {
            code: e.code().into(),
            phase: Phase::Resolve,
            message: e.to_string(),
            location: None,
        }
    }
}

impl CompilerError {
    pub fn cell(code: &str, message: impl Into<String>) -> Self {
        CompilerError {
            code: code.into(),
            phase: Phase::Cell,
            message: message.into(),
            location: None,
        }
    }

    pub fn row(code: &str, message: impl Into<String>) -> Self {
        CompilerError {
            code: code.into(),
            phase: Phase::Row,
            message: message.into(),
            location: None,
        }
    }

    pub fn build(code: &str, message: impl Into<String>) -> Self {
        CompilerError {
            code: code.into(),
            phase: Phase::Build,
            message: message.into(),
            location: None,
        }
    }

    pub fn render(code: &str, message: impl Into<String>) -> Self {
        CompilerError {
            code: code.into(),
            phase: Phase::Render,
            message: message.into(),
            location: None,
        }
    }

    pub fn uncompile(code: &str, message: impl Into<String>) -> Self {
        CompilerError {
            code: code.into(),
            phase: Phase::Uncompile,
            message: message.into(),
            location: None,
        }
    }

    /// Attach sheet/row coordinates if none are present yet. Errors keep the
    /// innermost location they were tagged with.
    pub fn at(mut self, location: &RowLocation) -> Self {
        if self.location.is_none() {
            self.location = Some(location.clone());
        }
        self
    }
}
