//! Row phase: flat header/cell dicts ⇄ typed row records.

pub mod mapper;
pub mod path;
pub mod schema;
pub mod types;

pub use mapper::{UnparseOptions, parse_row, unparse_row};
pub use types::{Condition, Edge, FlowRow, RowKind, parse_flow_row, unparse_flow_row};
