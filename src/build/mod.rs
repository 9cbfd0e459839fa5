//! The forward pipeline: row stream in, interchange flow out.

pub mod builder;
pub mod group;
pub mod source;

pub use builder::compile_flow;
pub use source::{
    Bookmark, MemoryCatalog, NoSheets, RawRow, RowSource, SheetCatalog, TableSource,
};

use crate::error::CompilerError;
use crate::flow::types::Flow;
use crate::registry::UuidRegistry;

/// Compile one sheet all the way to a validated interchange flow: build
/// the graph, resolve referenced uuids, render, check.
///
/// Multi-flow compilation units should drive `compile_flow` and a shared
/// `UuidRegistry` directly so cross-flow names reconcile; this entry point
/// is the single-flow convenience.
pub fn compile_single(
    name: &str,
    table: Vec<Vec<String>>,
    catalog: &dyn SheetCatalog,
) -> Result<Flow, Vec<CompilerError>> {
    let mut source = TableSource::new(name, table).map_err(|e| vec![e])?;
    let mut registry = UuidRegistry::new();
    let container = compile_flow(name, &mut source, catalog, &mut registry)?;
    registry
        .record_flow(name, Some(&container.uuid))
        .map_err(|e| vec![CompilerError::from(e)])?;
    registry.generate_missing();
    let mut flow = container.render(0)?;
    registry.assign(&mut flow);
    crate::validate::check_flow(&flow)?;
    Ok(flow)
}
