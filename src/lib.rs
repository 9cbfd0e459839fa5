pub mod build;
pub mod cell;
pub mod error;
pub mod flow;
pub mod registry;
pub mod row;
pub mod uncompile;
pub mod validate;
