//! Tool Registry and built-in capability catalog (spec.md §4.4).

pub mod catalog;
pub mod registry;

pub use catalog::builtin_registry;
pub use registry::{Tool, ToolContext, ToolRegistry};
