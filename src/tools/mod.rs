//! Tools module - tool trait, registry, executor and built-in tools

pub mod calculator;
pub mod executor;
pub mod registry;

pub use calculator::CalculatorTool;
pub use executor::{ToolExecutor, ToolOutcome};
pub use registry::{Tool, ToolOutput, ToolRegistry};
