//! Structured output - schemas for final answers and their validation

pub mod schema;
pub mod validate;

pub use schema::{OutputSchema, SchemaViolation};
pub use validate::Violation;
