//! The Logical Intermediate Representation consumed by the compiler.
pub mod conversion;
pub mod schema;
pub mod validation;

pub use conversion::*;
pub use schema::*;
pub use validation::{analyze_filters, validate_ir};
