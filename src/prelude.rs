//! Prelude module for convenient imports
//!
//! This module re-exports the most commonly used types and traits from the pilotc crate.
//!
//! # Example
//!
//! ```rust,no_run
//! use pilotc::prelude::*;
//! use std::sync::Arc;
//!
//! # fn run_example() -> Result<()> {
//! let config = Config::from_file("path/to/pilotc.json")?;
//! let catalog = InMemoryCatalog::from_file("path/to/catalog.json")?;
//! let compiler = Compiler::builder(Arc::new(catalog))
//!     .with_config(config.compiler)
//!     .build();
//!
//! let output = compiler.compile_json(&std::fs::read_to_string("path/to/ir.json")?);
//! println!("{}", output.to_json_pretty()?);
//! # Ok(())
//! # }
//! ```

// Compilation
pub use crate::compiler::{
    CompilationOutput, CompilationRule, CompiledWorkflow, Compiler, DslWrapper, StepEmitter,
};

// IR and step types
pub use crate::ir::{IntoLogicalIr, LogicalIr, TechnicalWorkflow};
pub use crate::step::{ExecutionClass, StepKind, WorkflowStep};

// Graph validation
pub use crate::dag::{DagAnalysis, DagValidation, DagValidator};

// Collaborators and configuration
pub use crate::catalog::{CapabilityCatalog, InMemoryCatalog};
pub use crate::config::{CompilerConfig, Config};

// Error types
pub use crate::error::{CompileError, DagError, Diagnostic, Warning};

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;
