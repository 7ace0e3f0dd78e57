//! # pilotc - Logical IR to Workflow Compiler
//!
//! **pilotc** compiles a Logical Intermediate Representation (IR) of an automation
//! ("read these rows, filter them, classify them, send a table by email") into a flat,
//! dependency-annotated list of executable workflow steps, validated as a DAG and
//! ready for a runtime to schedule.
//!
//! ## Core Workflow
//!
//! Compilation is deterministic and side-effect free. The only collaborator is a
//! read-only capability catalog describing which plugins and operations exist.
//!
//! 1.  **Describe your plugins**: Build an `InMemoryCatalog` (or implement `CapabilityCatalog`).
//! 2.  **Get an IR**: Parse a `LogicalIr` from JSON, or normalize any upstream plan with the `IntoLogicalIr` trait.
//! 3.  **Compile**: Use `Compiler::builder` to create a compiler and call `compile`. A priority-ordered rule set picks how the IR becomes steps, lookup sources get deduplication steps, and the result is validated as a DAG.
//! 4.  **Hand off**: Serialize the `CompilationOutput` envelope, or read the execution plan (topological order, parallel batches, critical path) directly.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pilotc::prelude::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let catalog = InMemoryCatalog::from_file("path/to/catalog.json")?;
//!     let compiler = Compiler::builder(Arc::new(catalog)).build();
//!
//!     let ir_json = std::fs::read_to_string("path/to/ir.json")?;
//!     let ir = LogicalIr::from_json(&ir_json)?;
//!
//!     match compiler.compile(&ir) {
//!         CompilationOutput::Success(workflow) => {
//!             println!("Rule used: {}", workflow.metadata.rule_used);
//!             for step in &workflow.workflow_steps {
//!                 println!("  {}", step);
//!             }
//!         }
//!         CompilationOutput::Failure(failure) => {
//!             for error in &failure.errors {
//!                 eprintln!("{}: {}", error.code(), error);
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod compiler;
pub mod config;
pub mod dag;
pub mod error;
pub mod ir;
pub mod pipeline;
pub mod prelude;
pub mod session;
pub mod step;
