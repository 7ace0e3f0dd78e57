use super::schema::*;
use crate::error::ConversionError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_IR_VERSION: &str = "1.0";

/// A trait for plan shapes that can be normalized into a `LogicalIr`.
///
/// This is the extension point that lets the compiler accept more than one entry
/// shape: upstream generators may hand over a finished IR or a step-by-step
/// technical workflow, and both end up as the same canonical IR.
///
/// # Example
///
/// ```rust,no_run
/// use pilotc::prelude::*;
/// use pilotc::error::ConversionError;
///
/// struct MyPlan { goal: String }
///
/// impl IntoLogicalIr for MyPlan {
///     fn into_logical_ir(self) -> std::result::Result<LogicalIr, ConversionError> {
///         let workflow = TechnicalWorkflow {
///             goal: self.goal,
///             ir_version: None,
///             technical_steps: vec![],
///             clarifications: vec![],
///         };
///         workflow.into_logical_ir()
///     }
/// }
/// ```
pub trait IntoLogicalIr {
    /// Consumes the plan and converts it into the canonical IR.
    fn into_logical_ir(self) -> Result<LogicalIr, ConversionError>;
}

impl IntoLogicalIr for LogicalIr {
    fn into_logical_ir(self) -> Result<LogicalIr, ConversionError> {
        Ok(self)
    }
}

/// The pre-IR "technical workflow" produced by some upstream planners: a flat,
/// ordered list of typed steps instead of per-category arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalWorkflow {
    pub goal: String,
    #[serde(default)]
    pub ir_version: Option<String>,
    pub technical_steps: Vec<TechnicalStep>,
    #[serde(default)]
    pub clarifications: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TechnicalStep {
    Fetch(DataSource),
    Filter(Filter),
    Transform(Transform),
    Ai(AiOperation),
    Branch(Conditional),
    Loop(LoopSpec),
    Partition(Partition),
    Group(Grouping),
    Render(Rendering),
    Deliver(Delivery),
    EdgeCase(EdgeCase),
}

impl IntoLogicalIr for TechnicalWorkflow {
    fn into_logical_ir(self) -> Result<LogicalIr, ConversionError> {
        if self.goal.trim().is_empty() {
            return Err(ConversionError::ValidationError(
                "technical workflow has an empty goal".to_string(),
            ));
        }

        let mut ir = LogicalIr {
            ir_version: self
                .ir_version
                .unwrap_or_else(|| DEFAULT_IR_VERSION.to_string()),
            goal: self.goal,
            data_sources: Vec::new(),
            filters: Vec::new(),
            transforms: Vec::new(),
            ai_operations: Vec::new(),
            conditionals: Vec::new(),
            loops: Vec::new(),
            partitions: Vec::new(),
            grouping: None,
            rendering: None,
            delivery: Vec::new(),
            edge_cases: Vec::new(),
            clarifications_required: self.clarifications,
        };

        for step in self.technical_steps {
            match step {
                TechnicalStep::Fetch(source) => ir.data_sources.push(source),
                TechnicalStep::Filter(filter) => ir.filters.push(filter),
                TechnicalStep::Transform(transform) => ir.transforms.push(transform),
                TechnicalStep::Ai(operation) => ir.ai_operations.push(operation),
                TechnicalStep::Branch(conditional) => ir.conditionals.push(conditional),
                TechnicalStep::Loop(spec) => ir.loops.push(spec),
                TechnicalStep::Partition(partition) => ir.partitions.push(partition),
                TechnicalStep::Group(grouping) => {
                    if ir.grouping.replace(grouping).is_some() {
                        return Err(ConversionError::DuplicateSingleton("group"));
                    }
                }
                TechnicalStep::Render(rendering) => {
                    if ir.rendering.replace(rendering).is_some() {
                        return Err(ConversionError::DuplicateSingleton("render"));
                    }
                }
                TechnicalStep::Deliver(delivery) => ir.delivery.push(delivery),
                TechnicalStep::EdgeCase(edge_case) => ir.edge_cases.push(edge_case),
            }
        }

        Ok(ir)
    }
}
