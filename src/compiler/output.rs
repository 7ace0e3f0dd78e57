use super::wrapper::DslWrapper;
use crate::dag::DagAnalysis;
use crate::error::{CompileError, ConfigError, Diagnostic, Warning};
use crate::step::{ExecutionClass, WorkflowStep};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fs;

/// Facts about one compilation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationMetadata {
    pub rule_used: String,
    pub workflow_type: String,
    pub step_count: usize,
    pub ai_step_count: usize,
    /// Share of non-AI steps, in percent with one decimal.
    pub deterministic_step_percentage: f64,
    pub compilation_time_ms: f64,
    pub ir_version: String,
    pub compiler_version: String,
}

impl CompilationMetadata {
    pub(super) fn describe(
        steps: &[WorkflowStep],
        rule_used: &str,
        workflow_type: &str,
        ir_version: &str,
        compilation_time_ms: f64,
    ) -> Self {
        let ai_step_count = steps
            .iter()
            .filter(|s| s.execution_class() == ExecutionClass::AiDriven)
            .count();
        Self {
            rule_used: rule_used.to_string(),
            workflow_type: workflow_type.to_string(),
            step_count: steps.len(),
            ai_step_count,
            deterministic_step_percentage: deterministic_percentage(steps.len(), ai_step_count),
            compilation_time_ms,
            ir_version: ir_version.to_string(),
            compiler_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn deterministic_percentage(total: usize, ai: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = (total - ai) as f64 / total as f64 * 100.0;
    (raw * 10.0).round() / 10.0
}

/// A successfully compiled and validated workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledWorkflow {
    pub workflow_steps: Vec<WorkflowStep>,
    pub dsl_wrapper: DslWrapper,
    pub metadata: CompilationMetadata,
    pub execution_plan: DagAnalysis,
    #[serde(default)]
    pub warnings: Vec<Diagnostic>,
}

impl CompiledWorkflow {
    /// Saves the compiled workflow as pretty-printed JSON.
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })
    }

    /// Loads a compiled workflow from a file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.workflow_steps.iter().find(|s| s.id == id)
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.workflow_steps.iter().map(|s| s.id.as_str()).collect()
    }
}

/// Everything that stopped a compilation, plus the warnings gathered so far.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilationFailure {
    pub errors: Vec<CompileError>,
    pub warnings: Vec<Warning>,
}

impl CompilationFailure {
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.errors.iter().map(Diagnostic::from).collect()
    }
}

/// The result of compiling one IR. Serializes to the `{ success, .. }` envelope
/// callers consume.
#[derive(Debug, Clone, PartialEq)]
pub enum CompilationOutput {
    Success(Box<CompiledWorkflow>),
    Failure(CompilationFailure),
}

impl CompilationOutput {
    pub fn is_success(&self) -> bool {
        matches!(self, CompilationOutput::Success(_))
    }

    pub fn workflow(&self) -> Option<&CompiledWorkflow> {
        match self {
            CompilationOutput::Success(workflow) => Some(workflow),
            CompilationOutput::Failure(_) => None,
        }
    }

    pub fn errors(&self) -> &[CompileError] {
        match self {
            CompilationOutput::Success(_) => &[],
            CompilationOutput::Failure(failure) => &failure.errors,
        }
    }

    pub fn into_result(self) -> Result<CompiledWorkflow, CompilationFailure> {
        match self {
            CompilationOutput::Success(workflow) => Ok(*workflow),
            CompilationOutput::Failure(failure) => Err(failure),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for CompilationOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CompilationOutput::Success(workflow) => {
                let mut state = serializer.serialize_struct("CompilationOutput", 6)?;
                state.serialize_field("success", &true)?;
                state.serialize_field("workflow_steps", &workflow.workflow_steps)?;
                state.serialize_field("dsl_wrapper", &workflow.dsl_wrapper)?;
                state.serialize_field("metadata", &workflow.metadata)?;
                state.serialize_field("execution_plan", &workflow.execution_plan)?;
                state.serialize_field("warnings", &workflow.warnings)?;
                state.end()
            }
            CompilationOutput::Failure(failure) => {
                let warnings: Vec<Diagnostic> =
                    failure.warnings.iter().map(Diagnostic::from).collect();
                let mut state = serializer.serialize_struct("CompilationOutput", 3)?;
                state.serialize_field("success", &false)?;
                state.serialize_field("errors", &failure.diagnostics())?;
                state.serialize_field("warnings", &warnings)?;
                state.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::deterministic_percentage;

    #[test]
    fn percentage_rounds_to_one_decimal() {
        assert_eq!(deterministic_percentage(3, 1), 66.7);
        assert_eq!(deterministic_percentage(8, 0), 100.0);
        assert_eq!(deterministic_percentage(0, 0), 0.0);
    }
}
