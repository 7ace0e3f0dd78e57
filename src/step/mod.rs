//! The compiler's output unit: one executable step with explicit dependencies.
use crate::ir::Condition;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One executable unit of a compiled workflow.
///
/// Steps are produced once by the compiler and never mutated afterwards. The
/// step-type-specific payload lives in `kind`, a closed set of variants so every
/// consumer has to handle each kind explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            dependencies: Vec::new(),
            kind,
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// The `(plugin, operation)` pair of an action step.
    pub fn plugin_operation(&self) -> Option<(&str, &str)> {
        match &self.kind {
            StepKind::Action {
                plugin, operation, ..
            } => Some((plugin.as_str(), operation.as_str())),
            _ => None,
        }
    }

    pub fn execution_class(&self) -> ExecutionClass {
        self.kind.execution_class()
    }

    /// Every string value carried by the step, in declaration order. Used to find
    /// placeholders such as `{{input.recipient}}`.
    pub fn string_values(&self) -> Vec<&str> {
        let mut out = Vec::new();
        match &self.kind {
            StepKind::Action { params, .. } => collect_map_strings(params, &mut out),
            StepKind::AiProcessing {
                instruction, input, ..
            } => {
                out.push(instruction.as_str());
                out.push(input.as_str());
            }
            StepKind::Transform { input, config, .. } => {
                out.push(input.as_str());
                collect_map_strings(config, &mut out);
            }
            StepKind::Conditional { condition, .. } => {
                out.push(condition.field.as_str());
                if let Some(value) = &condition.value {
                    collect_strings(value, &mut out);
                }
            }
            StepKind::Loop { iterate_over, .. } => out.push(iterate_over.as_str()),
        }
        out
    }
}

fn collect_map_strings<'a>(map: &'a Map<String, Value>, out: &mut Vec<&'a str>) {
    for value in map.values() {
        collect_strings(value, out);
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => collect_map_strings(map, out),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// The step-type-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Invokes a plugin operation through the runtime.
    Action {
        plugin: String,
        operation: String,
        #[serde(default)]
        params: Map<String, Value>,
    },
    AiProcessing {
        instruction: String,
        input: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_schema: Option<Value>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        labels: Vec<String>,
    },
    Transform {
        operation: TransformKind,
        input: String,
        #[serde(default)]
        config: Map<String, Value>,
    },
    /// Routes execution: steps in `then_steps`/`else_steps` run only on their branch.
    Conditional {
        condition: Condition,
        #[serde(default)]
        then_steps: Vec<String>,
        #[serde(default)]
        else_steps: Vec<String>,
    },
    /// Runs `body` once per element of `iterate_over`. Both limits are enforced by
    /// the runtime, not the compiler.
    Loop {
        iterate_over: String,
        item_name: String,
        #[serde(default)]
        body: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_concurrency: Option<u32>,
    },
}

impl StepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::Action { .. } => "action",
            StepKind::AiProcessing { .. } => "ai_processing",
            StepKind::Transform { .. } => "transform",
            StepKind::Conditional { .. } => "conditional",
            StepKind::Loop { .. } => "loop",
        }
    }

    /// Which steps count as deterministic for the compilation metadata.
    ///
    /// | kind            | class         |
    /// |-----------------|---------------|
    /// | `action`        | deterministic |
    /// | `transform`     | deterministic |
    /// | `conditional`   | deterministic |
    /// | `loop`          | deterministic |
    /// | `ai_processing` | AI-driven     |
    pub fn execution_class(&self) -> ExecutionClass {
        match self {
            StepKind::Action { .. }
            | StepKind::Transform { .. }
            | StepKind::Conditional { .. }
            | StepKind::Loop { .. } => ExecutionClass::Deterministic,
            StepKind::AiProcessing { .. } => ExecutionClass::AiDriven,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionClass {
    Deterministic,
    AiDriven,
}

/// Data operations a `Transform` step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Filter,
    Map,
    Sort,
    Deduplicate,
    Aggregate,
    Flatten,
    SelectFields,
    Limit,
    Partition,
    GroupBy,
    Merge,
    /// Pulls the identifying key out of every reference row.
    ExtractKeys,
    /// Drops candidate rows whose key is already in the reference key set.
    ExcludeKnown,
    Render,
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StepKind::Action {
                plugin, operation, ..
            } => write!(f, "{} [action {}.{}]", self.id, plugin, operation),
            StepKind::Transform { operation, .. } => {
                write!(f, "{} [transform {:?}]", self.id, operation)
            }
            kind => write!(f, "{} [{}]", self.id, kind.type_name()),
        }
    }
}
