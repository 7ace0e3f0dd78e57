use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that make an IR impossible to compile. These are returned as part of the
/// output contract and never escape the compiler boundary as a panic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Failed to parse Logical IR document: {0}")]
    InvalidIr(String),

    #[error("IR version '{found}' is not supported (expected major version {supported})")]
    UnsupportedIrVersion { found: String, supported: u32 },

    #[error("IR is not compile-ready, {} clarification(s) outstanding: {}", .0.len(), .0.join("; "))]
    ClarificationsRequired(Vec<String>),

    #[error("IR declares no data source; at least one primary data source is required")]
    MissingDataSource,

    #[error("IR declares only lookup data sources; a primary data source is required")]
    MissingPrimarySource,

    #[error("IR declares no delivery; at least one delivery sink is required")]
    MissingDelivery,

    #[error("IR id '{0}' is declared more than once")]
    DuplicateIrId(String),

    #[error("'{referrer}' references '{missing}', which is not defined in the IR")]
    UnknownReference { referrer: String, missing: String },

    #[error("No compilation rule matches the IR shape: {shape}")]
    NoMatchingRule { shape: String },

    #[error("Step '{step_id}' references plugin '{plugin}', which is not in the capability catalog")]
    UnknownPlugin { step_id: String, plugin: String },

    #[error(
        "Step '{step_id}' references operation '{operation}' of plugin '{plugin}', which is not in the capability catalog"
    )]
    UnknownOperation {
        step_id: String,
        plugin: String,
        operation: String,
    },

    #[error(transparent)]
    Graph(#[from] DagError),
}

impl CompileError {
    /// A stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::InvalidIr(_) => "E_INVALID_IR",
            CompileError::UnsupportedIrVersion { .. } => "E_UNSUPPORTED_VERSION",
            CompileError::ClarificationsRequired(_) => "E_CLARIFICATIONS_REQUIRED",
            CompileError::MissingDataSource => "E_MISSING_DATA_SOURCE",
            CompileError::MissingPrimarySource => "E_MISSING_PRIMARY_SOURCE",
            CompileError::MissingDelivery => "E_MISSING_DELIVERY",
            CompileError::DuplicateIrId(_) => "E_DUPLICATE_IR_ID",
            CompileError::UnknownReference { .. } => "E_UNKNOWN_REFERENCE",
            CompileError::NoMatchingRule { .. } => "E_NO_MATCHING_RULE",
            CompileError::UnknownPlugin { .. } => "E_UNKNOWN_PLUGIN",
            CompileError::UnknownOperation { .. } => "E_UNKNOWN_OPERATION",
            CompileError::Graph(err) => err.code(),
        }
    }

    /// The step or IR ids the error is about.
    pub fn ids(&self) -> Vec<String> {
        match self {
            CompileError::DuplicateIrId(id) => vec![id.clone()],
            CompileError::UnknownReference { referrer, missing } => {
                vec![referrer.clone(), missing.clone()]
            }
            CompileError::UnknownPlugin { step_id, .. }
            | CompileError::UnknownOperation { step_id, .. } => vec![step_id.clone()],
            CompileError::Graph(err) => err.ids(),
            _ => Vec::new(),
        }
    }
}

/// Structural defects found while validating an emitted step graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DagError {
    #[error("Step id '{step_id}' is used by more than one step")]
    DuplicateStepId { step_id: String },

    #[error("Step '{step_id}' depends on '{dependency}', which does not exist")]
    MissingDependency { step_id: String, dependency: String },

    #[error("Circular dependency detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("internal validation error")]
    Internal,
}

impl DagError {
    pub fn code(&self) -> &'static str {
        match self {
            DagError::DuplicateStepId { .. } => "E_DUPLICATE_STEP_ID",
            DagError::MissingDependency { .. } => "E_MISSING_DEPENDENCY",
            DagError::CycleDetected { .. } => "E_CYCLE",
            DagError::Internal => "E_INTERNAL",
        }
    }

    pub fn ids(&self) -> Vec<String> {
        match self {
            DagError::DuplicateStepId { step_id } => vec![step_id.clone()],
            DagError::MissingDependency {
                step_id,
                dependency,
            } => vec![step_id.clone(), dependency.clone()],
            DagError::CycleDetected { path } => path.iter().unique().cloned().collect(),
            DagError::Internal => Vec::new(),
        }
    }
}

/// Non-fatal findings attached to a successful (or failed) compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// A step waits on more than one dependency.
    MergePoint {
        step_id: String,
        dependency_count: usize,
    },
    ExcessiveDepth { depth: usize, threshold: usize },
    LongCriticalPath { length: usize, threshold: usize },
    /// Filters on one field that no row can satisfy together.
    FilterDropsAllRows { field: String, filter_ids: Vec<String> },
    MissingActionParameter {
        step_id: String,
        plugin: String,
        operation: String,
        parameter: String,
    },
}

impl Warning {
    pub fn code(&self) -> &'static str {
        match self {
            Warning::MergePoint { .. } => "W_MERGE_POINT",
            Warning::ExcessiveDepth { .. } => "W_EXCESSIVE_DEPTH",
            Warning::LongCriticalPath { .. } => "W_LONG_CRITICAL_PATH",
            Warning::FilterDropsAllRows { .. } => "W_FILTER_DROPS_ALL_ROWS",
            Warning::MissingActionParameter { .. } => "W_MISSING_PARAMETER",
        }
    }

    pub fn ids(&self) -> Vec<String> {
        match self {
            Warning::MergePoint { step_id, .. } | Warning::MissingActionParameter { step_id, .. } => {
                vec![step_id.clone()]
            }
            Warning::FilterDropsAllRows { filter_ids, .. } => filter_ids.clone(),
            Warning::ExcessiveDepth { .. } | Warning::LongCriticalPath { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::MergePoint {
                step_id,
                dependency_count,
            } => write!(
                f,
                "Step '{}' merges {} upstream branches and waits for all of them",
                step_id, dependency_count
            ),
            Warning::ExcessiveDepth { depth, threshold } => write!(
                f,
                "Workflow depth {} exceeds {}; long chains are hard to debug",
                depth, threshold
            ),
            Warning::LongCriticalPath { length, threshold } => write!(
                f,
                "Critical path of {} steps exceeds {}; consider running independent work in parallel",
                length, threshold
            ),
            Warning::FilterDropsAllRows { field, filter_ids } => write!(
                f,
                "Filters [{}] on field '{}' contradict each other; almost every row will be dropped",
                filter_ids.join(", "),
                field
            ),
            Warning::MissingActionParameter {
                step_id,
                plugin,
                operation,
                parameter,
            } => write!(
                f,
                "Step '{}' calls {}.{} without required parameter '{}'",
                step_id, plugin, operation, parameter
            ),
        }
    }
}

/// Severity of a serialized diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// The wire form of an error or warning in the output contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
}

impl From<&CompileError> for Diagnostic {
    fn from(err: &CompileError) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            code: err.code().to_string(),
            message: err.to_string(),
            ids: err.ids(),
        }
    }
}

impl From<&Warning> for Diagnostic {
    fn from(warning: &Warning) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            code: warning.code().to_string(),
            message: warning.to_string(),
            ids: warning.ids(),
        }
    }
}

/// Errors that can occur when converting a pre-IR form into a `LogicalIr`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("Technical workflow declares more than one '{0}' step")]
    DuplicateSingleton(&'static str),

    #[error("Invalid technical workflow: {0}")]
    ValidationError(String),
}

/// Failures of the audit/session store. The tracker logs and discards these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionStoreError {
    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Session store call timed out after {0} ms")]
    Timeout(u64),

    #[error("Session store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while loading configuration or catalog documents.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the multi-stage pipeline that are not compilation failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Pipeline entry '{entry}' needs a {collaborator}, but none was configured")]
    MissingCollaborator {
        entry: &'static str,
        collaborator: &'static str,
    },

    #[error("Upstream stage '{stage}' failed: {message}")]
    UpstreamFailed { stage: String, message: String },

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}
