//! The multi-stage generation pipeline: plan generation, optional technical
//! review, IR normalization and DSL compilation, each tracked as a session stage.
//!
//! Where the pipeline starts is an explicit [`PipelineEntry`] rather than a set of
//! skip flags, so every entry only carries the inputs it actually needs.
use crate::compiler::{CompilationOutput, Compiler};
use crate::config::TrackingConfig;
use crate::error::PipelineError;
use crate::ir::{IntoLogicalIr, LogicalIr, TechnicalWorkflow};
use crate::session::{ProviderContext, SessionInput, SessionRecorder, SessionStore, TrackingHandle};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const STAGE_PLAN_GENERATION: &str = "plan_generation";
pub const STAGE_TECHNICAL_REVIEW: &str = "technical_review";
pub const STAGE_IR_NORMALIZATION: &str = "ir_normalization";
pub const STAGE_DSL_COMPILATION: &str = "dsl_compilation";

/// Turns an enhanced prompt into a Logical IR (typically an LLM call).
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    fn provider(&self) -> ProviderContext;
    async fn generate(&self, prompt: &str) -> Result<LogicalIr, PipelineError>;
}

/// Reviews a technical workflow, optionally applying a human correction.
#[async_trait]
pub trait WorkflowReviewer: Send + Sync {
    fn provider(&self) -> ProviderContext;
    async fn review(
        &self,
        workflow: TechnicalWorkflow,
        correction: Option<&str>,
    ) -> Result<TechnicalWorkflow, PipelineError>;
}

#[derive(Debug, Clone)]
pub enum PipelineEntry {
    /// Generate the IR from a prompt, then compile it.
    FromPrompt { prompt: String },
    /// Compile an IR supplied by the caller.
    FromLogicalIr(LogicalIr),
    /// Review a technical workflow, normalize it and compile it.
    FromTechnicalWorkflow {
        workflow: TechnicalWorkflow,
        correction: Option<String>,
    },
    /// Normalize an already-reviewed technical workflow and compile it.
    FromReviewedWorkflow(TechnicalWorkflow),
}

impl PipelineEntry {
    fn name(&self) -> &'static str {
        match self {
            PipelineEntry::FromPrompt { .. } => "from_prompt",
            PipelineEntry::FromLogicalIr(_) => "from_logical_ir",
            PipelineEntry::FromTechnicalWorkflow { .. } => "from_technical_workflow",
            PipelineEntry::FromReviewedWorkflow(_) => "from_reviewed_workflow",
        }
    }

    fn session_input(&self) -> SessionInput {
        match self {
            PipelineEntry::FromPrompt { prompt } => SessionInput::EnhancedPrompt(prompt.clone()),
            PipelineEntry::FromLogicalIr(ir) => SessionInput::LogicalIr(snapshot(ir)),
            PipelineEntry::FromTechnicalWorkflow { workflow, .. }
            | PipelineEntry::FromReviewedWorkflow(workflow) => {
                SessionInput::TechnicalWorkflow(snapshot(workflow))
            }
        }
    }
}

/// The outcome of one pipeline run. `result` never depends on whether the
/// session could be recorded; records may still be in flight when the run
/// returns, and `tracking` can be flushed to wait for them.
#[derive(Debug)]
pub struct PipelineRun {
    pub session_id: Option<Uuid>,
    pub result: Result<CompilationOutput, PipelineError>,
    pub tracking: TrackingHandle,
}

fn snapshot<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "unserializable": e.to_string() }))
}

fn outcome<T: Serialize, E: std::fmt::Display>(result: &Result<T, E>) -> Value {
    match result {
        Ok(value) => snapshot(value),
        Err(err) => json!({ "error": err.to_string() }),
    }
}

pub struct Pipeline {
    compiler: Arc<Compiler>,
    store: Arc<dyn SessionStore>,
    tracking: TrackingConfig,
    generator: Option<Arc<dyn PlanGenerator>>,
    reviewer: Option<Arc<dyn WorkflowReviewer>>,
}

impl Pipeline {
    pub fn new(compiler: Arc<Compiler>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            compiler,
            store,
            tracking: TrackingConfig::default(),
            generator: None,
            reviewer: None,
        }
    }

    pub fn with_tracking_config(mut self, tracking: TrackingConfig) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn PlanGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn WorkflowReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub async fn run(&self, entry: PipelineEntry) -> PipelineRun {
        let tracker = SessionRecorder::spawn(Arc::clone(&self.store), &self.tracking);
        let provider = match &entry {
            PipelineEntry::FromPrompt { .. } => self.generator.as_ref().map(|g| g.provider()),
            PipelineEntry::FromTechnicalWorkflow { .. } => {
                self.reviewer.as_ref().map(|r| r.provider())
            }
            _ => None,
        };
        let entry_name = entry.name();
        tracker.start(entry.session_input(), provider);

        let result = self.execute(entry, &tracker).await;
        match &result {
            Ok(output) if output.is_success() => tracker.complete(snapshot(output)),
            Ok(output) => {
                let summary = output
                    .errors()
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                tracker.fail(summary);
            }
            Err(err) => {
                warn!(entry = entry_name, error = %err, "pipeline stopped before compilation");
                tracker.fail(err.to_string());
            }
        }

        let session_id = tracker.session_id();
        info!(
            entry = entry_name,
            %session_id,
            success = matches!(&result, Ok(output) if output.is_success()),
            "pipeline run finished"
        );
        PipelineRun {
            session_id: Some(session_id),
            result,
            tracking: tracker.finish(),
        }
    }

    async fn execute(
        &self,
        entry: PipelineEntry,
        tracker: &SessionRecorder,
    ) -> Result<CompilationOutput, PipelineError> {
        let entry_name = entry.name();
        let ir = match entry {
            PipelineEntry::FromPrompt { prompt } => {
                let generator = self.generator.as_ref().ok_or(PipelineError::MissingCollaborator {
                    entry: entry_name,
                    collaborator: "plan generator",
                })?;
                tracker.add_stage(STAGE_PLAN_GENERATION, json!({ "prompt": prompt }));
                let generated = generator.generate(&prompt).await;
                tracker.complete_stage(outcome(&generated));
                generated?
            }
            PipelineEntry::FromLogicalIr(ir) => ir,
            PipelineEntry::FromTechnicalWorkflow {
                workflow,
                correction,
            } => {
                let reviewer = self.reviewer.as_ref().ok_or(PipelineError::MissingCollaborator {
                    entry: entry_name,
                    collaborator: "workflow reviewer",
                })?;
                tracker.add_stage(
                    STAGE_TECHNICAL_REVIEW,
                    json!({ "workflow": snapshot(&workflow), "correction": correction }),
                );
                let reviewed = reviewer.review(workflow, correction.as_deref()).await;
                tracker.complete_stage(outcome(&reviewed));
                Self::normalize(reviewed?, tracker)?
            }
            PipelineEntry::FromReviewedWorkflow(workflow) => Self::normalize(workflow, tracker)?,
        };

        tracker.add_stage(STAGE_DSL_COMPILATION, snapshot(&ir));
        let output = self.compiler.compile(&ir);
        tracker.complete_stage(snapshot(&output));
        Ok(output)
    }

    fn normalize(
        workflow: TechnicalWorkflow,
        tracker: &SessionRecorder,
    ) -> Result<LogicalIr, PipelineError> {
        tracker.add_stage(STAGE_IR_NORMALIZATION, snapshot(&workflow));
        let normalized = workflow.into_logical_ir();
        tracker.complete_stage(outcome(&normalized));
        Ok(normalized?)
    }
}
