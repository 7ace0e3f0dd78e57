//! Tests for the multi-stage generation pipeline.
mod common;
use async_trait::async_trait;
use common::*;
use pilotc::error::PipelineError;
use pilotc::ir::TechnicalWorkflow;
use pilotc::pipeline::{
    Pipeline, PipelineEntry, PlanGenerator, STAGE_DSL_COMPILATION, STAGE_IR_NORMALIZATION,
    STAGE_PLAN_GENERATION, STAGE_TECHNICAL_REVIEW, WorkflowReviewer,
};
use pilotc::prelude::*;
use pilotc::session::{
    GenerationSession, InMemorySessionStore, ProviderContext, SessionStatus, SessionStore,
    StageRecord,
};
use chrono::{DateTime, Utc};
use pilotc::config::TrackingConfig;
use pilotc::error::SessionStoreError;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Answers every prompt with a fixed IR.
struct FixedGenerator(LogicalIr);

#[async_trait]
impl PlanGenerator for FixedGenerator {
    fn provider(&self) -> ProviderContext {
        ProviderContext::new("test-provider", "planner")
    }
    async fn generate(&self, _prompt: &str) -> std::result::Result<LogicalIr, PipelineError> {
        Ok(self.0.clone())
    }
}

struct BrokenGenerator;

#[async_trait]
impl PlanGenerator for BrokenGenerator {
    fn provider(&self) -> ProviderContext {
        ProviderContext::new("test-provider", "planner")
    }
    async fn generate(&self, _prompt: &str) -> std::result::Result<LogicalIr, PipelineError> {
        Err(PipelineError::UpstreamFailed {
            stage: "plan_generation".to_string(),
            message: "model returned malformed JSON".to_string(),
        })
    }
}

/// Applies a correction by replacing the workflow goal.
struct GoalReviewer;

#[async_trait]
impl WorkflowReviewer for GoalReviewer {
    fn provider(&self) -> ProviderContext {
        ProviderContext::new("test-provider", "reviewer")
    }
    async fn review(
        &self,
        mut workflow: TechnicalWorkflow,
        correction: Option<&str>,
    ) -> std::result::Result<TechnicalWorkflow, PipelineError> {
        if let Some(correction) = correction {
            workflow.goal = correction.to_string();
        }
        Ok(workflow)
    }
}

/// An audit store that takes seconds to answer every call.
struct SluggishStore;

impl SluggishStore {
    async fn stall() -> std::result::Result<(), SessionStoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SluggishStore {
    async fn create_session(
        &self,
        _: &GenerationSession,
    ) -> std::result::Result<(), SessionStoreError> {
        Self::stall().await
    }
    async fn append_stage(
        &self,
        _: Uuid,
        _: &StageRecord,
    ) -> std::result::Result<(), SessionStoreError> {
        Self::stall().await
    }
    async fn record_stage_completion(
        &self,
        _: Uuid,
        _: u32,
        _: &Value,
        _: DateTime<Utc>,
    ) -> std::result::Result<(), SessionStoreError> {
        Self::stall().await
    }
    async fn close_session(
        &self,
        _: Uuid,
        _: &SessionStatus,
        _: DateTime<Utc>,
    ) -> std::result::Result<(), SessionStoreError> {
        Self::stall().await
    }
}

fn technical_workflow() -> TechnicalWorkflow {
    serde_json::from_value(json!({
        "goal": "Email overdue invoices",
        "technical_steps": [
            { "kind": "fetch", "id": "invoices", "type": "tabular", "source": "google-sheets", "location": "Invoices!A:E" },
            { "kind": "filter", "id": "overdue", "field": "status", "operator": "equals", "value": "overdue" },
            { "kind": "deliver", "id": "finance", "method": "email", "plugin_key": "google-mail", "recipient": "finance@example.com" }
        ]
    }))
    .unwrap()
}

fn pipeline(store: &InMemorySessionStore) -> Pipeline {
    Pipeline::new(Arc::new(create_compiler()), Arc::new(store.clone()))
}

fn stage_names(session: &pilotc::session::GenerationSession) -> Vec<&str> {
    session.stages.iter().map(|s| s.name.as_str()).collect()
}

#[test]
fn test_prompt_entry_runs_generation_and_compilation() {
    tokio_test::block_on(async {
        let store = InMemorySessionStore::new();
        let pipeline = pipeline(&store).with_generator(Arc::new(FixedGenerator(create_simple_ir())));

        let run = pipeline
            .run(PipelineEntry::FromPrompt {
                prompt: "email finance the overdue invoices".to_string(),
            })
            .await;

        let output = run.result.expect("pipeline completes");
        assert!(output.is_success());

        run.tracking.flush().await;
        let session = store.get(run.session_id.unwrap()).await.unwrap();
        assert_eq!(
            stage_names(&session),
            vec![STAGE_PLAN_GENERATION, STAGE_DSL_COMPILATION]
        );
        assert_eq!(session.provider.unwrap().model, "planner");
        assert!(matches!(session.status, SessionStatus::Completed { .. }));
    });
}

#[test]
fn test_ir_entry_skips_generation() {
    tokio_test::block_on(async {
        let store = InMemorySessionStore::new();
        let run = pipeline(&store)
            .run(PipelineEntry::FromLogicalIr(create_dedup_ir()))
            .await;

        let workflow = run.result.unwrap().into_result().unwrap();
        assert_eq!(workflow.workflow_steps.len(), 8);

        run.tracking.flush().await;
        let session = store.get(run.session_id.unwrap()).await.unwrap();
        assert_eq!(stage_names(&session), vec![STAGE_DSL_COMPILATION]);
        assert!(session.provider.is_none());
    });
}

#[test]
fn test_technical_entry_reviews_then_normalizes() {
    tokio_test::block_on(async {
        let store = InMemorySessionStore::new();
        let pipeline = pipeline(&store).with_reviewer(Arc::new(GoalReviewer));

        let run = pipeline
            .run(PipelineEntry::FromTechnicalWorkflow {
                workflow: technical_workflow(),
                correction: Some("Email overdue invoices to finance".to_string()),
            })
            .await;

        let workflow = run.result.unwrap().into_result().unwrap();
        assert_eq!(
            workflow.dsl_wrapper.description,
            "Email overdue invoices to finance"
        );

        run.tracking.flush().await;
        let session = store.get(run.session_id.unwrap()).await.unwrap();
        assert_eq!(
            stage_names(&session),
            vec![
                STAGE_TECHNICAL_REVIEW,
                STAGE_IR_NORMALIZATION,
                STAGE_DSL_COMPILATION
            ]
        );
        let indices: Vec<u32> = session.stages.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    });
}

#[test]
fn test_reviewed_entry_only_normalizes() {
    tokio_test::block_on(async {
        let store = InMemorySessionStore::new();
        let run = pipeline(&store)
            .run(PipelineEntry::FromReviewedWorkflow(technical_workflow()))
            .await;

        assert!(run.result.unwrap().is_success());
        run.tracking.flush().await;
        let session = store.get(run.session_id.unwrap()).await.unwrap();
        assert_eq!(
            stage_names(&session),
            vec![STAGE_IR_NORMALIZATION, STAGE_DSL_COMPILATION]
        );
    });
}

#[test]
fn test_missing_generator_is_an_error() {
    tokio_test::block_on(async {
        let store = InMemorySessionStore::new();
        let run = pipeline(&store)
            .run(PipelineEntry::FromPrompt {
                prompt: "anything".to_string(),
            })
            .await;

        assert_eq!(
            run.result.unwrap_err(),
            PipelineError::MissingCollaborator {
                entry: "from_prompt",
                collaborator: "plan generator",
            }
        );
        run.tracking.flush().await;
        let session = store.get(run.session_id.unwrap()).await.unwrap();
        assert!(session.stages.is_empty());
        assert!(matches!(session.status, SessionStatus::Failed { .. }));
    });
}

#[test]
fn test_upstream_failure_closes_session_as_failed() {
    tokio_test::block_on(async {
        let store = InMemorySessionStore::new();
        let run = pipeline(&store)
            .with_generator(Arc::new(BrokenGenerator))
            .run(PipelineEntry::FromPrompt {
                prompt: "anything".to_string(),
            })
            .await;

        assert!(matches!(
            run.result,
            Err(PipelineError::UpstreamFailed { .. })
        ));
        run.tracking.flush().await;
        let session = store.get(run.session_id.unwrap()).await.unwrap();
        assert_eq!(stage_names(&session), vec![STAGE_PLAN_GENERATION]);
        assert_eq!(
            session.stages[0].output,
            Some(json!({ "error": "Upstream stage 'plan_generation' failed: model returned malformed JSON" }))
        );
    });
}

#[test]
fn test_compilation_failure_is_recorded() {
    tokio_test::block_on(async {
        let store = InMemorySessionStore::new();
        let mut ir = create_simple_ir();
        ir.delivery.clear();

        let run = pipeline(&store).run(PipelineEntry::FromLogicalIr(ir)).await;

        let output = run.result.expect("compilation failures are not pipeline errors");
        assert!(!output.is_success());
        run.tracking.flush().await;
        let session = store.get(run.session_id.unwrap()).await.unwrap();
        match session.status {
            SessionStatus::Failed { error } => assert!(error.contains("no delivery")),
            other => panic!("Expected failed session, got {:?}", other),
        }
    });
}

#[test]
fn test_duplicate_render_step_fails_normalization() {
    tokio_test::block_on(async {
        let store = InMemorySessionStore::new();
        let mut workflow = technical_workflow();
        let render: pilotc::ir::TechnicalStep =
            serde_json::from_value(json!({ "kind": "render", "type": "table" })).unwrap();
        workflow.technical_steps.push(render.clone());
        workflow.technical_steps.push(render);

        let run = pipeline(&store)
            .run(PipelineEntry::FromReviewedWorkflow(workflow))
            .await;

        assert!(matches!(run.result, Err(PipelineError::Conversion(_))));
    });
}

#[test]
fn test_slow_store_does_not_delay_compilation() {
    tokio_test::block_on(async {
        let pipeline = Pipeline::new(Arc::new(create_compiler()), Arc::new(SluggishStore))
            .with_tracking_config(TrackingConfig {
                store_timeout_ms: 2_000,
            });

        let started = Instant::now();
        let run = pipeline
            .run(PipelineEntry::FromLogicalIr(create_simple_ir()))
            .await;

        assert!(
            started.elapsed() < Duration::from_millis(500),
            "pipeline waited on the audit store for {:?}",
            started.elapsed()
        );
        assert!(run.result.unwrap().is_success());
        assert!(run.session_id.is_some());
    });
}

#[test]
fn test_flush_waits_for_every_record() {
    tokio_test::block_on(async {
        let store = InMemorySessionStore::new();
        let run = pipeline(&store)
            .run(PipelineEntry::FromLogicalIr(create_simple_ir()))
            .await;

        run.tracking.flush().await;
        let session = store.get(run.session_id.unwrap()).await.unwrap();
        assert_eq!(stage_names(&session), vec![STAGE_DSL_COMPILATION]);
        assert!(session.stages.iter().all(|s| s.completed_at.is_some()));
        assert!(matches!(session.status, SessionStatus::Completed { .. }));
        assert!(session.closed_at.is_some());
    });
}
