//! Audit trail of one generation pipeline run.
//!
//! The tracker is strictly best-effort: every store call is bounded by a timeout,
//! and failures are logged and reported as [`Tracked::Dropped`] instead of being
//! raised, so tracking can never change the outcome of a compilation.
//!
//! [`SessionRecorder`] puts a tracker behind a background writer task, so callers
//! hand records off without ever waiting on the store.
pub mod store;

pub use store::{InMemorySessionStore, SessionStore};

use crate::config::TrackingConfig;
use crate::error::SessionStoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Which artifact the pipeline started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPath {
    IrFirst,
    TechnicalWorkflowFirst,
}

/// The initial input recorded at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum SessionInput {
    EnhancedPrompt(String),
    LogicalIr(Value),
    TechnicalWorkflow(Value),
}

impl SessionInput {
    pub fn path(&self) -> InputPath {
        match self {
            SessionInput::EnhancedPrompt(_) | SessionInput::LogicalIr(_) => InputPath::IrFirst,
            SessionInput::TechnicalWorkflow(_) => InputPath::TechnicalWorkflowFirst,
        }
    }
}

/// The AI provider and model behind the upstream stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderContext {
    pub provider: String,
    pub model: String,
}

impl ProviderContext {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub index: u32,
    pub name: String,
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed { output: Value },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSession {
    pub id: Uuid,
    pub input_path: InputPath,
    pub input: SessionInput,
    #[serde(default)]
    pub provider: Option<ProviderContext>,
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

/// Outcome of one tracker call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracked {
    /// The store accepted the record.
    Recorded,
    /// The store failed or timed out; the record was logged and discarded.
    Dropped,
    /// The call was out of order for the lifecycle and nothing was sent.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackerState {
    NotStarted,
    Started {
        session_id: Uuid,
        open_stage: Option<u32>,
    },
    Closed {
        session_id: Uuid,
    },
}

/// Drives one session through `start → (add_stage → complete_stage)* →
/// complete | fail`.
pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
    timeout: Duration,
    state: TrackerState,
    next_index: u32,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn SessionStore>, config: &TrackingConfig) -> Self {
        Self {
            store,
            timeout: config.store_timeout(),
            state: TrackerState::NotStarted,
            next_index: 0,
        }
    }

    pub fn session_id(&self) -> Option<Uuid> {
        match self.state {
            TrackerState::NotStarted => None,
            TrackerState::Started { session_id, .. } | TrackerState::Closed { session_id } => {
                Some(session_id)
            }
        }
    }

    /// Index the next stage will receive.
    pub fn stage_index(&self) -> u32 {
        self.next_index
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, TrackerState::Closed { .. })
    }

    pub async fn start(&mut self, input: SessionInput, provider: Option<ProviderContext>) -> Tracked {
        self.start_with_id(Uuid::new_v4(), input, provider).await
    }

    /// Starts the session under an id chosen by the caller.
    pub async fn start_with_id(
        &mut self,
        session_id: Uuid,
        input: SessionInput,
        provider: Option<ProviderContext>,
    ) -> Tracked {
        if self.state != TrackerState::NotStarted {
            warn!("session already started; ignoring start");
            return Tracked::Skipped;
        }

        let session = GenerationSession {
            id: session_id,
            input_path: input.path(),
            input,
            provider,
            stages: Vec::new(),
            status: SessionStatus::InProgress,
            created_at: Utc::now(),
            closed_at: None,
        };
        self.state = TrackerState::Started {
            session_id: session.id,
            open_stage: None,
        };
        debug!(session_id = %session.id, path = ?session.input_path, "session started");

        let store = Arc::clone(&self.store);
        self.persist("create_session", async move { store.create_session(&session).await })
            .await
    }

    pub async fn add_stage(&mut self, name: &str, input: Value) -> Tracked {
        let TrackerState::Started { session_id, .. } = self.state else {
            warn!(stage = name, "stage added outside an open session");
            return Tracked::Skipped;
        };

        let index = self.next_index;
        self.state = TrackerState::Started {
            session_id,
            open_stage: Some(index),
        };
        let record = StageRecord {
            index,
            name: name.to_string(),
            input,
            output: None,
            started_at: Utc::now(),
            completed_at: None,
        };

        let store = Arc::clone(&self.store);
        self.persist("append_stage", async move {
            store.append_stage(session_id, &record).await
        })
        .await
    }

    /// Records the output of the open stage. The stage index advances whatever
    /// the output says.
    pub async fn complete_stage(&mut self, output: Value) -> Tracked {
        let TrackerState::Started {
            session_id,
            open_stage,
        } = self.state
        else {
            warn!("stage completed outside an open session");
            return Tracked::Skipped;
        };

        let index = open_stage.unwrap_or(self.next_index);
        self.next_index += 1;
        self.state = TrackerState::Started {
            session_id,
            open_stage: None,
        };

        let store = Arc::clone(&self.store);
        self.persist("record_stage_completion", async move {
            store
                .record_stage_completion(session_id, index, &output, Utc::now())
                .await
        })
        .await
    }

    pub async fn complete(&mut self, output: Value) -> Tracked {
        self.close(SessionStatus::Completed { output }).await
    }

    pub async fn fail(&mut self, error: impl Into<String>) -> Tracked {
        self.close(SessionStatus::Failed {
            error: error.into(),
        })
        .await
    }

    async fn close(&mut self, status: SessionStatus) -> Tracked {
        let TrackerState::Started { session_id, .. } = self.state else {
            warn!("session is not open; ignoring close");
            return Tracked::Skipped;
        };
        self.state = TrackerState::Closed { session_id };

        let store = Arc::clone(&self.store);
        self.persist("close_session", async move {
            store.close_session(session_id, &status, Utc::now()).await
        })
        .await
    }

    async fn persist<F>(&self, operation: &'static str, call: F) -> Tracked
    where
        F: Future<Output = Result<(), SessionStoreError>>,
    {
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SessionStoreError::Timeout(self.timeout.as_millis() as u64)),
        };
        match result {
            Ok(()) => Tracked::Recorded,
            Err(err) => {
                warn!(
                    operation,
                    session_id = ?self.session_id(),
                    error = %err,
                    "dropping session record"
                );
                Tracked::Dropped
            }
        }
    }
}

/// A tracker call handed to the background writer.
#[derive(Debug)]
enum TrackEvent {
    Start {
        input: SessionInput,
        provider: Option<ProviderContext>,
    },
    AddStage {
        name: String,
        input: Value,
    },
    CompleteStage {
        output: Value,
    },
    Complete {
        output: Value,
    },
    Fail {
        error: String,
    },
}

/// Fire-and-forget front end of a [`SessionTracker`].
///
/// Calls only enqueue a record; one writer task applies them to the store in
/// order, each under the tracker's timeout. Outside a tokio runtime nothing is
/// spawned and every record is dropped with a warning.
pub struct SessionRecorder {
    session_id: Uuid,
    events: Option<mpsc::UnboundedSender<TrackEvent>>,
    writer: Option<JoinHandle<()>>,
}

impl SessionRecorder {
    pub fn spawn(store: Arc<dyn SessionStore>, config: &TrackingConfig) -> Self {
        let session_id = Uuid::new_v4();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%session_id, "no async runtime available; session will not be recorded");
            return Self {
                session_id,
                events: None,
                writer: None,
            };
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let tracker = SessionTracker::new(store, config);
        let writer = runtime.spawn(write_events(session_id, tracker, receiver));
        Self {
            session_id,
            events: Some(sender),
            writer: Some(writer),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn start(&self, input: SessionInput, provider: Option<ProviderContext>) {
        self.send(TrackEvent::Start { input, provider });
    }

    pub fn add_stage(&self, name: &str, input: Value) {
        self.send(TrackEvent::AddStage {
            name: name.to_string(),
            input,
        });
    }

    pub fn complete_stage(&self, output: Value) {
        self.send(TrackEvent::CompleteStage { output });
    }

    pub fn complete(&self, output: Value) {
        self.send(TrackEvent::Complete { output });
    }

    pub fn fail(&self, error: impl Into<String>) {
        self.send(TrackEvent::Fail {
            error: error.into(),
        });
    }

    /// Stops accepting records and hands back the writer, which drains whatever
    /// is still queued.
    pub fn finish(mut self) -> TrackingHandle {
        self.events = None;
        TrackingHandle {
            writer: self.writer.take(),
        }
    }

    fn send(&self, event: TrackEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if events.send(event).is_err() {
            warn!(session_id = %self.session_id, "session writer is gone; dropping record");
        }
    }
}

async fn write_events(
    session_id: Uuid,
    mut tracker: SessionTracker,
    mut events: mpsc::UnboundedReceiver<TrackEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TrackEvent::Start { input, provider } => {
                tracker.start_with_id(session_id, input, provider).await
            }
            TrackEvent::AddStage { name, input } => tracker.add_stage(&name, input).await,
            TrackEvent::CompleteStage { output } => tracker.complete_stage(output).await,
            TrackEvent::Complete { output } => tracker.complete(output).await,
            TrackEvent::Fail { error } => tracker.fail(error).await,
        };
    }
    debug!(%session_id, "session writer finished");
}

/// The background writer of a finished [`SessionRecorder`]. Dropping it leaves
/// the writer running detached.
#[derive(Debug, Default)]
pub struct TrackingHandle {
    writer: Option<JoinHandle<()>>,
}

impl TrackingHandle {
    /// Waits until every queued record has been written or dropped.
    pub async fn flush(self) {
        let Some(writer) = self.writer else {
            return;
        };
        if let Err(err) = writer.await {
            warn!(error = %err, "session writer stopped abnormally");
        }
    }
}
