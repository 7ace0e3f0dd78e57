use super::{GenerationSession, SessionStatus, StageRecord};
use crate::error::SessionStoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Append-only persistence for generation sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a freshly started session.
    async fn create_session(&self, session: &GenerationSession) -> Result<(), SessionStoreError>;

    /// Append a stage record to an open session.
    async fn append_stage(
        &self,
        session_id: Uuid,
        stage: &StageRecord,
    ) -> Result<(), SessionStoreError>;

    /// Attach the output of a previously appended stage.
    async fn record_stage_completion(
        &self,
        session_id: Uuid,
        index: u32,
        output: &Value,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SessionStoreError>;

    /// Close the session with its terminal status.
    async fn close_session(
        &self,
        session_id: Uuid,
        status: &SessionStatus,
        closed_at: DateTime<Utc>,
    ) -> Result<(), SessionStoreError>;
}

/// Session store backed by a map, for tests and single-process use.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<BTreeMap<Uuid, GenerationSession>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, session_id: Uuid) -> Option<GenerationSession> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn not_found(session_id: Uuid) -> SessionStoreError {
    SessionStoreError::SessionNotFound(session_id.to_string())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, session: &GenerationSession) -> Result<(), SessionStoreError> {
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn append_stage(
        &self,
        session_id: Uuid,
        stage: &StageRecord,
    ) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| not_found(session_id))?;
        session.stages.push(stage.clone());
        Ok(())
    }

    async fn record_stage_completion(
        &self,
        session_id: Uuid,
        index: u32,
        output: &Value,
        completed_at: DateTime<Utc>,
    ) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| not_found(session_id))?;
        match session.stages.iter_mut().find(|s| s.index == index) {
            Some(stage) => {
                stage.output = Some(output.clone());
                stage.completed_at = Some(completed_at);
            }
            // A completion whose stage record was lost is still kept.
            None => session.stages.push(StageRecord {
                index,
                name: String::new(),
                input: Value::Null,
                output: Some(output.clone()),
                started_at: completed_at,
                completed_at: Some(completed_at),
            }),
        }
        Ok(())
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        status: &SessionStatus,
        closed_at: DateTime<Utc>,
    ) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| not_found(session_id))?;
        session.status = status.clone();
        session.closed_at = Some(closed_at);
        Ok(())
    }
}
