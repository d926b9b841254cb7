//! Remote store seam: the batch wire shape plus the HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SessionRecord;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote store is not configured")]
    NotConfigured,
    #[error("remote store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote store rejected batch with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("record {0} has not ended and cannot be synced")]
    OpenRecord(String),
}

/// One session as the remote store expects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteSessionRecord {
    pub session_id: String,
    pub app_name: String,
    pub task_id: Option<i64>,
    pub start_time: String,
    pub end_time: String,
    pub duration_ms: u64,
    pub total_paused_time_ms: u64,
    pub created_at: String,
}

impl TryFrom<&SessionRecord> for RemoteSessionRecord {
    type Error = SyncError;

    fn try_from(record: &SessionRecord) -> Result<Self, Self::Error> {
        let end_time = record
            .end_time
            .ok_or_else(|| SyncError::OpenRecord(record.id.clone()))?;
        let start_time = record.start_time.to_rfc3339_opts(SecondsFormat::Millis, true);

        Ok(Self {
            session_id: record.id.clone(),
            app_name: record.app_name.clone(),
            task_id: record.task_id,
            end_time: end_time.to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: record.duration_ms.unwrap_or(0),
            total_paused_time_ms: record.total_paused_time,
            created_at: start_time.clone(),
            start_time,
        })
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Submits one batch. Any error fails the whole batch.
    async fn submit(&self, batch: &[RemoteSessionRecord]) -> Result<(), SyncError>;
}

/// Stand-in used when no remote URL is configured. Every submission fails,
/// so records stay unsynced on disk instead of being dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRemoteStore;

#[async_trait]
impl RemoteStore for NoopRemoteStore {
    async fn submit(&self, _batch: &[RemoteSessionRecord]) -> Result<(), SyncError> {
        Err(SyncError::NotConfigured)
    }
}

/// POSTs the batch as a JSON array to a single endpoint.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    endpoint: String,
    client: Client,
}

impl HttpRemoteStore {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn submit(&self, batch: &[RemoteSessionRecord]) -> Result<(), SyncError> {
        debug!("Submitting {} sessions to {}", batch.len(), self.endpoint);

        let response = self.client.post(&self.endpoint).json(batch).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
