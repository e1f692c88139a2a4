//! Query Jobs
//!
//! The central entity: one submitted query's full execution record. A job
//! is identified by its composite key `owner:id`, which doubles as the
//! tenant-isolation boundary - callers can only see jobs under their own
//! owner id.

use crate::sql::{CreateTempTable, SelectStatement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Composite job identifier: `owner:id`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub owner_id: u64,
    pub job_id: String,
}

impl JobKey {
    pub fn new(owner_id: u64, job_id: impl Into<String>) -> Self {
        JobKey {
            owner_id,
            job_id: job_id.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner_id, self.job_id)
    }
}

/// Job lifecycle state.
///
/// Transitions are monotonic toward a terminal value, except that
/// `Canceled` may preempt `Pending` or `Running` at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Canceled,
}

impl JobStatus {
    /// Terminal states admit no further transition
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized output encoding for a finished job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Tsv,
}

impl OutputFormat {
    /// Parse a format name, falling back to JSON for anything unrecognized
    /// (matches the permissive submission contract)
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "csv" => OutputFormat::Csv,
            "tsv" => OutputFormat::Tsv,
            _ => OutputFormat::Json,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Json => "application/json",
            OutputFormat::Csv => "text/csv",
            OutputFormat::Tsv => "text/plain",
        }
    }

    /// Field delimiter for the tabular formats
    pub fn delimiter(self) -> Option<char> {
        match self {
            OutputFormat::Json => None,
            OutputFormat::Csv => Some(','),
            OutputFormat::Tsv => Some('\t'),
        }
    }
}

/// One submitted query's execution record
#[derive(Debug, Clone)]
pub struct Job {
    key: JobKey,
    select: SelectStatement,
    temp_table: Option<CreateTempTable>,
    format: OutputFormat,
    count_total: bool,
    include_metadata: bool,
    pub status: JobStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Job {
    /// Create a pending job with a fresh uuid under the given owner.
    /// Pagination overrides are merged into the SELECT here.
    pub fn new(
        owner_id: u64,
        mut select: SelectStatement,
        temp_table: Option<CreateTempTable>,
        offset: Option<u64>,
        limit: Option<u64>,
        format: OutputFormat,
        count_total: bool,
        include_metadata: bool,
    ) -> Self {
        if let Some(offset) = offset {
            select.set_offset(offset);
        }
        if let Some(limit) = limit {
            select.set_limit(limit);
        }
        let now = Utc::now();
        Job {
            key: JobKey::new(owner_id, Uuid::new_v4().to_string()),
            select,
            temp_table,
            format,
            count_total,
            include_metadata,
            status: JobStatus::Pending,
            created: now,
            updated: now,
        }
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn owner_id(&self) -> u64 {
        self.key.owner_id
    }

    pub fn select(&self) -> &SelectStatement {
        &self.select
    }

    pub fn temp_table(&self) -> Option<&CreateTempTable> {
        self.temp_table.as_ref()
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Whether the worker should run the companion count query. Only the
    /// JSON trailer can carry `total_rows`, so the count is skipped for
    /// the tabular formats.
    pub fn count_total(&self) -> bool {
        self.count_total && self.format == OutputFormat::Json
    }

    pub fn include_metadata(&self) -> bool {
        self.include_metadata
    }

    pub fn is_canceled(&self) -> bool {
        self.status == JobStatus::Canceled
    }

    /// Apply a status transition, touching the `updated` timestamp
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated = Utc::now();
    }

    /// Immutable snapshot handed to callers
    pub fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            user_id: self.key.owner_id,
            job_id: self.key.job_id.clone(),
            status: self.status,
            query: self.select.to_query_string(),
            created_at: self.created,
            updated_at: self.updated,
        }
    }
}

/// Caller-visible job snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub user_id: u64,
    pub job_id: String,
    pub status: JobStatus,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.user_id, self.job_id.clone())
    }
}

/// Lifecycle notification emitted whenever a job is created, updated, or
/// deleted (e.g. for relaying status over websockets)
#[derive(Debug, Clone)]
pub enum JobEvent {
    Created(JobDescriptor),
    Updated(JobDescriptor),
    Deleted(JobKey),
}

/// Fan-out of job lifecycle events to any number of subscribers.
/// Disconnected receivers are dropped on the next publish.
#[derive(Default)]
pub struct EventHub {
    senders: parking_lot::Mutex<Vec<crossbeam_channel::Sender<JobEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        EventHub::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<JobEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.senders.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber
    pub fn publish(&self, event: &JobEvent) {
        self.senders
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
