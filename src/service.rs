//! Query Service
//!
//! The facade tying the scheduler, worker pool, database, and output
//! store together. Callers submit ad-hoc read queries and either poll
//! (`submit` + `job_response`) or block (`submit_sync`) for the result.
//! A job's result can be retrieved exactly once; retrieval deletes it.

use crate::config::Config;
use crate::db::Database;
use crate::error::{ServiceError, SubmitError};
use crate::job::{EventHub, Job, JobDescriptor, JobEvent, JobKey, JobStatus, OutputFormat};
use crate::scheduler::{Fetched, Scheduler, WaitOutcome};
use crate::sql::parse_submission;
use crate::store::{FileStore, OutputStore};
use crate::worker::{WorkerContext, WorkerPool};
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use tracing::{debug, info};

/// A query submission: the statement text plus output options
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    /// SQL text: one SELECT, optionally preceded by a temp-table create
    pub query: String,
    /// Start row override
    #[serde(default)]
    pub offset: Option<u64>,
    /// Row-count override (the configured default applies when neither
    /// the request nor the query specifies one)
    #[serde(default)]
    pub limit: Option<u64>,
    /// Output encoding
    #[serde(default)]
    pub format: OutputFormat,
    /// Append the total row count, ignoring pagination (JSON only)
    #[serde(default)]
    pub count: bool,
    /// Append column metadata captured from the result set
    #[serde(default)]
    pub metadata: bool,
}

/// The persisted payload of a terminal job
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub status: JobStatus,
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

impl JobOutput {
    /// Whether this is the error body of a failed job
    pub fn is_failure(&self) -> bool {
        self.status == JobStatus::Failed
    }
}

/// What a poll returns: a bare status for in-flight jobs, the payload
/// (with deletion) for terminal ones
#[derive(Debug)]
pub enum JobResponse {
    Status(JobStatus),
    Output(JobOutput),
}

/// Asynchronous query-job execution service
pub struct QueryService {
    config: Config,
    scheduler: Arc<Scheduler>,
    database: Arc<dyn Database>,
    store: Arc<dyn OutputStore>,
    events: Arc<EventHub>,
    workers: WorkerPool,
}

impl QueryService {
    /// Build a service over the given collaborators and start its workers
    pub fn new(
        config: Config,
        database: Arc<dyn Database>,
        store: Arc<dyn OutputStore>,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new());
        let events = Arc::new(EventHub::new());
        let ctx = WorkerContext {
            scheduler: Arc::clone(&scheduler),
            database: Arc::clone(&database),
            store: Arc::clone(&store),
            events: Arc::clone(&events),
        };
        let workers = WorkerPool::spawn(config.workers.max(1), ctx);
        info!(workers = config.workers.max(1), "query service started");
        QueryService {
            config,
            scheduler,
            database,
            store,
            events,
            workers,
        }
    }

    /// Convenience constructor using the filesystem output store from the
    /// configuration
    pub fn with_file_store(config: Config, database: Arc<dyn Database>) -> io::Result<Self> {
        let store = Arc::new(FileStore::open(config.output.dir.clone())?);
        Ok(QueryService::new(config, database, store))
    }

    /// Validate a submission, create a pending job, and enqueue it.
    /// Returns the job descriptor immediately; poll `job_response` for
    /// the result.
    pub fn submit(
        &self,
        owner_id: u64,
        request: &SubmitRequest,
    ) -> Result<JobDescriptor, SubmitError> {
        let submission = parse_submission(&request.query)?;

        // A LIMIT written into the query wins; otherwise the request's
        // limit or the configured default applies.
        let limit = if submission.select.limit().is_none() {
            Some(request.limit.unwrap_or(self.config.default_limit))
        } else {
            request.limit
        };

        let job = Job::new(
            owner_id,
            submission.select,
            submission.temp_table,
            request.offset,
            limit,
            request.format,
            request.count,
            request.metadata,
        );
        debug!(key = %job.key(), "job submitted");
        // Publish before enqueueing so the created event always precedes
        // the worker's running update
        self.events.publish(&JobEvent::Created(job.descriptor()));
        Ok(self.scheduler.submit(job))
    }

    /// Submit and block until the job reaches a terminal state, then
    /// perform the same fetch-and-delete as a terminal poll. Bounded by
    /// the configured `sync_wait`, if any.
    pub fn submit_sync(
        &self,
        owner_id: u64,
        request: &SubmitRequest,
    ) -> Result<JobOutput, ServiceError> {
        let descriptor = self.submit(owner_id, request)?;
        let key = descriptor.key();
        match self
            .scheduler
            .wait_terminal(&key, self.config.sync_wait_timeout())
        {
            WaitOutcome::Completed => match self.scheduler.fetch(&key) {
                Some(Fetched::Terminal(job)) => self.take_output(&job),
                // Another caller beat us to the fetch, or cancellation
                // raced the publication
                _ => Err(ServiceError::NotFound),
            },
            WaitOutcome::Gone => Err(ServiceError::NotFound),
            WaitOutcome::TimedOut => Err(ServiceError::WaitTimeout),
        }
    }

    /// Poll a job. In-flight jobs report their status with no side
    /// effects; terminal jobs yield their payload and are deleted.
    /// A job owned by someone else is indistinguishable from a missing
    /// one.
    pub fn job_response(&self, owner_id: u64, job_id: &str) -> Result<JobResponse, ServiceError> {
        let key = JobKey::new(owner_id, job_id);
        match self.scheduler.fetch(&key) {
            None => Err(ServiceError::NotFound),
            Some(Fetched::InFlight(status)) => Ok(JobResponse::Status(status)),
            Some(Fetched::Terminal(job)) => Ok(JobResponse::Output(self.take_output(&job)?)),
        }
    }

    /// Cancel a pending or running job: dequeue, mark canceled, issue a
    /// best-effort native abort, and delete the job with any output it
    /// produced. A failed native abort is not an error.
    pub fn cancel(&self, owner_id: u64, job_id: &str) -> Result<JobDescriptor, ServiceError> {
        let key = JobKey::new(owner_id, job_id);
        let descriptor = self
            .scheduler
            .mark_canceled(&key)
            .ok_or(ServiceError::NotFound)?;
        self.events.publish(&JobEvent::Updated(descriptor.clone()));

        self.abort_backend(&key);

        self.scheduler.remove(&key);
        let _ = self.store.delete(&key);
        self.events.publish(&JobEvent::Deleted(key.clone()));
        info!(key = %key, "job canceled");
        Ok(descriptor)
    }

    /// Snapshot of the caller's not-yet-retrieved jobs
    pub fn list(&self, owner_id: u64) -> Vec<JobDescriptor> {
        self.scheduler.list(owner_id)
    }

    /// Schema/table/column metadata from the database, with engine
    /// system schemas filtered out
    pub fn tables(&self) -> Result<serde_json::Value, ServiceError> {
        let tables: Vec<_> = self
            .database
            .tables()?
            .into_iter()
            .filter(|t| match &t.schema {
                Some(schema) => {
                    !schema.eq_ignore_ascii_case("information_schema")
                        && !schema.to_lowercase().starts_with("pg_")
                }
                None => true,
            })
            .collect();
        Ok(serde_json::json!({ "tables": tables }))
    }

    /// Subscribe to job lifecycle events (created/updated/deleted)
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Read, then delete, a terminal job's persisted payload
    fn take_output(&self, job: &Job) -> Result<JobOutput, ServiceError> {
        let key = job.key();
        let body = self.store.read(key).map_err(crate::error::DbError::from)?;
        let _ = self.store.delete(key);
        self.events.publish(&JobEvent::Deleted(key.clone()));
        let output = match job.status {
            JobStatus::Failed => JobOutput {
                status: JobStatus::Failed,
                body,
                content_type: "text/plain",
            },
            _ => JobOutput {
                status: JobStatus::Complete,
                body,
                content_type: job.format().content_type(),
            },
        };
        Ok(output)
    }

    /// Find the backend process running this job's tagged statements and
    /// ask the engine to abort it. Every failure here is absorbed: the
    /// cancel flag alone is enough, the query's output will be discarded.
    fn abort_backend(&self, key: &JobKey) {
        let mut conn = match self.database.connection() {
            Ok(conn) => conn,
            Err(e) => {
                debug!(error = %e, "no connection for native abort");
                return;
            }
        };
        let tag = key.to_string();
        match self.database.find_backend(conn.as_mut(), &tag) {
            Ok(Some(pid)) => match self.database.cancel_backend(conn.as_mut(), pid) {
                Ok(true) => debug!(pid, "backend aborted"),
                Ok(false) => debug!(pid, "backend did not acknowledge abort"),
                Err(e) => debug!(error = %e, "native abort failed"),
            },
            Ok(None) => {}
            Err(e) => debug!(error = %e, "backend lookup failed"),
        }
    }
}

impl Drop for QueryService {
    fn drop(&mut self) {
        self.scheduler.shutdown();
        self.workers.join();
    }
}
