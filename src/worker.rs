//! Worker Pool & Execution Engine
//!
//! A fixed pool of blocking worker threads. Each worker dequeues a pending
//! job, runs it against the database collaborator, streams rows through
//! the writer, persists the payload, and publishes the terminal state.
//!
//! Every statement a worker sends is prefixed with an SQL comment carrying
//! the job key. The tag is how cancellation locates the live backend
//! process in the engine's session view.
//!
//! Cancellation is observed at each external call boundary: after the
//! temp-table create, before and after the main query, and before the
//! count query. A cancel observed mid-execution aborts with cleanup and
//! publishes nothing; the canceler owns the job's removal.

use crate::db::{Connection, Database, Value};
use crate::error::{DbError, ExecError, ExecResult};
use crate::job::{EventHub, Job, JobEvent, JobKey, JobStatus};
use crate::scheduler::Scheduler;
use crate::store::OutputStore;
use crate::writer::RecordsetWriter;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// The SQL comment prefix identifying a job's statements
pub fn comment_tag(key: &JobKey) -> String {
    format!("--{key}\n")
}

/// Shared collaborators handed to every worker thread
#[derive(Clone)]
pub struct WorkerContext {
    pub scheduler: Arc<Scheduler>,
    pub database: Arc<dyn Database>,
    pub store: Arc<dyn OutputStore>,
    pub events: Arc<EventHub>,
}

/// Fixed pool of query-executing threads
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` worker threads against the shared context
    pub fn spawn(count: usize, ctx: WorkerContext) -> Self {
        let handles = (0..count)
            .map(|i| {
                let ctx = ctx.clone();
                thread::Builder::new()
                    .name(format!("queryjobs-worker-{i}"))
                    .spawn(move || run_loop(&ctx))
                    .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"))
            })
            .collect();
        WorkerPool { handles }
    }

    /// Wait for every worker to exit. Call `Scheduler::shutdown` first or
    /// this blocks forever.
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// One worker's loop: block on the queue, execute, finalize, repeat.
/// A single job's failure never takes the loop down.
fn run_loop(ctx: &WorkerContext) {
    while let Some(job) = ctx.scheduler.next_running_job() {
        let key = job.key().clone();
        ctx.events.publish(&JobEvent::Updated(job.descriptor()));
        let span = tracing::info_span!("job", key = %key);
        let _guard = span.enter();

        match execute(ctx, &job) {
            Ok(payload) => finalize(ctx, &key, JobStatus::Complete, payload.into_bytes()),
            Err(ExecError::Canceled) => {
                debug!("job canceled mid-execution; discarding partial output");
            }
            Err(ExecError::Db(e)) => {
                warn!(error = %e, "query execution failed");
                finalize(ctx, &key, JobStatus::Failed, e.to_string().into_bytes());
            }
        }
    }
}

/// Persist the payload and publish the terminal state, unless cancellation
/// won the race - then the payload is discarded and nothing is published.
fn finalize(ctx: &WorkerContext, key: &JobKey, status: JobStatus, payload: Vec<u8>) {
    let (status, written) = match ctx.store.write(key, &payload) {
        Ok(()) => (status, true),
        Err(e) => {
            warn!(error = %e, "failed to persist job output");
            let message = DbError::from(e).to_string();
            let written = ctx.store.write(key, message.as_bytes()).is_ok();
            (JobStatus::Failed, written)
        }
    };
    if !written {
        // Store is unusable; leave the job unpublished so the caller sees
        // it gone rather than terminal with no payload
        ctx.scheduler.remove(key);
        return;
    }
    match ctx.scheduler.finish(key, status) {
        Some(descriptor) => {
            info!(status = %status, "job finished");
            ctx.events.publish(&JobEvent::Updated(descriptor));
        }
        None => {
            // Cancellation won the terminal-state race
            let _ = ctx.store.delete(key);
        }
    }
}

/// Execute a job end to end on a scoped connection. The temp table, if
/// one was created, is dropped on every exit path.
fn execute(ctx: &WorkerContext, job: &Job) -> ExecResult<String> {
    let key = job.key();
    let tag = comment_tag(key);
    let started = Instant::now();
    let mut conn = ctx.database.connection()?;
    let mut temp_created = false;

    let mut result = run_statements(ctx, job, &tag, conn.as_mut(), &mut temp_created);

    if temp_created {
        if let Some(temp) = job.temp_table() {
            if let Err(e) = conn.execute(&temp.drop_statement()) {
                if result.is_ok() {
                    result = Err(e.into());
                } else {
                    debug!(error = %e, "temp table drop failed during cleanup");
                }
            }
        }
    }

    result.map(|mut writer| {
        writer.set_elapsed(started.elapsed());
        writer.finish()
    })
}

/// The checkpointed execution sequence: temp table, main query, count query
fn run_statements(
    ctx: &WorkerContext,
    job: &Job,
    tag: &str,
    conn: &mut dyn Connection,
    temp_created: &mut bool,
) -> ExecResult<RecordsetWriter> {
    let key = job.key();

    if let Some(temp) = job.temp_table() {
        conn.execute(&format!("{tag}{}", temp.sql))?;
        *temp_created = true;
        if ctx.scheduler.is_canceled(key) {
            return Err(ExecError::Canceled);
        }
    }

    if ctx.scheduler.is_canceled(key) {
        return Err(ExecError::Canceled);
    }

    let mut writer = RecordsetWriter::new(job.format(), job.include_metadata());
    let query = job.select().to_query_string();
    let mut rows = conn.query(&format!("{tag}{query}"))?;
    while let Some(row) = rows.next_row()? {
        writer.write(&row);
    }
    drop(rows);
    if ctx.scheduler.is_canceled(key) {
        return Err(ExecError::Canceled);
    }

    if job.count_total() {
        let count_query = job.select().to_count_query_string();
        if let Some(record) = conn.get_record(&format!("{tag}{count_query}"))? {
            if let Some(total) = record.get(0).and_then(Value::as_i64) {
                writer.set_count(total);
            }
        }
        if ctx.scheduler.is_canceled(key) {
            return Err(ExecError::Canceled);
        }
    }

    Ok(writer)
}
