//! Job Scheduler
//!
//! Owns the three job collections - registry, pending FIFO, and completed
//! set - behind a single mutex with two condition variables: one for
//! workers waiting on a non-empty queue, one for synchronous callers
//! waiting on a key reaching a terminal state. Collapsing the collections
//! into one critical section keeps the cross-collection invariants (a key
//! in the pending queue always has a registry entry; dequeue precedes the
//! running transition) without any lock ordering concerns.
//!
//! Both waits re-check their predicate in a loop, so spurious wakeups are
//! harmless.

use crate::job::{Job, JobDescriptor, JobKey, JobStatus};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Result of a terminal fetch attempt
pub enum Fetched {
    /// The job is still pending or running; status only, no side effects
    InFlight(JobStatus),
    /// The job was terminal and has been removed from every collection
    Terminal(Job),
}

/// Outcome of a synchronous wait on the completion signal
#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The key reached complete or failed and was published
    Completed,
    /// The job disappeared without being published (canceled, or another
    /// caller retrieved it first)
    Gone,
    /// The configured wait bound elapsed first
    TimedOut,
}

struct State {
    jobs: HashMap<JobKey, Job>,
    pending: VecDeque<JobKey>,
    completed: HashSet<JobKey>,
    shutdown: bool,
}

/// Thread-safe owner of all per-service job state
pub struct Scheduler {
    state: Mutex<State>,
    pending_ready: Condvar,
    terminal_ready: Condvar,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            state: Mutex::new(State {
                jobs: HashMap::new(),
                pending: VecDeque::new(),
                completed: HashSet::new(),
                shutdown: false,
            }),
            pending_ready: Condvar::new(),
            terminal_ready: Condvar::new(),
        }
    }

    /// Register a freshly created job and enqueue its key
    pub fn submit(&self, job: Job) -> JobDescriptor {
        debug_assert_eq!(job.status, JobStatus::Pending);
        let descriptor = job.descriptor();
        let key = job.key().clone();
        let mut state = self.state.lock();
        state.jobs.insert(key.clone(), job);
        state.pending.push_back(key);
        drop(state);
        self.pending_ready.notify_one();
        descriptor
    }

    /// Block until a pending job is available, transition it to running,
    /// and hand back an immutable snapshot. Keys whose job was canceled
    /// (and cleaned up) before a worker got to them are skipped. Returns
    /// `None` once shutdown is requested.
    pub fn next_running_job(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(key) = state.pending.pop_front() {
                match state.jobs.get_mut(&key) {
                    Some(job) if !job.is_canceled() => {
                        job.set_status(JobStatus::Running);
                        return Some(job.clone());
                    }
                    _ => continue,
                }
            } else {
                self.pending_ready.wait(&mut state);
            }
        }
    }

    /// Whether the worker should abandon the job at its next checkpoint.
    /// A missing registry entry means cancellation already cleaned up.
    pub fn is_canceled(&self, key: &JobKey) -> bool {
        let state = self.state.lock();
        state.jobs.get(key).map_or(true, Job::is_canceled)
    }

    /// Publish a terminal outcome and wake synchronous waiters. Refused
    /// (returning `None`) when cancellation won the race, in which case
    /// the worker discards its output.
    pub fn finish(&self, key: &JobKey, status: JobStatus) -> Option<JobDescriptor> {
        debug_assert!(matches!(status, JobStatus::Complete | JobStatus::Failed));
        let mut state = self.state.lock();
        let descriptor = match state.jobs.get_mut(key) {
            Some(job) if !job.is_canceled() => {
                job.set_status(status);
                job.descriptor()
            }
            _ => return None,
        };
        state.completed.insert(key.clone());
        drop(state);
        self.terminal_ready.notify_all();
        Some(descriptor)
    }

    /// Owner-scoped lookup: terminal jobs are removed from every
    /// collection as a side effect (at-most-once retrieval); in-flight
    /// jobs report status only. A job marked canceled is already invisible
    /// here - the canceler owns its cleanup.
    pub fn fetch(&self, key: &JobKey) -> Option<Fetched> {
        let mut state = self.state.lock();
        let status = state.jobs.get(key)?.status;
        if status == JobStatus::Canceled {
            return None;
        }
        if status.is_terminal() {
            let job = state.remove_everywhere(key)?;
            drop(state);
            self.terminal_ready.notify_all();
            Some(Fetched::Terminal(job))
        } else {
            Some(Fetched::InFlight(status))
        }
    }

    /// First half of cancellation: pull the key out of the pending queue
    /// (a no-op if a worker already dequeued it) and mark the job
    /// canceled. The flag is the authoritative signal a running worker
    /// polls at its checkpoints.
    pub fn mark_canceled(&self, key: &JobKey) -> Option<JobDescriptor> {
        let mut state = self.state.lock();
        state.pending.retain(|k| k != key);
        let job = state.jobs.get_mut(key)?;
        job.set_status(JobStatus::Canceled);
        Some(job.descriptor())
    }

    /// Remove a job from every collection (cancellation cleanup). Also
    /// wakes synchronous waiters so they observe the job as gone.
    pub fn remove(&self, key: &JobKey) -> Option<Job> {
        let mut state = self.state.lock();
        let job = state.remove_everywhere(key);
        drop(state);
        self.terminal_ready.notify_all();
        job
    }

    /// Snapshot of the caller's not-yet-retrieved jobs
    pub fn list(&self, owner_id: u64) -> Vec<JobDescriptor> {
        let state = self.state.lock();
        state
            .jobs
            .values()
            .filter(|job| job.owner_id() == owner_id)
            .map(Job::descriptor)
            .collect()
    }

    /// Block until the key is published terminal, disappears, or the
    /// wait bound elapses (`None` = unbounded)
    pub fn wait_terminal(&self, key: &JobKey, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.completed.contains(key) {
                return WaitOutcome::Completed;
            }
            if !state.jobs.contains_key(key) {
                return WaitOutcome::Gone;
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .terminal_ready
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        // Re-check once: the wakeup may have raced the deadline
                        if state.completed.contains(key) {
                            return WaitOutcome::Completed;
                        }
                        if !state.jobs.contains_key(key) {
                            return WaitOutcome::Gone;
                        }
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.terminal_ready.wait(&mut state),
            }
        }
    }

    /// Ask workers to exit their loops once the queue drains to them
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.pending_ready.notify_all();
        self.terminal_ready.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn job_count(&self) -> usize {
        self.state.lock().jobs.len()
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl State {
    /// Delete a job from the registry, queue, and completion set together
    fn remove_everywhere(&mut self, key: &JobKey) -> Option<Job> {
        self.pending.retain(|k| k != key);
        self.completed.remove(key);
        self.jobs.remove(key)
    }
}
