//! Error Types
//!
//! Submission errors are returned synchronously and never create a job.
//! Execution errors are captured inside the worker and turned into a
//! terminal `failed` job whose payload is the error text.

use thiserror::Error;

/// Errors raised while validating a submission. None of these create a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Malformed submission (e.g. multiple SELECT statements)
    #[error("invalid query: {0}")]
    Validation(String),

    /// Query text could not be parsed into statements
    #[error("unsupported or invalid SQL statement: {0}")]
    Parse(String),

    /// Statement kind other than SELECT or a preceding temp-table create
    #[error("{0} statements not allowed")]
    Unsupported(String),
}

/// Database collaborator failure
#[derive(Error, Debug, Clone)]
#[error("database error: {0}")]
pub struct DbError(pub String);

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        DbError(message.into())
    }
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::new(e.to_string())
    }
}

/// Caller-facing service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Unknown job key, or a job owned by someone else (indistinguishable)
    #[error("job not found")]
    NotFound,

    /// A synchronous submit exceeded the configured wait bound
    #[error("timed out waiting for job completion")]
    WaitTimeout,

    /// Database failure outside of job execution (e.g. table metadata)
    #[error(transparent)]
    Db(#[from] DbError),

    /// The submission was rejected before a job was created
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Worker-internal execution outcome.
///
/// `Canceled` is an explicit variant checked at each checkpoint of the
/// worker loop rather than a thrown-and-caught sentinel.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The job was canceled while executing
    #[error("job canceled")]
    Canceled,

    /// The database reported a failure while running the job
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Result type for worker execution steps
pub type ExecResult<T> = Result<T, ExecError>;
