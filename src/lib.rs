//! # queryjobs
//!
//! Asynchronous execution of ad-hoc read queries as supervised jobs.
//!
//! Callers submit a single SELECT statement (optionally preceded by one
//! temp-table CREATE). The service validates it, enqueues a job keyed by
//! `owner:id`, and a pool of workers executes it against the database,
//! persisting the serialized result (JSON, CSV, or TSV) in an output
//! store. Callers poll for the status, block for the result, or cancel
//! mid-flight; a terminal result can be retrieved exactly once and is
//! deleted on retrieval.
//!
//! ```no_run
//! use queryjobs::{Config, QueryService, SubmitRequest};
//! use std::sync::Arc;
//!
//! # fn database() -> Arc<dyn queryjobs::Database> { unimplemented!() }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let service = QueryService::with_file_store(config, database())?;
//!
//! let request = SubmitRequest {
//!     query: "SELECT id, name FROM contacts".to_string(),
//!     ..Default::default()
//! };
//! let job = service.submit(1001, &request)?;
//! let response = service.job_response(1001, &job.job_id)?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod scheduler;
pub mod service;
pub mod sql;
pub mod store;
pub mod worker;
pub mod writer;

pub use config::{Config, OutputConfig};
pub use db::{Column, ColumnInfo, Connection, Database, Row, Rows, TableInfo, Value};
pub use error::{DbError, ExecError, ServiceError, SubmitError};
pub use job::{JobDescriptor, JobEvent, JobKey, JobStatus, OutputFormat};
pub use service::{JobOutput, JobResponse, QueryService, SubmitRequest};
pub use store::{FileStore, MemoryStore, OutputStore};
