//! Database Collaborator Interfaces
//!
//! The engine never talks to a concrete driver. It consumes these traits:
//! a connection source, scoped connections with execute/query/get-record,
//! and an optional backend-kill capability used by cancellation. Drivers
//! without native kill support keep the default implementations and degrade
//! to flag-only cancellation (the query finishes and its output is
//! discarded).

use crate::error::DbError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single result value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Best-effort integer view (count queries)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) => Some(*f as i64),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Column metadata captured from a result set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Declared database type, as reported by the driver
    #[serde(rename = "type")]
    pub type_name: String,
    /// Originating table, when the driver knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

/// One result row: shared column metadata plus positional values
#[derive(Debug, Clone)]
pub struct Row {
    pub columns: Arc<[Column]>,
    pub values: Vec<Value>,
}

impl Row {
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Streaming cursor over a query's result rows
pub trait Rows: Send {
    /// Next row, or `None` when the result set is drained
    fn next_row(&mut self) -> Result<Option<Row>, DbError>;
}

/// A scoped database connection. Implementations release the underlying
/// resource on drop; the worker holds one only for the duration of a
/// single job execution.
pub trait Connection: Send {
    /// Execute a statement that returns no rows
    fn execute(&mut self, sql: &str) -> Result<(), DbError>;

    /// Execute a query and stream its rows
    fn query(&mut self, sql: &str) -> Result<Box<dyn Rows>, DbError>;

    /// Execute a query expected to return at most one row
    fn get_record(&mut self, sql: &str) -> Result<Option<Row>, DbError>;
}

/// Table metadata returned by the `tables` operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub schema: Option<String>,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
}

/// Connection source plus the introspection capabilities the engine needs
pub trait Database: Send + Sync {
    /// Acquire a scoped connection
    fn connection(&self) -> Result<Box<dyn Connection>, DbError>;

    /// Schema/table/column metadata for the `tables` operation
    fn tables(&self) -> Result<Vec<TableInfo>, DbError>;

    /// Look up the backend process executing the query tagged with the
    /// given job-key comment, if the driver can (PostgreSQL:
    /// `SELECT pid FROM pg_stat_activity WHERE query LIKE '--{key}%'`).
    fn find_backend(
        &self,
        _conn: &mut dyn Connection,
        _tag: &str,
    ) -> Result<Option<i64>, DbError> {
        Ok(None)
    }

    /// Ask the engine to abort the given backend process. Returns whether
    /// the backend acknowledged the kill (PostgreSQL: `pg_cancel_backend`,
    /// escalating to `pg_terminate_backend`).
    fn cancel_backend(&self, _conn: &mut dyn Connection, _pid: i64) -> Result<bool, DbError> {
        Ok(false)
    }
}
