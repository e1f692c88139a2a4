//! Shared test fixtures: a scriptable in-memory database collaborator
//! and service construction helpers.
#![allow(dead_code)]

use parking_lot::Mutex;
use queryjobs::{
    Column, ColumnInfo, Config, Connection, Database, DbError, MemoryStore, QueryService, Row,
    Rows, SubmitRequest, TableInfo, Value,
};
use std::sync::Arc;
use std::time::Duration;

/// Scriptable database: every query yields the configured rows, every
/// statement is recorded. Clones share state, so a test can keep a handle
/// after moving one into the service.
#[derive(Clone)]
pub struct FakeDatabase {
    inner: Arc<Shared>,
}

struct Shared {
    log: Mutex<Vec<String>>,
    rows: Vec<Vec<Value>>,
    fail_on: Option<String>,
    query_delay: Option<Duration>,
    backend_pid: Option<i64>,
    kills: Mutex<Vec<i64>>,
    tables: Vec<TableInfo>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        FakeDatabase {
            inner: Arc::new(Shared {
                log: Mutex::new(Vec::new()),
                rows: vec![vec![Value::Int(1), Value::Text("alpha".to_string())]],
                fail_on: None,
                query_delay: None,
                backend_pid: None,
                kills: Mutex::new(Vec::new()),
                tables: Vec::new(),
            }),
        }
    }

    pub fn with_rows(rows: Vec<Vec<Value>>) -> Self {
        let mut db = FakeDatabase::new();
        Arc::get_mut(&mut db.inner).expect("fresh handle").rows = rows;
        db
    }

    /// Fail any statement containing the given fragment
    pub fn failing_on(mut self, fragment: &str) -> Self {
        Arc::get_mut(&mut self.inner).expect("fresh handle").fail_on =
            Some(fragment.to_string());
        self
    }

    /// Sleep this long inside every query, to hold jobs in-flight
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("fresh handle")
            .query_delay = Some(delay);
        self
    }

    /// Pretend a backend with this pid is running tagged statements
    pub fn with_backend(mut self, pid: i64) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("fresh handle")
            .backend_pid = Some(pid);
        self
    }

    pub fn with_tables(mut self, tables: Vec<TableInfo>) -> Self {
        Arc::get_mut(&mut self.inner).expect("fresh handle").tables = tables;
        self
    }

    /// Every statement executed so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.inner.log.lock().clone()
    }

    /// Backend pids the service asked to abort
    pub fn kills(&self) -> Vec<i64> {
        self.inner.kills.lock().clone()
    }
}

impl Default for FakeDatabase {
    fn default() -> Self {
        FakeDatabase::new()
    }
}

struct FakeConnection {
    shared: Arc<Shared>,
}

impl FakeConnection {
    fn record(&self, sql: &str) -> Result<(), DbError> {
        self.shared.log.lock().push(sql.to_string());
        if let Some(delay) = self.shared.query_delay {
            std::thread::sleep(delay);
        }
        if let Some(fragment) = &self.shared.fail_on {
            if sql.contains(fragment.as_str()) {
                return Err(DbError::new(format!("fake failure on `{fragment}`")));
            }
        }
        Ok(())
    }
}

impl Connection for FakeConnection {
    fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        self.record(sql)
    }

    fn query(&mut self, sql: &str) -> Result<Box<dyn Rows>, DbError> {
        self.record(sql)?;
        let width = self.shared.rows.first().map_or(0, Vec::len);
        let columns: Arc<[Column]> = (0..width)
            .map(|i| Column {
                name: format!("col{i}"),
                type_name: "text".to_string(),
                table: None,
            })
            .collect();
        Ok(Box::new(FakeRows {
            rows: self.shared.rows.clone().into_iter(),
            columns,
        }))
    }

    fn get_record(&mut self, sql: &str) -> Result<Option<Row>, DbError> {
        self.record(sql)?;
        Ok(Some(Row {
            columns: Arc::new([Column {
                name: "count".to_string(),
                type_name: "int8".to_string(),
                table: None,
            }]),
            values: vec![Value::Int(1000)],
        }))
    }
}

struct FakeRows {
    rows: std::vec::IntoIter<Vec<Value>>,
    columns: Arc<[Column]>,
}

impl Rows for FakeRows {
    fn next_row(&mut self) -> Result<Option<Row>, DbError> {
        Ok(self.rows.next().map(|values| Row {
            columns: Arc::clone(&self.columns),
            values,
        }))
    }
}

impl Database for FakeDatabase {
    fn connection(&self) -> Result<Box<dyn Connection>, DbError> {
        Ok(Box::new(FakeConnection {
            shared: Arc::clone(&self.inner),
        }))
    }

    fn tables(&self) -> Result<Vec<TableInfo>, DbError> {
        Ok(self.inner.tables.clone())
    }

    fn find_backend(
        &self,
        _conn: &mut dyn Connection,
        _tag: &str,
    ) -> Result<Option<i64>, DbError> {
        Ok(self.inner.backend_pid)
    }

    fn cancel_backend(&self, _conn: &mut dyn Connection, pid: i64) -> Result<bool, DbError> {
        self.inner.kills.lock().push(pid);
        Ok(true)
    }
}

pub fn test_config(workers: usize) -> Config {
    Config {
        workers,
        ..Config::default()
    }
}

/// Route worker logs through the test harness when RUST_LOG is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn service(db: &FakeDatabase, workers: usize) -> QueryService {
    init_tracing();
    QueryService::new(
        test_config(workers),
        Arc::new(db.clone()),
        Arc::new(MemoryStore::new()),
    )
}

pub fn request(query: &str) -> SubmitRequest {
    SubmitRequest {
        query: query.to_string(),
        ..Default::default()
    }
}

pub fn table(name: &str, schema: Option<&str>) -> TableInfo {
    TableInfo {
        name: name.to_string(),
        schema: schema.map(str::to_string),
        columns: vec![ColumnInfo {
            name: "id".to_string(),
            type_name: "int8".to_string(),
            primary_key: true,
        }],
    }
}
