//! Result Serialization
//!
//! Streams database result rows into a serialized payload in one of three
//! formats (JSON/CSV/TSV). Column metadata is captured from the first row;
//! a total-row count and elapsed time can be appended to the JSON trailer.

use crate::db::{Row, Value};
use crate::job::OutputFormat;
use std::time::Duration;

/// Incremental payload builder fed one row at a time
pub struct RecordsetWriter {
    format: OutputFormat,
    include_metadata: bool,
    buf: String,
    rows_written: u64,
    metadata: Vec<serde_json::Value>,
    count: Option<i64>,
    elapsed: Option<Duration>,
}

impl RecordsetWriter {
    pub fn new(format: OutputFormat, include_metadata: bool) -> Self {
        RecordsetWriter {
            format,
            include_metadata,
            buf: String::new(),
            rows_written: 0,
            metadata: Vec::new(),
            count: None,
            elapsed: None,
        }
    }

    /// Append one result row. The first row fixes the field order and
    /// captures column metadata.
    pub fn write(&mut self, row: &Row) {
        if self.rows_written == 0 {
            self.capture_metadata(row);
            match self.format {
                OutputFormat::Json => self.buf.push_str("{\"rows\":["),
                OutputFormat::Csv | OutputFormat::Tsv => self.write_header(row),
            }
        }

        match self.format.delimiter() {
            None => self.write_json_row(row),
            Some(delimiter) => self.write_delimited_row(row, delimiter),
        }

        self.rows_written += 1;
    }

    /// Total-row count from the companion count query (JSON trailer)
    pub fn set_count(&mut self, count: i64) {
        self.count = Some(count);
    }

    /// Wall-clock execution time (JSON trailer, seconds at 3 decimals)
    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = Some(elapsed);
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Finalize the payload
    pub fn finish(mut self) -> String {
        match self.format {
            OutputFormat::Json => {
                if self.rows_written == 0 {
                    return "{}".to_string();
                }
                self.buf.push(']');
                if self.include_metadata && !self.metadata.is_empty() {
                    self.buf.push_str(",\"metadata\":");
                    self.buf
                        .push_str(&serde_json::Value::Array(std::mem::take(
                            &mut self.metadata,
                        ))
                        .to_string());
                }
                if let Some(count) = self.count {
                    self.buf.push_str(&format!(",\"total_rows\":{count}"));
                }
                if let Some(elapsed) = self.elapsed {
                    self.buf
                        .push_str(&format!(",\"time\":{:.3}", elapsed.as_secs_f64()));
                }
                self.buf.push('}');
                self.buf
            }
            OutputFormat::Csv | OutputFormat::Tsv => self.buf,
        }
    }

    fn capture_metadata(&mut self, row: &Row) {
        self.metadata = row
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let mut json = serde_json::json!({
                    "id": i + 1,
                    "name": col.name,
                    "type": col.type_name,
                });
                if let Some(table) = &col.table {
                    json["table"] = serde_json::Value::String(table.clone());
                }
                json
            })
            .collect();
    }

    fn write_header(&mut self, row: &Row) {
        let delimiter = match self.format.delimiter() {
            Some(d) => d,
            None => return,
        };
        for (i, col) in row.columns.iter().enumerate() {
            if i > 0 {
                self.buf.push(delimiter);
            }
            self.buf.push_str(&col.name);
        }
        self.buf.push_str("\r\n");
    }

    fn write_json_row(&mut self, row: &Row) {
        let mut object = serde_json::Map::new();
        for (col, value) in row.columns.iter().zip(&row.values) {
            object.insert(col.name.clone(), json_value(value));
        }
        if self.rows_written > 0 {
            self.buf.push(',');
        }
        self.buf.push_str(&serde_json::Value::Object(object).to_string());
    }

    fn write_delimited_row(&mut self, row: &Row, delimiter: char) {
        for (i, value) in row.values.iter().enumerate() {
            if i > 0 {
                self.buf.push(delimiter);
            }
            self.buf.push_str(&delimited_value(value, delimiter));
        }
        self.buf.push_str("\r\n");
    }
}

/// Render a value for the tabular formats: nulls as empty string,
/// timestamps as ISO-8601, values containing the delimiter quoted
fn delimited_value(value: &Value, delimiter: char) -> String {
    let rendered = match value {
        Value::Null => return String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Timestamp(ts) => ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
    };
    if rendered.contains(delimiter) {
        format!("\"{}\"", rendered.replace('"', "\"\""))
    } else {
        rendered
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(n) => serde_json::Value::Number((*n).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Timestamp(ts) => {
            serde_json::Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        }
    }
}
