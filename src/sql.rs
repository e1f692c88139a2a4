//! Query Validation & Descriptors
//!
//! Splits a submission into statements and validates that it contains
//! exactly one SELECT, optionally preceded by a single temporary-table
//! create. Every other statement kind is rejected before a job is created.
//!
//! The scanner is deliberately shallow: it understands quoting, comments,
//! and parenthesis nesting well enough to classify statements, merge
//! pagination, and rewrite the projection for a count query. It is not a
//! full SQL parser and the validation is not foolproof, so access to the
//! service should be restricted to trusted users.

use crate::error::SubmitError;

/// A lexical token with its byte span and parenthesis depth
#[derive(Debug, Clone)]
struct Token {
    /// Lowercased token text ("(" / ")" / "," kept verbatim)
    text: String,
    start: usize,
    end: usize,
    depth: i32,
}

/// A validated submission: one SELECT plus an optional preceding temp table
#[derive(Debug, Clone)]
pub struct Submission {
    pub temp_table: Option<CreateTempTable>,
    pub select: SelectStatement,
}

/// A `CREATE TEMPORARY TABLE` statement preceding the SELECT
#[derive(Debug, Clone)]
pub struct CreateTempTable {
    /// Full statement text, as submitted
    pub sql: String,
    /// Table name, for the matching DROP
    pub table: String,
}

impl CreateTempTable {
    /// The statement that removes the temp table again
    pub fn drop_statement(&self) -> String {
        format!("DROP TABLE {}", self.table)
    }
}

/// A single validated SELECT statement with pagination merged at render time
#[derive(Debug, Clone)]
pub struct SelectStatement {
    /// Leading WITH clause, if any (prepended to both query strings)
    with_clause: Option<String>,
    /// The SELECT itself, stripped of any trailing LIMIT/OFFSET
    body: String,
    /// Row offset (submitted clause, unless overridden)
    offset: Option<u64>,
    /// Row limit (submitted clause, unless overridden)
    limit: Option<u64>,
}

impl SelectStatement {
    pub fn with_clause(&self) -> Option<&str> {
        self.with_clause.as_deref()
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Override the row offset, replacing any submitted OFFSET clause
    pub fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    /// Override the row limit
    pub fn set_limit(&mut self, limit: u64) {
        self.limit = Some(limit);
    }

    /// Render the executable query with pagination applied
    pub fn to_query_string(&self) -> String {
        let mut query = String::new();
        if let Some(with) = &self.with_clause {
            query.push_str(with);
            query.push('\n');
        }
        query.push_str(&self.body);
        if let Some(limit) = self.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            query.push_str(&format!(" OFFSET {offset}"));
        }
        query
    }

    /// Render the companion count query: same FROM/filters/WITH clause, the
    /// projection replaced by a count aggregate, no pagination
    pub fn to_count_query_string(&self) -> String {
        let replaced = match top_level_keyword(&self.body, "from") {
            Some(from_start) => format!("SELECT count(*) {}", &self.body[from_start..]),
            None => "SELECT count(*)".to_string(),
        };
        match &self.with_clause {
            Some(with) => format!("{with}\n{replaced}"),
            None => replaced,
        }
    }
}

/// Validate a submission and build its descriptor.
///
/// Fails with `Validation` (multiple statements, ordering), `Unsupported`
/// (disallowed statement kinds), or `Parse` (unterminated quotes/comments,
/// non-numeric pagination values).
pub fn parse_submission(text: &str) -> Result<Submission, SubmitError> {
    let statements = split_statements(text)?;
    if statements.is_empty() {
        return Err(SubmitError::Validation("query is required".to_string()));
    }

    let mut temp_table: Option<CreateTempTable> = None;
    let mut select: Option<SelectStatement> = None;

    for statement in &statements {
        match classify(statement)? {
            StatementKind::TempTable => {
                if select.is_some() {
                    return Err(SubmitError::Validation(
                        "temporary table must be created before the SELECT statement".to_string(),
                    ));
                }
                if temp_table.is_some() {
                    return Err(SubmitError::Validation(
                        "only 1 temp table allowed".to_string(),
                    ));
                }
                temp_table = Some(parse_temp_table(statement)?);
            }
            StatementKind::Select => {
                if select.is_some() {
                    return Err(SubmitError::Validation(
                        "only 1 SELECT statement allowed".to_string(),
                    ));
                }
                select = Some(parse_select(statement)?);
            }
            StatementKind::Other(kind) => {
                return Err(SubmitError::Unsupported(kind));
            }
        }
    }

    let select = select
        .ok_or_else(|| SubmitError::Validation("a SELECT statement is required".to_string()))?;

    Ok(Submission { temp_table, select })
}

enum StatementKind {
    Select,
    TempTable,
    Other(String),
}

/// Decide what a statement is from its leading keywords
fn classify(statement: &str) -> Result<StatementKind, SubmitError> {
    let toks = tokenize(statement)?;
    let words: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
    match words.first().copied() {
        Some("select") | Some("with") => Ok(StatementKind::Select),
        Some("create") => {
            // CREATE [GLOBAL|LOCAL] {TEMPORARY|TEMP} TABLE ...
            let mut rest = &words[1..];
            if matches!(rest.first().copied(), Some("global") | Some("local")) {
                rest = &rest[1..];
            }
            match rest.first().copied() {
                Some("temporary") | Some("temp") if rest.get(1).copied() == Some("table") => {
                    Ok(StatementKind::TempTable)
                }
                Some("table") => Ok(StatementKind::Other("CREATE TABLE".to_string())),
                Some(other) => Ok(StatementKind::Other(format!(
                    "CREATE {}",
                    other.to_uppercase()
                ))),
                None => Err(SubmitError::Parse("incomplete CREATE statement".to_string())),
            }
        }
        Some(other) => Ok(StatementKind::Other(other.to_uppercase())),
        None => Err(SubmitError::Parse("empty statement".to_string())),
    }
}

fn parse_temp_table(statement: &str) -> Result<CreateTempTable, SubmitError> {
    let toks = tokenize(statement)?;
    let table_idx = toks
        .iter()
        .position(|t| t.text == "table")
        .ok_or_else(|| SubmitError::Parse("incomplete CREATE statement".to_string()))?;

    // Skip an optional IF NOT EXISTS
    let mut name_idx = table_idx + 1;
    if toks.get(name_idx).map(|t| t.text.as_str()) == Some("if") {
        name_idx += 3;
    }
    let name = toks
        .get(name_idx)
        .filter(|t| t.text != "(")
        .ok_or_else(|| SubmitError::Parse("temp table name is missing".to_string()))?;

    Ok(CreateTempTable {
        sql: statement.to_string(),
        table: statement[name.start..name.end].to_string(),
    })
}

fn parse_select(statement: &str) -> Result<SelectStatement, SubmitError> {
    let toks = tokenize(statement)?;

    // A leading WITH clause ends where the first top-level SELECT begins;
    // the selects inside the CTE bodies sit at depth > 0.
    let (with_clause, body_start) = if toks.first().map(|t| t.text.as_str()) == Some("with") {
        let main = toks
            .iter()
            .skip(1)
            .find(|t| t.depth == 0 && t.text == "select")
            .ok_or_else(|| {
                SubmitError::Parse("WITH clause without a main SELECT".to_string())
            })?;
        (
            Some(statement[..main.start].trim_end().to_string()),
            main.start,
        )
    } else {
        (None, 0)
    };

    let mut body = statement[body_start..].trim().to_string();

    // Strip trailing LIMIT/OFFSET clauses; their values become defaults that
    // pagination overrides may replace.
    let mut offset = None;
    let mut limit = None;
    let body_toks = tokenize(&body)?;
    let mut cut: Option<usize> = None;
    let mut i = 0;
    while i < body_toks.len() {
        let tok = &body_toks[i];
        if tok.depth == 0 && (tok.text == "limit" || tok.text == "offset") {
            let value = body_toks
                .get(i + 1)
                .and_then(|v| v.text.parse::<u64>().ok())
                .ok_or_else(|| {
                    SubmitError::Parse(format!("non-numeric {} value", tok.text.to_uppercase()))
                })?;
            if tok.text == "limit" {
                limit = Some(value);
            } else {
                offset = Some(value);
            }
            cut.get_or_insert(tok.start);
            i += 2;
        } else {
            i += 1;
        }
    }
    if let Some(cut) = cut {
        body.truncate(cut);
        let trimmed = body.trim_end().len();
        body.truncate(trimmed);
    }

    Ok(SelectStatement {
        with_clause,
        body,
        offset,
        limit,
    })
}

/// Byte offset of the first top-level occurrence of a keyword, if any
fn top_level_keyword(sql: &str, keyword: &str) -> Option<usize> {
    let toks = tokenize(sql).ok()?;
    toks.iter()
        .find(|t| t.depth == 0 && t.text == keyword)
        .map(|t| t.start)
}

/// Split submission text into statements at top-level semicolons,
/// respecting quotes and comments
fn split_statements(text: &str) -> Result<Vec<String>, SubmitError> {
    let bytes = text.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => {
                i = skip_quoted(bytes, i)?;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i)?;
            }
            b';' => {
                let stmt = text[start..i].trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                start = i + 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    Ok(statements)
}

/// Tokenize a statement into lowercased words and punctuation with depths.
/// String literals are skipped entirely; quoted identifiers keep their text.
fn tokenize(sql: &str) -> Result<Vec<Token>, SubmitError> {
    let bytes = sql.as_bytes();
    let mut toks = Vec::new();
    let mut depth = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' => {
                i = skip_quoted(bytes, i)?;
            }
            b'"' => {
                let end = skip_quoted(bytes, i)?;
                toks.push(Token {
                    text: sql[i + 1..end - 1].to_lowercase(),
                    start: i,
                    end,
                    depth,
                });
                i = end;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i)?;
            }
            b'(' => {
                toks.push(Token {
                    text: "(".to_string(),
                    start: i,
                    end: i + 1,
                    depth,
                });
                depth += 1;
                i += 1;
            }
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(SubmitError::Parse("unbalanced parentheses".to_string()));
                }
                toks.push(Token {
                    text: ")".to_string(),
                    start: i,
                    end: i + 1,
                    depth,
                });
                i += 1;
            }
            b',' => {
                toks.push(Token {
                    text: ",".to_string(),
                    start: i,
                    end: i + 1,
                    depth,
                });
                i += 1;
            }
            _ if b.is_ascii_alphanumeric() || b == b'_' || b == b'$' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'$'
                        || bytes[i] == b'.')
                {
                    i += 1;
                }
                toks.push(Token {
                    text: sql[start..i].to_lowercase(),
                    start,
                    end: i,
                    depth,
                });
            }
            _ => i += 1,
        }
    }
    if depth != 0 {
        return Err(SubmitError::Parse("unbalanced parentheses".to_string()));
    }
    Ok(toks)
}

/// Advance past a quoted region, handling doubled-quote escapes
fn skip_quoted(bytes: &[u8], start: usize) -> Result<usize, SubmitError> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(SubmitError::Parse("unterminated string literal".to_string()))
}

fn skip_block_comment(bytes: &[u8], start: usize) -> Result<usize, SubmitError> {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return Ok(i + 2);
        }
        i += 1;
    }
    Err(SubmitError::Parse("unterminated block comment".to_string()))
}
