use std::collections::HashSet;
use std::sync::Once;

use anyhow::{Context, Result};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;

use crate::rag::embeddings::embedding_to_bytes;
use crate::rag::EMBEDDING_DIM;
use crate::types::{
    element_id, parse_element_id, ElementKind, FunctionKey, FunctionRecord, GraphNode,
    GraphRelationship, GraphValue, ImportRecord, Record,
};

const SQL_MERGE_FILE: &str = "INSERT INTO files (path) VALUES (?1)
     ON CONFLICT(path) DO UPDATE SET path = excluded.path
     RETURNING id";

const SQL_MERGE_FUNCTION: &str = "INSERT INTO functions (name, path, body) VALUES (?1, ?2, ?3)
     ON CONFLICT(name, path) DO UPDATE SET body = COALESCE(excluded.body, functions.body)
     RETURNING id";

const SQL_MERGE_IMPORT: &str =
    "INSERT INTO imports_from (source_id, target_id, clause) VALUES (?1, ?2, ?3)
     ON CONFLICT(source_id, target_id, clause) DO UPDATE SET clause = excluded.clause
     RETURNING id";

const SQL_MERGE_CALL: &str = "INSERT INTO calls (caller_id, callee_id) VALUES (?1, ?2)
     ON CONFLICT(caller_id, callee_id) DO UPDATE SET callee_id = excluded.callee_id
     RETURNING id";

const SQL_UPSERT_RECORD: &str = "INSERT INTO function_records
     (element_id, name, path, raw_text, summary, body_hash)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT(element_id) DO UPDATE SET
        name = excluded.name,
        path = excluded.path,
        raw_text = excluded.raw_text,
        summary = excluded.summary,
        body_hash = excluded.body_hash
     RETURNING vec_id";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS functions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    body TEXT,
    UNIQUE (name, path)
);

CREATE TABLE IF NOT EXISTS imports_from (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    target_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    clause TEXT NOT NULL,
    UNIQUE (source_id, target_id, clause)
);

CREATE TABLE IF NOT EXISTS calls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    caller_id INTEGER NOT NULL REFERENCES functions(id) ON DELETE CASCADE,
    callee_id INTEGER NOT NULL REFERENCES functions(id) ON DELETE CASCADE,
    UNIQUE (caller_id, callee_id)
);

CREATE TABLE IF NOT EXISTS function_records (
    vec_id INTEGER PRIMARY KEY AUTOINCREMENT,
    element_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    raw_text TEXT,
    summary TEXT NOT NULL,
    body_hash TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS vec_functions USING vec0(
    embedding float[384]
);

CREATE INDEX IF NOT EXISTS idx_functions_path ON functions(path);
CREATE INDEX IF NOT EXISTS idx_imports_source ON imports_from(source_id, clause);
CREATE INDEX IF NOT EXISTS idx_imports_target ON imports_from(target_id);
CREATE INDEX IF NOT EXISTS idx_calls_callee ON calls(callee_id);
CREATE INDEX IF NOT EXISTS idx_records_path ON function_records(path);

CREATE VIEW IF NOT EXISTS file_nodes AS
SELECT id, path,
       json_object('element_id', 'file:' || id,
                   'labels', json_array('File'),
                   'properties', json_object('path', path)) AS node
FROM files;

CREATE VIEW IF NOT EXISTS function_nodes AS
SELECT id, name, path,
       json_object('element_id', 'function:' || id,
                   'labels', json_array('Function'),
                   'properties', json_object('name', name, 'path', path)) AS node
FROM functions;

CREATE VIEW IF NOT EXISTS imports_from_rels AS
SELECT id, source_id, target_id, clause,
       json_object('element_id', 'imports_from:' || id,
                   'type', 'IMPORTS_FROM',
                   'start', 'file:' || source_id,
                   'end', 'file:' || target_id,
                   'properties', json_object('clause', clause)) AS rel
FROM imports_from;

CREATE VIEW IF NOT EXISTS calls_rels AS
SELECT id, caller_id, callee_id,
       json_object('element_id', 'calls:' || id,
                   'type', 'CALLS',
                   'start', 'function:' || caller_id,
                   'end', 'function:' || callee_id,
                   'properties', json_object()) AS rel
FROM calls;
"#;

/// Fixed detail queries: CALLS edges into / out of one function.
const SQL_CALLERS: &str = "SELECT src.node AS caller, c.rel AS call
     FROM calls_rels c JOIN function_nodes src ON src.id = c.caller_id
     WHERE c.callee_id = ?1 ORDER BY c.id";
const SQL_CALLEES: &str = "SELECT c.rel AS call, dst.node AS callee
     FROM calls_rels c JOIN function_nodes dst ON dst.id = c.callee_id
     WHERE c.caller_id = ?1 ORDER BY c.id";

/// Register sqlite-vec for every connection opened after this call.
fn register_sqlite_vec() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        // SAFETY: sqlite3_vec_init is a SQLite extension entry point.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
    });
}

pub struct Database {
    conn: Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

/// A Function node as stored, including its declaration text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredFunction {
    pub element_id: String,
    pub name: String,
    pub path: String,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub num_files: u32,
    pub num_functions: u32,
    pub num_imports: u32,
    pub num_calls: u32,
    pub num_records: u32,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        register_sqlite_vec();
        let conn = Connection::open(path.as_ref()).context("Failed to open database")?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA synchronous=NORMAL;
             PRAGMA cache_size=-65536;
             PRAGMA temp_store=MEMORY;",
        )
        .context("Failed to set pragmas")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create schema")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests and benchmarks).
    #[doc(hidden)]
    pub fn open_memory() -> Result<Self> {
        register_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // ── Nodes ──

    /// Merge a File node, returning its element id.
    pub fn merge_file(&self, path: &str) -> Result<String> {
        let id = merge_file_row(&self.conn, path)?;
        Ok(element_id(ElementKind::File, id))
    }

    /// Merge a Function node. A `None` body never overwrites a stored one.
    pub fn merge_function(&self, name: &str, path: &str, body: Option<&str>) -> Result<String> {
        let id = merge_function_row(&self.conn, name, path, body)?;
        Ok(element_id(ElementKind::Function, id))
    }

    // ── Edges ──

    /// Merge an IMPORTS_FROM edge and both endpoint File nodes.
    pub fn merge_import(&self, source_path: &str, target_path: &str, clause: &str) -> Result<String> {
        let tx = self.conn.unchecked_transaction()?;
        let source_id = merge_file_row(&tx, source_path)?;
        let target_id = merge_file_row(&tx, target_path)?;
        let id: i64 = tx
            .prepare_cached(SQL_MERGE_IMPORT)?
            .query_row(params![source_id, target_id, clause], |row| row.get(0))?;
        tx.commit()?;
        Ok(element_id(ElementKind::ImportsFrom, id))
    }

    /// Merge a CALLS edge and both endpoint Function nodes.
    pub fn merge_call(&self, caller: &FunctionKey, callee: &FunctionKey) -> Result<String> {
        let tx = self.conn.unchecked_transaction()?;
        let caller_id = merge_function_row(&tx, &caller.name, &caller.path, None)?;
        let callee_id = merge_function_row(&tx, &callee.name, &callee.path, None)?;
        let id: i64 = tx
            .prepare_cached(SQL_MERGE_CALL)?
            .query_row(params![caller_id, callee_id], |row| row.get(0))?;
        tx.commit()?;
        Ok(element_id(ElementKind::Calls, id))
    }

    /// Target file of the first import in `file` whose clause is `clause`.
    pub fn import_target(&self, file: &str, clause: &str) -> Result<Option<String>> {
        self.conn
            .prepare_cached(
                "SELECT t.path FROM imports_from i
                 JOIN files s ON s.id = i.source_id
                 JOIN files t ON t.id = i.target_id
                 WHERE s.path = ?1 AND i.clause = ?2
                 ORDER BY i.id LIMIT 1",
            )?
            .query_row(params![file, clause], |row| row.get(0))
            .optional()
            .context("Failed to query import target")
    }

    /// Delete IMPORTS_FROM edges out of `file` that are not in `keep`.
    pub fn prune_imports(&self, file: &str, keep: &[ImportRecord]) -> Result<u32> {
        let keep: HashSet<(&str, &str)> = keep
            .iter()
            .map(|i| (i.clause.as_str(), i.resolved_source.as_str()))
            .collect();

        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.clause, t.path FROM imports_from i
             JOIN files s ON s.id = i.source_id
             JOIN files t ON t.id = i.target_id
             WHERE s.path = ?1",
        )?;
        let existing = stmt
            .query_map(params![file], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let stale: Vec<i64> = existing
            .into_iter()
            .filter(|(_, clause, target)| !keep.contains(&(clause.as_str(), target.as_str())))
            .map(|(id, _, _)| id)
            .collect();
        self.delete_by_ids("imports_from", &stale)
    }

    /// Delete CALLS edges out of functions in `file` that are not in `keep`.
    pub fn prune_calls(&self, file: &str, keep: &[(FunctionKey, FunctionKey)]) -> Result<u32> {
        let keep: HashSet<(&str, &str, &str)> = keep
            .iter()
            .map(|(caller, callee)| {
                (
                    caller.name.as_str(),
                    callee.name.as_str(),
                    callee.path.as_str(),
                )
            })
            .collect();

        let mut stmt = self.conn.prepare(
            "SELECT c.id, src.name, dst.name, dst.path FROM calls c
             JOIN functions src ON src.id = c.caller_id
             JOIN functions dst ON dst.id = c.callee_id
             WHERE src.path = ?1",
        )?;
        let existing = stmt
            .query_map(params![file], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let stale: Vec<i64> = existing
            .into_iter()
            .filter(|(_, caller, callee, callee_path)| {
                !keep.contains(&(caller.as_str(), callee.as_str(), callee_path.as_str()))
            })
            .map(|(id, _, _, _)| id)
            .collect();
        self.delete_by_ids("calls", &stale)
    }

    /// Retire Function nodes in `file` whose names are not in `keep`.
    ///
    /// Each retired function loses its record, embedding, body and outgoing
    /// CALLS edges. The node itself is deleted unless a CALLS edge still
    /// targets it, in which case it stays as a body-less endpoint.
    pub fn prune_functions(&self, file: &str, keep: &[String]) -> Result<u32> {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();

        let existing = {
            let mut stmt = self
                .conn
                .prepare("SELECT id, name FROM functions WHERE path = ?1")?;
            let rows = stmt
                .query_map(params![file], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        let stale: Vec<i64> = existing
            .into_iter()
            .filter(|(_, name)| !keep.contains(name.as_str()))
            .map(|(id, _)| id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut retired = 0;
        for id in &stale {
            let element = element_id(ElementKind::Function, *id);
            let vec_id: Option<i64> = tx
                .query_row(
                    "SELECT vec_id FROM function_records WHERE element_id = ?1",
                    params![element],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(vec_id) = vec_id {
                tx.execute("DELETE FROM vec_functions WHERE rowid = ?1", params![vec_id])?;
            }
            let mut changed = tx.execute(
                "DELETE FROM function_records WHERE element_id = ?1",
                params![element],
            )?;
            changed += tx.execute("DELETE FROM calls WHERE caller_id = ?1", params![id])?;
            changed += tx.execute(
                "DELETE FROM functions WHERE id = ?1
                 AND NOT EXISTS (SELECT 1 FROM calls WHERE callee_id = ?1)",
                params![id],
            )?;
            changed += tx.execute(
                "UPDATE functions SET body = NULL WHERE id = ?1 AND body IS NOT NULL",
                params![id],
            )?;
            // Endpoint-only nodes are already retired.
            if changed > 0 {
                retired += 1;
            }
        }
        tx.commit()?;
        Ok(retired)
    }

    fn delete_by_ids(&self, table: &str, ids: &[i64]) -> Result<u32> {
        if ids.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {table} WHERE id = ?1"))?;
            for id in ids {
                deleted += stmt.execute(params![id])? as u32;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Remove a deleted file: its functions, their records, its outgoing imports,
    /// and its File node unless another file still imports it.
    pub fn remove_file(&self, path: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        let vec_ids = {
            let mut stmt = tx.prepare("SELECT vec_id FROM function_records WHERE path = ?1")?;
            let ids = stmt
                .query_map(params![path], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };
        for vec_id in vec_ids {
            tx.execute("DELETE FROM vec_functions WHERE rowid = ?1", params![vec_id])?;
        }
        tx.execute("DELETE FROM function_records WHERE path = ?1", params![path])?;
        tx.execute("DELETE FROM functions WHERE path = ?1", params![path])?;
        tx.execute(
            "DELETE FROM imports_from
             WHERE source_id = (SELECT id FROM files WHERE path = ?1)",
            params![path],
        )?;
        tx.execute(
            "DELETE FROM files WHERE path = ?1
             AND NOT EXISTS (SELECT 1 FROM imports_from WHERE target_id = files.id)",
            params![path],
        )?;

        tx.commit()?;
        Ok(())
    }

    // ── Queries ──

    /// Look up a Function node by element id.
    pub fn function_by_id(&self, id: &str) -> Result<Option<StoredFunction>> {
        let rowid = match parse_element_id(id) {
            Some((ElementKind::Function, rowid)) => rowid,
            _ => return Ok(None),
        };
        self.conn
            .query_row(
                "SELECT id, name, path, body FROM functions WHERE id = ?1",
                params![rowid],
                row_to_function,
            )
            .optional()
            .context("Failed to query function")
    }

    /// Look up a Function node by its `(name, path)` key.
    pub fn function_by_key(&self, key: &FunctionKey) -> Result<Option<StoredFunction>> {
        self.conn
            .query_row(
                "SELECT id, name, path, body FROM functions WHERE name = ?1 AND path = ?2",
                params![key.name, key.path],
                row_to_function,
            )
            .optional()
            .context("Failed to query function")
    }

    /// Caller and callee records for one function, for subgraph extraction.
    pub fn function_detail(&self, id: &str) -> Result<(Vec<Record>, Vec<Record>)> {
        let rowid = match parse_element_id(id) {
            Some((ElementKind::Function, rowid)) => rowid,
            _ => anyhow::bail!("not a function element id: {id}"),
        };
        let param = [serde_json::Value::from(rowid)];
        let callers = self.query_records(SQL_CALLERS, &param, usize::MAX)?;
        let callees = self.query_records(SQL_CALLEES, &param, usize::MAX)?;
        Ok((callers, callees))
    }

    /// Execute a read-only query and decode up to `max_rows` rows.
    ///
    /// The connection is switched to `query_only` for the duration, so any
    /// statement that writes fails with SQLite's own error message.
    pub fn run_read_only(
        &self,
        query: &str,
        params: &[serde_json::Value],
        max_rows: usize,
    ) -> Result<Vec<Record>> {
        self.conn.execute_batch("PRAGMA query_only = ON;")?;
        let result = self.query_records(query, params, max_rows);
        self.conn.execute_batch("PRAGMA query_only = OFF;")?;
        result
    }

    fn query_records(
        &self,
        query: &str,
        params: &[serde_json::Value],
        max_rows: usize,
    ) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(query)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let bound: Vec<SqlValue> = params.iter().map(json_to_sql).collect();

        let mut rows = stmt.query(params_from_iter(bound.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            if records.len() >= max_rows {
                break;
            }
            let mut fields = Vec::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                fields.push((name.clone(), decode_value(row.get_ref(i)?)));
            }
            records.push(Record { fields });
        }
        Ok(records)
    }

    /// Graph and record counts.
    pub fn stats(&self) -> Result<GraphStats> {
        let count = |sql: &str| -> Result<u32> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };
        Ok(GraphStats {
            num_files: count("SELECT COUNT(*) FROM files")?,
            num_functions: count("SELECT COUNT(*) FROM functions")?,
            num_imports: count("SELECT COUNT(*) FROM imports_from")?,
            num_calls: count("SELECT COUNT(*) FROM calls")?,
            num_records: count("SELECT COUNT(*) FROM function_records")?,
        })
    }

    /// Returns `true` if at least one file has been registered.
    pub fn has_files(&self) -> Result<bool> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM files LIMIT 1", [], |_| Ok(()))
            .optional()?
            .is_some())
    }

    // ── Function records ──

    /// Stored body hash for an enriched function, if any.
    pub fn record_hash(&self, id: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT body_hash FROM function_records WHERE element_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query function record")
    }

    /// Insert or update a record and replace its embedding.
    pub fn upsert_record(&self, record: &FunctionRecord) -> Result<()> {
        anyhow::ensure!(
            record.embedding.len() == EMBEDDING_DIM,
            "expected {EMBEDDING_DIM}-dim embedding, got {}",
            record.embedding.len()
        );

        let tx = self.conn.unchecked_transaction()?;
        let vec_id: i64 = tx.prepare_cached(SQL_UPSERT_RECORD)?.query_row(
            params![
                record.id,
                record.name,
                record.path,
                record.raw_text,
                record.summary,
                record.body_hash,
            ],
            |row| row.get(0),
        )?;
        tx.execute("DELETE FROM vec_functions WHERE rowid = ?1", params![vec_id])?;
        tx.execute(
            "INSERT INTO vec_functions (rowid, embedding) VALUES (?1, ?2)",
            params![vec_id, embedding_to_bytes(&record.embedding)],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// K nearest records to `embedding`, closest first, as `(element_id, distance)`.
    pub fn similarity_search(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f64)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare_cached(
            "SELECT rowid, distance FROM vec_functions
             WHERE embedding MATCH ?1 AND k = ?2
             ORDER BY distance",
        )?;
        let neighbours = stmt
            .query_map(params![embedding_to_bytes(embedding), k as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut lookup = self
            .conn
            .prepare_cached("SELECT element_id FROM function_records WHERE vec_id = ?1")?;
        let mut results = Vec::with_capacity(neighbours.len());
        for (vec_id, distance) in neighbours {
            let id: Option<String> = lookup
                .query_row(params![vec_id], |row| row.get(0))
                .optional()?;
            if let Some(id) = id {
                results.push((id, distance));
            }
        }
        Ok(results)
    }

    pub fn get_record(&self, id: &str) -> Result<Option<FunctionRecord>> {
        self.conn
            .query_row(
                "SELECT element_id, name, path, raw_text, summary, body_hash
                 FROM function_records WHERE element_id = ?1",
                params![id],
                row_to_record,
            )
            .optional()
            .context("Failed to query function record")
    }

    /// Records for `ids`, in the order given. Unknown ids are skipped.
    pub fn records_by_ids(&self, ids: &[String]) -> Result<Vec<FunctionRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get_record(id)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

fn merge_file_row(conn: &Connection, path: &str) -> rusqlite::Result<i64> {
    conn.prepare_cached(SQL_MERGE_FILE)?
        .query_row(params![path], |row| row.get(0))
}

fn merge_function_row(
    conn: &Connection,
    name: &str,
    path: &str,
    body: Option<&str>,
) -> rusqlite::Result<i64> {
    conn.prepare_cached(SQL_MERGE_FUNCTION)?
        .query_row(params![name, path, body], |row| row.get(0))
}

// ── Row Mapping Helpers ──

fn row_to_function(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredFunction> {
    Ok(StoredFunction {
        element_id: element_id(ElementKind::Function, row.get(0)?),
        name: row.get(1)?,
        path: row.get(2)?,
        body: row.get(3)?,
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FunctionRecord> {
    Ok(FunctionRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        raw_text: row.get(3)?,
        summary: row.get(4)?,
        body_hash: row.get(5)?,
        embedding: Vec::new(),
    })
}

fn json_to_sql(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(*b as i64),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Decode one SQLite column value. Text holding a node, relationship or
/// array of those becomes a graph value; everything else is a scalar.
fn decode_value(value: ValueRef<'_>) -> GraphValue {
    match value {
        ValueRef::Null => GraphValue::Scalar(serde_json::Value::Null),
        ValueRef::Integer(i) => GraphValue::Scalar(i.into()),
        ValueRef::Real(f) => GraphValue::Scalar(
            serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        ),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            decode_text(&text).unwrap_or_else(|| GraphValue::Scalar(text.into_owned().into()))
        }
        ValueRef::Blob(bytes) => {
            GraphValue::Scalar(format!("<blob {} bytes>", bytes.len()).into())
        }
    }
}

fn decode_text(text: &str) -> Option<GraphValue> {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    decode_json(serde_json::from_str(trimmed).ok()?)
}

fn decode_json(value: serde_json::Value) -> Option<GraphValue> {
    match value {
        serde_json::Value::Object(_) if value.get("labels").is_some() => {
            serde_json::from_value::<GraphNode>(value).ok().map(GraphValue::Node)
        }
        serde_json::Value::Object(_) if value.get("type").is_some() => {
            serde_json::from_value::<GraphRelationship>(value)
                .ok()
                .map(GraphValue::Relationship)
        }
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => decode_text(&s),
                other => decode_json(other),
            })
            .collect::<Option<Vec<_>>>()
            .map(GraphValue::List),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_vector(i: usize) -> Vec<f32> {
        let mut v = vec![0.0_f32; EMBEDDING_DIM];
        v[i] = 1.0;
        v
    }

    fn record(id: &str, name: &str, embedding: Vec<f32>) -> FunctionRecord {
        FunctionRecord {
            id: id.to_string(),
            name: name.to_string(),
            path: "/p/a.ts".to_string(),
            raw_text: Some(format!("function {name}() {{}}")),
            summary: format!("summary of {name}"),
            body_hash: "h1".to_string(),
            embedding,
        }
    }

    #[test]
    fn test_merges_are_idempotent() {
        let db = Database::open_memory().unwrap();
        let f1 = db.merge_file("/p/a.ts").unwrap();
        let f2 = db.merge_file("/p/a.ts").unwrap();
        assert_eq!(f1, f2);

        let i1 = db.merge_import("/p/a.ts", "/p/b.ts", "helper").unwrap();
        let i2 = db.merge_import("/p/a.ts", "/p/b.ts", "helper").unwrap();
        assert_eq!(i1, i2);

        let stats = db.stats().unwrap();
        assert_eq!(stats.num_files, 2);
        assert_eq!(stats.num_imports, 1);
    }

    #[test]
    fn test_one_import_edge_per_clause() {
        let db = Database::open_memory().unwrap();
        db.merge_import("/p/a.ts", "/p/b.ts", "x").unwrap();
        db.merge_import("/p/a.ts", "/p/b.ts", "y").unwrap();
        assert_eq!(db.stats().unwrap().num_imports, 2);
        assert_eq!(
            db.import_target("/p/a.ts", "y").unwrap().as_deref(),
            Some("/p/b.ts")
        );
        assert!(db.import_target("/p/a.ts", "z").unwrap().is_none());
        assert!(db.import_target("/p/b.ts", "x").unwrap().is_none());
    }

    #[test]
    fn test_function_body_is_not_cleared_by_bodyless_merge() {
        let db = Database::open_memory().unwrap();
        let id = db
            .merge_function("helper", "/p/b.ts", Some("function helper() {}"))
            .unwrap();
        db.merge_function("helper", "/p/b.ts", None).unwrap();
        let stored = db.function_by_id(&id).unwrap().unwrap();
        assert_eq!(stored.body.as_deref(), Some("function helper() {}"));

        db.merge_function("helper", "/p/b.ts", Some("function helper() { return 1; }"))
            .unwrap();
        let stored = db.function_by_id(&id).unwrap().unwrap();
        assert_eq!(stored.body.as_deref(), Some("function helper() { return 1; }"));
    }

    #[test]
    fn test_call_merge_creates_endpoints() {
        let db = Database::open_memory().unwrap();
        let caller = FunctionKey::new("main", "/p/a.ts");
        let callee = FunctionKey::new("helper", "/p/b.ts");
        let c1 = db.merge_call(&caller, &callee).unwrap();
        let c2 = db.merge_call(&caller, &callee).unwrap();
        assert_eq!(c1, c2);

        let stats = db.stats().unwrap();
        assert_eq!(stats.num_functions, 2);
        assert_eq!(stats.num_calls, 1);
        assert!(db.function_by_key(&callee).unwrap().unwrap().body.is_none());
    }

    #[test]
    fn test_prune_imports_keeps_current_set() {
        let db = Database::open_memory().unwrap();
        db.merge_import("/p/a.ts", "/p/b.ts", "x").unwrap();
        db.merge_import("/p/a.ts", "/p/b.ts", "y").unwrap();
        db.merge_import("/p/c.ts", "/p/b.ts", "y").unwrap();

        let keep = vec![ImportRecord {
            clause: "x".into(),
            resolved_source: "/p/b.ts".into(),
        }];
        assert_eq!(db.prune_imports("/p/a.ts", &keep).unwrap(), 1);
        assert!(db.import_target("/p/a.ts", "y").unwrap().is_none());
        // other files' edges are untouched
        assert!(db.import_target("/p/c.ts", "y").unwrap().is_some());
    }

    #[test]
    fn test_prune_calls_only_touches_callers_in_file() {
        let db = Database::open_memory().unwrap();
        let main = FunctionKey::new("main", "/p/a.ts");
        let other = FunctionKey::new("other", "/p/c.ts");
        let helper = FunctionKey::new("helper", "/p/b.ts");
        let util = FunctionKey::new("util", "/p/b.ts");
        db.merge_call(&main, &helper).unwrap();
        db.merge_call(&main, &util).unwrap();
        db.merge_call(&other, &util).unwrap();

        let pruned = db
            .prune_calls("/p/a.ts", &[(main.clone(), helper.clone())])
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(db.stats().unwrap().num_calls, 2);
    }

    #[test]
    fn test_prune_functions_retires_dropped_declarations() {
        let db = Database::open_memory().unwrap();
        let keep = db
            .merge_function("keep", "/p/a.ts", Some("function keep() {}"))
            .unwrap();
        let gone = db
            .merge_function("gone", "/p/a.ts", Some("function gone() {}"))
            .unwrap();
        let linked = db
            .merge_function("linked", "/p/a.ts", Some("function linked() {}"))
            .unwrap();
        db.upsert_record(&record(&gone, "gone", unit_vector(0))).unwrap();
        db.upsert_record(&record(&linked, "linked", unit_vector(1))).unwrap();
        db.merge_call(&FunctionKey::new("gone", "/p/a.ts"), &FunctionKey::new("util", "/p/c.ts"))
            .unwrap();
        // another file still calls `linked`
        db.merge_call(&FunctionKey::new("main", "/p/b.ts"), &FunctionKey::new("linked", "/p/a.ts"))
            .unwrap();

        let pruned = db.prune_functions("/p/a.ts", &["keep".to_string()]).unwrap();
        assert_eq!(pruned, 2);

        assert!(db.function_by_id(&keep).unwrap().is_some());
        assert!(db.function_by_id(&gone).unwrap().is_none());
        let linked_node = db.function_by_id(&linked).unwrap().unwrap();
        assert!(linked_node.body.is_none());

        assert!(db.record_hash(&gone).unwrap().is_none());
        assert!(db.record_hash(&linked).unwrap().is_none());
        assert!(db.similarity_search(&unit_vector(0), 5).unwrap().is_empty());

        let stats = db.stats().unwrap();
        assert_eq!(stats.num_records, 0);
        assert_eq!(stats.num_calls, 1);
        assert_eq!(db.prune_functions("/p/a.ts", &["keep".to_string()]).unwrap(), 0);
    }

    #[test]
    fn test_remove_file_keeps_node_still_imported() {
        let db = Database::open_memory().unwrap();
        db.merge_import("/p/a.ts", "/p/b.ts", "helper").unwrap();
        db.merge_import("/p/b.ts", "/p/c.ts", "util").unwrap();
        db.merge_function("helper", "/p/b.ts", Some("function helper() {}"))
            .unwrap();
        db.merge_call(
            &FunctionKey::new("main", "/p/a.ts"),
            &FunctionKey::new("helper", "/p/b.ts"),
        )
        .unwrap();

        db.remove_file("/p/b.ts").unwrap();
        let stats = db.stats().unwrap();
        // a.ts still imports b.ts, so the File node and that edge survive
        assert_eq!(stats.num_files, 3);
        assert_eq!(stats.num_imports, 1);
        assert_eq!(stats.num_functions, 1);
        assert_eq!(stats.num_calls, 0);

        db.remove_file("/p/a.ts").unwrap();
        db.remove_file("/p/b.ts").unwrap();
        assert_eq!(db.stats().unwrap().num_files, 1);
    }

    #[test]
    fn test_run_decodes_nodes_relationships_and_scalars() {
        let db = Database::open_memory().unwrap();
        db.merge_import("/p/a.ts", "/p/b.ts", "helper").unwrap();

        let records = db
            .run_read_only(
                "SELECT s.node AS src, r.rel AS rel, t.path AS target, 1.5 AS score
                 FROM imports_from_rels r
                 JOIN file_nodes s ON s.id = r.source_id
                 JOIN file_nodes t ON t.id = r.target_id",
                &[],
                100,
            )
            .unwrap();
        assert_eq!(records.len(), 1);

        match records[0].get("src").unwrap() {
            GraphValue::Node(n) => {
                assert_eq!(n.labels, vec!["File".to_string()]);
                assert_eq!(n.prop("path"), Some("/p/a.ts"));
            }
            other => panic!("expected node, got {other:?}"),
        }
        match records[0].get("rel").unwrap() {
            GraphValue::Relationship(r) => {
                assert_eq!(r.rel_type, "IMPORTS_FROM");
                assert_eq!(r.properties["clause"], "helper");
            }
            other => panic!("expected relationship, got {other:?}"),
        }
        assert_eq!(
            records[0].get("target"),
            Some(&GraphValue::Scalar("/p/b.ts".into()))
        );
        assert_eq!(
            records[0].get("score"),
            Some(&GraphValue::Scalar(serde_json::json!(1.5)))
        );
    }

    #[test]
    fn test_run_decodes_aggregated_lists() {
        let db = Database::open_memory().unwrap();
        db.merge_file("/p/a.ts").unwrap();
        db.merge_file("/p/b.ts").unwrap();
        let records = db
            .run_read_only("SELECT json_group_array(json(node)) AS all_files FROM file_nodes", &[], 10)
            .unwrap();
        match records[0].get("all_files").unwrap() {
            GraphValue::List(items) => {
                assert_eq!(items.len(), 2);
                assert!(items.iter().all(|v| matches!(v, GraphValue::Node(_))));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_run_rejects_writes() {
        let db = Database::open_memory().unwrap();
        let err = db
            .run_read_only("DELETE FROM files", &[], 10)
            .unwrap_err();
        assert!(err.to_string().contains("readonly") || err.to_string().contains("read-only"));
        // connection is writable again afterwards
        db.merge_file("/p/a.ts").unwrap();
    }

    #[test]
    fn test_run_reports_syntax_errors() {
        let db = Database::open_memory().unwrap();
        let err = db.run_read_only("SELEC * FROM files", &[], 10).unwrap_err();
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_run_caps_rows_and_binds_params() {
        let db = Database::open_memory().unwrap();
        for i in 0..5 {
            db.merge_file(&format!("/p/{i}.ts")).unwrap();
        }
        let records = db.run_read_only("SELECT path FROM files", &[], 3).unwrap();
        assert_eq!(records.len(), 3);

        let records = db
            .run_read_only(
                "SELECT path FROM files WHERE path = ?1",
                &[serde_json::json!("/p/4.ts")],
                10,
            )
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_function_detail_splits_callers_and_callees() {
        let db = Database::open_memory().unwrap();
        let a = FunctionKey::new("a", "/p/a.ts");
        let b = FunctionKey::new("b", "/p/b.ts");
        let c = FunctionKey::new("c", "/p/c.ts");
        db.merge_call(&a, &b).unwrap();
        db.merge_call(&b, &c).unwrap();

        let b_id = db.function_by_key(&b).unwrap().unwrap().element_id;
        let (callers, callees) = db.function_detail(&b_id).unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callees.len(), 1);
        match callers[0].get("caller").unwrap() {
            GraphValue::Node(n) => assert_eq!(n.prop("name"), Some("a")),
            other => panic!("expected node, got {other:?}"),
        }
        assert!(db.function_detail("file:1").is_err());
    }

    #[test]
    fn test_upsert_record_and_similarity_search() {
        let db = Database::open_memory().unwrap();
        db.upsert_record(&record("function:1", "alpha", unit_vector(0)))
            .unwrap();
        db.upsert_record(&record("function:2", "beta", unit_vector(1)))
            .unwrap();

        let hits = db.similarity_search(&unit_vector(1), 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "function:2");
        assert!(hits[0].1 <= hits[1].1);

        // re-embedding moves the record
        let mut moved = record("function:1", "alpha", unit_vector(1));
        moved.body_hash = "h2".into();
        db.upsert_record(&moved).unwrap();
        assert_eq!(db.record_hash("function:1").unwrap().as_deref(), Some("h2"));
        assert_eq!(db.stats().unwrap().num_records, 2);
    }

    #[test]
    fn test_upsert_rejects_wrong_dimension() {
        let db = Database::open_memory().unwrap();
        assert!(db
            .upsert_record(&record("function:1", "alpha", vec![1.0, 0.0]))
            .is_err());
    }

    #[test]
    fn test_records_by_ids_preserves_order() {
        let db = Database::open_memory().unwrap();
        db.upsert_record(&record("function:1", "alpha", unit_vector(0)))
            .unwrap();
        db.upsert_record(&record("function:2", "beta", unit_vector(1)))
            .unwrap();
        let records = db
            .records_by_ids(&[
                "function:2".to_string(),
                "function:9".to_string(),
                "function:1".to_string(),
            ])
            .unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "alpha"]);
    }

    #[test]
    fn test_empty_db_stats() {
        let db = Database::open_memory().unwrap();
        assert_eq!(db.stats().unwrap(), GraphStats::default());
        assert!(!db.has_files().unwrap());
    }
}
