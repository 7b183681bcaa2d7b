//! SQLite-backed persistent log of captured requests and their SSE events.

use crate::model::{CapturedRequest, Headers, RequestSummary, SseEventRecord, StoreStats};
use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS requests (
        id TEXT PRIMARY KEY,
        sequence INTEGER NOT NULL,
        timestamp TEXT NOT NULL,
        agent_type TEXT NOT NULL,
        source_pid INTEGER,
        method TEXT NOT NULL,
        url TEXT NOT NULL,
        host TEXT NOT NULL,
        path TEXT NOT NULL,
        request_headers TEXT NOT NULL DEFAULT '{}',
        request_body TEXT,
        request_size INTEGER NOT NULL DEFAULT 0,
        status_code INTEGER,
        response_headers TEXT,
        response_body TEXT,
        response_size INTEGER,
        duration_ms INTEGER,
        ttfb_ms INTEGER,
        protocol_type TEXT NOT NULL DEFAULT 'http',
        api_provider TEXT,
        session_id TEXT,
        conversation_id TEXT,
        is_streaming INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS sse_events (
        id TEXT PRIMARY KEY,
        request_id TEXT NOT NULL,
        event_index INTEGER NOT NULL,
        event_type TEXT NOT NULL DEFAULT 'message',
        data TEXT NOT NULL DEFAULT '',
        timestamp TEXT NOT NULL,
        FOREIGN KEY (request_id) REFERENCES requests(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON requests(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_requests_host ON requests(host)",
    "CREATE INDEX IF NOT EXISTS idx_requests_agent_type ON requests(agent_type)",
    "CREATE INDEX IF NOT EXISTS idx_sse_events_request_id ON sse_events(request_id)",
];

/// Allowlisted filter keys for `list_requests`; anything else is silently
/// ignored, matching the fixed vocabulary the API layer exposes.
fn filter_clause(key: &str) -> Option<&'static str> {
    Some(match key {
        "agent_type" => "agent_type = ?",
        "host" => "host = ?",
        "method" => "method = ?",
        "protocol_type" => "protocol_type = ?",
        "status_code" => "status_code = ?",
        "is_streaming" => "is_streaming = ?",
        "session_id" => "session_id = ?",
        "api_provider" => "api_provider = ?",
        "search" => "(url LIKE ? OR host LIKE ? OR path LIKE ?)",
        _ => return None,
    })
}

/// Fields `update_request` is permitted to touch: the response half and
/// post-classification fields, never the request half or identity.
fn updatable_column(key: &str) -> bool {
    matches!(
        key,
        "status_code"
            | "response_headers"
            | "response_body"
            | "response_size"
            | "duration_ms"
            | "ttfb_ms"
            | "is_streaming"
            | "protocol_type"
            | "api_provider"
            | "session_id"
            | "conversation_id"
    )
}

/// A single filter value accepted by [`Store::list_requests`].
#[derive(Debug, Clone)]
pub enum FilterValue {
    Text(String),
    Int(i64),
    Bool(bool),
}

/// A single update value accepted by [`Store::update_request`].
#[derive(Debug, Clone)]
pub enum FieldValue {
    Text(Option<String>),
    Int(Option<i64>),
    Bool(bool),
}

pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (creating if necessary) the database at `path` and apply schema.
    pub fn init(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("creating data directory")?;
        }
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::new(manager).context("creating sqlite connection pool")?;
        {
            let conn = pool.get().context("getting connection for schema init")?;
            for statement in SCHEMA_STATEMENTS {
                conn.execute(statement, []).context("applying schema")?;
            }
        }
        Ok(Self { pool })
    }

    /// Open an in-memory store, for tests.
    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::new(manager)?;
        {
            let conn = pool.get()?;
            for statement in SCHEMA_STATEMENTS {
                conn.execute(statement, [])?;
            }
        }
        Ok(Self { pool })
    }

    pub fn close(&self) {
        // r2d2 drops connections when the pool is dropped; nothing to flush
        // explicitly since every write already committed synchronously.
    }

    pub async fn save_request(&self, record: &CapturedRequest) -> Result<()> {
        let pool = self.pool.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || Self::save_request_sync(&pool, &record)).await?
    }

    fn save_request_sync(pool: &Pool<SqliteConnectionManager>, record: &CapturedRequest) -> Result<()> {
        let conn = pool.get()?;
        conn.execute(
            "INSERT INTO requests (
                id, sequence, timestamp, agent_type, source_pid,
                method, url, host, path,
                request_headers, request_body, request_size,
                status_code, response_headers, response_body, response_size,
                duration_ms, ttfb_ms,
                protocol_type, api_provider,
                session_id, conversation_id, is_streaming
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)",
            params![
                record.id.to_string(),
                record.sequence as i64,
                record.timestamp.to_rfc3339(),
                record.agent_type,
                record.source_pid,
                record.method,
                record.url,
                record.host,
                record.path,
                serde_json::to_string(&record.request_headers)?,
                record.request_body,
                record.request_size as i64,
                record.status_code,
                record.response_headers.as_ref().map(serde_json::to_string).transpose()?,
                record.response_body,
                record.response_size.map(|v| v as i64),
                record.duration_ms.map(|v| v as i64),
                record.ttfb_ms.map(|v| v as i64),
                record.protocol_type,
                record.api_provider,
                record.session_id,
                record.conversation_id,
                record.is_streaming as i64,
            ],
        )?;
        Ok(())
    }

    /// Partial update of the response half / classification fields. Columns
    /// outside [`updatable_column`] are rejected.
    pub async fn update_request(&self, id: Uuid, fields: HashMap<String, FieldValue>) -> Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || Self::update_request_sync(&pool, id, fields)).await?
    }

    fn update_request_sync(
        pool: &Pool<SqliteConnectionManager>,
        id: Uuid,
        fields: HashMap<String, FieldValue>,
    ) -> Result<()> {
        let accepted: Vec<(&str, &FieldValue)> = fields
            .iter()
            .filter(|(k, _)| updatable_column(k))
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        if accepted.is_empty() {
            return Ok(());
        }
        let set_clause = accepted.iter().map(|(k, _)| format!("{k} = ?")).collect::<Vec<_>>().join(", ");
        let sql = format!("UPDATE requests SET {set_clause} WHERE id = ?");
        let mut stmt_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        for (_, v) in &accepted {
            stmt_params.push(match v {
                FieldValue::Text(t) => Box::new(t.clone()),
                FieldValue::Int(i) => Box::new(*i),
                FieldValue::Bool(b) => Box::new(*b as i64),
            });
        }
        stmt_params.push(Box::new(id.to_string()));

        let conn = pool.get()?;
        let refs: Vec<&dyn rusqlite::ToSql> = stmt_params.iter().map(|b| b.as_ref()).collect();
        conn.execute(&sql, refs.as_slice())?;
        Ok(())
    }

    /// Bulk-insert an ordered batch of SSE events for one request, in a
    /// single transaction.
    pub async fn save_sse_events(&self, events: &[SseEventRecord]) -> Result<()> {
        let pool = self.pool.clone();
        let events = events.to_vec();
        tokio::task::spawn_blocking(move || Self::save_sse_events_sync(&pool, &events)).await?
    }

    fn save_sse_events_sync(pool: &Pool<SqliteConnectionManager>, events: &[SseEventRecord]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = pool.get()?;
        let tx = conn.transaction()?;
        for event in events {
            tx.execute(
                "INSERT INTO sse_events (id, request_id, event_index, event_type, data, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.id.to_string(),
                    event.request_id.to_string(),
                    event.event_index,
                    event.event_type,
                    event.data,
                    event.timestamp.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub async fn get_request(&self, id: Uuid) -> Result<Option<CapturedRequest>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || Self::get_request_sync(&pool, id)).await?
    }

    fn get_request_sync(pool: &Pool<SqliteConnectionManager>, id: Uuid) -> Result<Option<CapturedRequest>> {
        let conn = pool.get()?;
        let record = conn
            .query_row("SELECT * FROM requests WHERE id = ?1", params![id.to_string()], row_to_record)
            .optional()?;
        let Some(mut record) = record else { return Ok(None) };
        record.sse_events = Self::get_sse_events_sync(pool, id)?;
        Ok(Some(record))
    }

    pub async fn get_sse_events(&self, request_id: Uuid) -> Result<Vec<SseEventRecord>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || Self::get_sse_events_sync(&pool, request_id)).await?
    }

    fn get_sse_events_sync(pool: &Pool<SqliteConnectionManager>, request_id: Uuid) -> Result<Vec<SseEventRecord>> {
        let conn = pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, request_id, event_index, event_type, data, timestamp
             FROM sse_events WHERE request_id = ?1 ORDER BY event_index",
        )?;
        let rows = stmt.query_map(params![request_id.to_string()], |row| {
            Ok(SseEventRecord {
                id: parse_uuid(row.get::<_, String>(0)?),
                request_id: parse_uuid(row.get::<_, String>(1)?),
                event_index: row.get::<_, i64>(2)? as u32,
                event_type: row.get(3)?,
                data: row.get(4)?,
                timestamp: parse_timestamp(row.get::<_, String>(5)?),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub async fn list_requests(
        &self,
        filters: HashMap<String, FilterValue>,
        order_by: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RequestSummary>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            Self::list_requests_sync(&pool, filters, order_by, limit, offset)
        })
        .await?
    }

    fn list_requests_sync(
        pool: &Pool<SqliteConnectionManager>,
        filters: HashMap<String, FilterValue>,
        order_by: Option<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RequestSummary>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        for (key, value) in &filters {
            let Some(clause) = filter_clause(key) else { continue };
            clauses.push(clause);
            match (key.as_str(), value) {
                ("search", FilterValue::Text(s)) => {
                    let pattern = format!("%{s}%");
                    values.push(Box::new(pattern.clone()));
                    values.push(Box::new(pattern.clone()));
                    values.push(Box::new(pattern));
                }
                (_, FilterValue::Text(s)) => values.push(Box::new(s.clone())),
                (_, FilterValue::Int(i)) => values.push(Box::new(*i)),
                (_, FilterValue::Bool(b)) => values.push(Box::new(*b as i64)),
            }
        }
        let where_clause = if clauses.is_empty() { String::new() } else { format!(" WHERE {}", clauses.join(" AND ")) };
        let order_by = validate_order_by(order_by.as_deref());
        let sql = format!(
            "SELECT id, sequence, timestamp, method, host, path, status_code, agent_type, \
             protocol_type, duration_ms, response_size, is_streaming FROM requests{where_clause} \
             ORDER BY {order_by} LIMIT ? OFFSET ?"
        );
        values.push(Box::new(limit));
        values.push(Box::new(offset));

        let conn = pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(refs.as_slice(), row_to_summary)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub async fn clear_all(&self) -> Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.execute("DELETE FROM sse_events", [])?;
            conn.execute("DELETE FROM requests", [])?;
            Ok::<(), anyhow::Error>(())
        })
        .await?
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            conn.query_row(
                "SELECT
                    COUNT(*),
                    COUNT(DISTINCT host),
                    COUNT(DISTINCT agent_type),
                    COALESCE(SUM(request_size), 0),
                    COALESCE(SUM(response_size), 0),
                    COALESCE(AVG(duration_ms), 0.0),
                    COALESCE(SUM(CASE WHEN is_streaming = 1 THEN 1 ELSE 0 END), 0)
                 FROM requests",
                [],
                |row| {
                    Ok(StoreStats {
                        total_requests: row.get::<_, i64>(0)? as u64,
                        unique_hosts: row.get::<_, i64>(1)? as u64,
                        unique_agents: row.get::<_, i64>(2)? as u64,
                        total_request_bytes: row.get::<_, i64>(3)? as u64,
                        total_response_bytes: row.get::<_, i64>(4)? as u64,
                        avg_duration_ms: row.get(5)?,
                        streaming_count: row.get::<_, i64>(6)? as u64,
                    })
                },
            )
            .map_err(Into::into)
        })
        .await?
    }
}

fn validate_order_by(requested: Option<&str>) -> &'static str {
    const ALLOWED: &[(&str, &str)] = &[
        ("sequence DESC", "sequence DESC"),
        ("sequence ASC", "sequence ASC"),
        ("timestamp DESC", "timestamp DESC"),
        ("timestamp ASC", "timestamp ASC"),
        ("duration_ms DESC", "duration_ms DESC"),
        ("duration_ms ASC", "duration_ms ASC"),
    ];
    requested
        .and_then(|r| ALLOWED.iter().find(|(name, _)| *name == r))
        .map(|(_, sql)| *sql)
        .unwrap_or("sequence DESC")
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or(Uuid::nil())
}

fn parse_timestamp(s: String) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&chrono::Utc)).unwrap_or_else(|_| chrono::Utc::now())
}

fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<RequestSummary> {
    Ok(RequestSummary {
        id: parse_uuid(row.get(0)?),
        sequence: row.get::<_, i64>(1)? as u64,
        timestamp: parse_timestamp(row.get(2)?),
        method: row.get(3)?,
        host: row.get(4)?,
        path: row.get(5)?,
        status_code: row.get::<_, Option<i64>>(6)?.map(|v| v as u16),
        agent_type: row.get(7)?,
        protocol_type: row.get(8)?,
        duration_ms: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
        response_size: row.get::<_, Option<i64>>(10)?.map(|v| v as u64),
        is_streaming: row.get::<_, i64>(11)? != 0,
    })
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<CapturedRequest> {
    let request_headers: Headers = serde_json::from_str(&row.get::<_, String>("request_headers")?).unwrap_or_default();
    let response_headers: Option<Headers> = row
        .get::<_, Option<String>>("response_headers")?
        .and_then(|s| serde_json::from_str(&s).ok());

    Ok(CapturedRequest {
        id: parse_uuid(row.get("id")?),
        sequence: row.get::<_, i64>("sequence")? as u64,
        timestamp: parse_timestamp(row.get("timestamp")?),
        agent_type: row.get("agent_type")?,
        protocol_type: row.get("protocol_type")?,
        api_provider: row.get("api_provider")?,
        session_id: row.get("session_id")?,
        source_pid: row.get::<_, Option<i64>>("source_pid")?.map(|v| v as u32),
        conversation_id: row.get("conversation_id")?,
        method: row.get("method")?,
        url: row.get("url")?,
        host: row.get("host")?,
        path: row.get("path")?,
        request_headers,
        request_body: row.get::<_, Option<String>>("request_body")?.unwrap_or_default(),
        request_size: row.get::<_, i64>("request_size")? as u64,
        status_code: row.get::<_, Option<i64>>("status_code")?.map(|v| v as u16),
        response_headers,
        response_body: row.get("response_body")?,
        response_size: row.get::<_, Option<i64>>("response_size")?.map(|v| v as u64),
        duration_ms: row.get::<_, Option<i64>>("duration_ms")?.map(|v| v as u64),
        ttfb_ms: row.get::<_, Option<i64>>("ttfb_ms")?.map(|v| v as u64),
        is_streaming: row.get::<_, i64>("is_streaming")? != 0,
        sse_events: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_record(sequence: u64) -> CapturedRequest {
        CapturedRequest {
            id: Uuid::new_v4(),
            sequence,
            timestamp: Utc::now(),
            agent_type: "claude_code".to_string(),
            protocol_type: "anthropic".to_string(),
            api_provider: Some("anthropic".to_string()),
            session_id: None,
            source_pid: None,
            conversation_id: None,
            method: "POST".to_string(),
            url: "https://api.anthropic.com/v1/messages".to_string(),
            host: "api.anthropic.com".to_string(),
            path: "/v1/messages".to_string(),
            request_headers: HashMap::new(),
            request_body: "{}".to_string(),
            request_size: 2,
            status_code: None,
            response_headers: None,
            response_body: None,
            response_size: None,
            duration_ms: None,
            ttfb_ms: None,
            is_streaming: false,
            sse_events: Vec::new(),
        }
    }

    #[tokio::test]
    async fn save_and_fetch_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let record = sample_record(1);
        store.save_request(&record).await.unwrap();
        let fetched = store.get_request(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.host, record.host);
    }

    #[tokio::test]
    async fn sequence_strictly_increasing_in_list() {
        let store = Store::open_in_memory().unwrap();
        for seq in 1..=3u64 {
            store.save_request(&sample_record(seq)).await.unwrap();
        }
        let listed = store
            .list_requests(HashMap::new(), Some("sequence ASC".to_string()), 100, 0)
            .await
            .unwrap();
        let sequences: Vec<u64> = listed.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn sse_events_are_gap_free_and_ordered() {
        let store = Store::open_in_memory().unwrap();
        let record = sample_record(1);
        store.save_request(&record).await.unwrap();
        let events: Vec<_> = (0..3)
            .map(|i| SseEventRecord {
                id: Uuid::new_v4(),
                request_id: record.id,
                event_index: i,
                event_type: "message".to_string(),
                data: format!("chunk-{i}"),
                timestamp: Utc::now(),
            })
            .collect();
        store.save_sse_events(&events).await.unwrap();
        let fetched = store.get_sse_events(record.id).await.unwrap();
        let indices: Vec<u32> = fetched.iter().map(|e| e.event_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn clear_all_empties_requests_and_events() {
        let store = Store::open_in_memory().unwrap();
        store.save_request(&sample_record(1)).await.unwrap();
        store.clear_all().await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_requests, 0);
        store.save_request(&sample_record(1)).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_requests, 1);
    }

    #[tokio::test]
    async fn cascade_delete_removes_orphaned_events() {
        let store = Store::open_in_memory().unwrap();
        let record = sample_record(1);
        store.save_request(&record).await.unwrap();
        store
            .save_sse_events(&[SseEventRecord {
                id: Uuid::new_v4(),
                request_id: record.id,
                event_index: 0,
                event_type: "message".to_string(),
                data: "x".to_string(),
                timestamp: Utc::now(),
            }])
            .await
            .unwrap();
        store.clear_all().await.unwrap();
        let events = store.get_sse_events(record.id).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn stats_aggregation_matches_scenario_f() {
        let store = Store::open_in_memory().unwrap();
        let mut r1 = sample_record(1);
        r1.is_streaming = true;
        let mut r2 = sample_record(2);
        r2.host = "api.openai.com".to_string();
        r2.agent_type = "codex".to_string();
        let r3 = sample_record(3);
        for r in [&r1, &r2, &r3] {
            store.save_request(r).await.unwrap();
        }
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.unique_hosts, 2);
        assert_eq!(stats.unique_agents, 2);
        assert_eq!(stats.streaming_count, 1);
    }
}
