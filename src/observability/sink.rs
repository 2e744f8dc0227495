//! Trace sink：EventTracer 事件的消费者
//!
//! - [`LogSink`]：实时，把事件桥接到 `tracing` 进程日志
//! - [`CollectingSink`]：把事件留在内存里，供测试与报告检查
//! - [`SqliteTraceSink`]：批量（非实时），持久化每条 END 记录

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::{params, Connection};

use crate::core::AgentError;
use crate::observability::record::{LogEvent, LogEventType, LogRecord};

/// 事件消费者；`is_realtime` 为 false 的 sink 只收到 END 事件
pub trait TraceSink: Send + Sync {
    fn handle(&self, event: &LogEvent);

    fn is_realtime(&self) -> bool;
}

/// 把 Trace 事件写入 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn handle(&self, event: &LogEvent) {
        let record = &event.record;
        let kind = record.kind.as_str();
        match event.event_type {
            LogEventType::Begin => {
                tracing::debug!(kind, name = %record.name, uid = %record.uid, "scope begin");
            }
            LogEventType::Update => {
                tracing::debug!(kind, name = %record.name, uid = %record.uid, "scope update");
            }
            LogEventType::End => match record.duration_fields() {
                Some(fields) => {
                    let duration_ms = record
                        .duration()
                        .map(|d| d.num_milliseconds())
                        .unwrap_or_default();
                    if fields.feedback.is_empty() {
                        tracing::info!(kind, name = %record.name, duration_ms, "scope end");
                    } else {
                        tracing::warn!(
                            kind,
                            name = %record.name,
                            duration_ms,
                            feedback = %fields.feedback,
                            "scope end"
                        );
                    }
                }
                None => {
                    tracing::info!(
                        kind,
                        name = %record.name,
                        context = record.context().unwrap_or_default(),
                        "event"
                    );
                }
            },
        }
    }

    fn is_realtime(&self) -> bool {
        true
    }
}

/// 内存收集
#[derive(Debug)]
pub struct CollectingSink {
    realtime: bool,
    events: Mutex<Vec<LogEvent>>,
}

impl CollectingSink {
    pub fn new(realtime: bool) -> Self {
        Self {
            realtime,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 全部 END 事件里的记录，按到达顺序
    pub fn ended_records(&self) -> Vec<LogRecord> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == LogEventType::End)
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl TraceSink for CollectingSink {
    fn handle(&self, event: &LogEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }

    fn is_realtime(&self) -> bool {
        self.realtime
    }
}

const TRACE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS trace_records (
    uid        TEXT PRIMARY KEY,
    kind       TEXT NOT NULL,
    name       TEXT NOT NULL,
    parent     TEXT,
    timestamp  TEXT NOT NULL,
    payload    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trace_parent ON trace_records(parent);
";

/// 持久化 END 记录的批量 sink
pub struct SqliteTraceSink {
    conn: Mutex<Connection>,
}

impl SqliteTraceSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let conn = crate::memory::store::open_connection(path.as_ref())?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, AgentError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch(TRACE_SCHEMA_SQL)
            .map_err(|e| AgentError::Persistence(format!("trace schema init failed: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogRecord) -> Result<(), AgentError> {
        let payload = serde_json::to_string(record)?;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT OR REPLACE INTO trace_records (uid, kind, name, parent, timestamp, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.uid.to_string(),
                record.kind.as_str(),
                record.name,
                record.parent.map(|p| p.to_string()),
                record.timestamp.to_rfc3339(),
                payload,
            ],
        )?;
        Ok(())
    }

    /// 读回全部记录（按时间戳）
    pub fn records(&self) -> Result<Vec<LogRecord>, AgentError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt =
            conn.prepare_cached("SELECT payload FROM trace_records ORDER BY timestamp, rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for payload in rows {
            out.push(serde_json::from_str(&payload?)?);
        }
        Ok(out)
    }
}

impl TraceSink for SqliteTraceSink {
    fn handle(&self, event: &LogEvent) {
        if event.event_type != LogEventType::End {
            return;
        }
        if let Err(e) = self.insert(&event.record) {
            tracing::warn!(error = %e, uid = %event.record.uid, "failed to persist trace record");
        }
    }

    fn is_realtime(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::observability::record::{Metadata, ScopeKind};
    use crate::observability::EventTracer;

    #[test]
    fn test_sqlite_sink_persists_end_records() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(SqliteTraceSink::open(dir.path().join("trace.db")).unwrap());
        let tracer = Arc::new(EventTracer::new());
        tracer.register_sink(sink.clone());

        let job = tracer.begin_scope(ScopeKind::Trace, "job", &[], Metadata::new());
        tracer.event("replan", "command level");
        tracer.end_scope(Some(job));

        let records = sink.records().unwrap();
        assert_eq!(records.len(), 2);
        let job_rec = records.iter().find(|r| r.uid == job).unwrap();
        assert!(job_rec.end_time().is_some());
        assert_eq!(job_rec.children.len(), 1);
    }

    #[test]
    fn test_collecting_sink_clear() {
        let sink = CollectingSink::new(true);
        sink.handle(&LogEvent::end(LogRecord::instant("e", ""), None, None));
        assert_eq!(sink.ended_records().len(), 1);
        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_log_sink_is_realtime() {
        assert!(LogSink.is_realtime());
        LogSink.handle(&LogEvent::end(LogRecord::instant("e", "ctx"), None, None));
    }
}
