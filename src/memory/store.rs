//! 执行记录的持久化
//!
//! ExecutionMemory 只依赖 [`ExecutionStore`]：按铸造出的 id 创建 / 读取 / 更新。
//! [`SqliteExecutionStore`] 是默认实现：jobs / tasks / commands 三张表，外键串起父子关系，
//! 复杂字段整体存成 JSON。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::core::AgentError;
use crate::memory::records::{Command, CommandId, Job, JobId, Task, TaskId};

/// ExecutionMemory 的写穿目标
pub trait ExecutionStore: Send + Sync {
    /// 插入或更新 Job
    fn save_job(&self, job: &Job) -> Result<(), AgentError>;
    /// 插入或更新 Task（Job 必须已存在）
    fn save_task(&self, task: &Task) -> Result<(), AgentError>;
    /// 插入或更新 Command（Task 必须已存在）
    fn save_command(&self, command: &Command) -> Result<(), AgentError>;

    fn load_job(&self, id: JobId) -> Result<Option<Job>, AgentError>;
    fn load_task(&self, id: TaskId) -> Result<Option<Task>, AgentError>;
    fn load_command(&self, id: CommandId) -> Result<Option<Command>, AgentError>;

    /// 某个 Job 下的全部 Task（按 id 升序）
    fn tasks_for_job(&self, job: JobId) -> Result<Vec<Task>, AgentError>;
    /// 某个 Task 下的全部 Command（按 id 升序）
    fn commands_for_task(&self, task: TaskId) -> Result<Vec<Command>, AgentError>;
}

pub(crate) const EXECUTION_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id              INTEGER PRIMARY KEY,
    description     TEXT NOT NULL,
    additional_info TEXT,
    status          TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id              INTEGER PRIMARY KEY,
    job_id          INTEGER NOT NULL REFERENCES jobs(id),
    sequence_number INTEGER NOT NULL,
    status          TEXT NOT NULL,
    payload         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_job ON tasks(job_id);

CREATE TABLE IF NOT EXISTS commands (
    id              INTEGER PRIMARY KEY,
    task_id         INTEGER NOT NULL REFERENCES tasks(id),
    sequence_number INTEGER NOT NULL,
    status          TEXT NOT NULL,
    payload         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_commands_task ON commands(task_id);
";

/// 打开连接并开启外键约束
pub(crate) fn open_connection(path: &Path) -> Result<Connection, AgentError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::Persistence(format!("create {}: {}", parent.display(), e)))?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(conn)
}

/// SQLite 实现
pub struct SqliteExecutionStore {
    conn: Mutex<Connection>,
}

impl SqliteExecutionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let conn = open_connection(path)?;
        let store = Self::with_connection(conn)?;
        tracing::info!(path = %path.display(), "execution store opened");
        Ok(store)
    }

    /// 内存数据库（测试与一次性运行）
    pub fn in_memory() -> Result<Self, AgentError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch(EXECUTION_SCHEMA_SQL)
            .map_err(|e| AgentError::Persistence(format!("schema init failed: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AgentError> {
        self.conn
            .lock()
            .map_err(|_| AgentError::Persistence("execution store lock poisoned".to_string()))
    }

    fn load_payloads<T: serde::de::DeserializeOwned>(
        &self,
        sql: &str,
        parent: u64,
    ) -> Result<Vec<T>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![parent as i64], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for payload in rows {
            out.push(serde_json::from_str(&payload?)?);
        }
        Ok(out)
    }
}

impl ExecutionStore for SqliteExecutionStore {
    fn save_job(&self, job: &Job) -> Result<(), AgentError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO jobs (id, description, additional_info, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status",
            params![
                job.id.0 as i64,
                job.description,
                job.additional_info,
                job.status.as_str(),
                job.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn save_task(&self, task: &Task) -> Result<(), AgentError> {
        let payload = serde_json::to_string(task)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (id, job_id, sequence_number, status, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, payload = excluded.payload",
            params![
                task.id.0 as i64,
                task.job_id.0 as i64,
                task.sequence_number,
                task.status().as_str(),
                payload,
            ],
        )?;
        Ok(())
    }

    fn save_command(&self, command: &Command) -> Result<(), AgentError> {
        let payload = serde_json::to_string(command)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO commands (id, task_id, sequence_number, status, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, payload = excluded.payload",
            params![
                command.id.0 as i64,
                command.task_id.0 as i64,
                command.sequence_number,
                command.status().as_str(),
                payload,
            ],
        )?;
        Ok(())
    }

    fn load_job(&self, id: JobId) -> Result<Option<Job>, AgentError> {
        let conn = self.lock()?;
        let row = conn
            .prepare_cached(
                "SELECT description, additional_info, status, created_at FROM jobs WHERE id = ?1",
            )?
            .query_row(params![id.0 as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()?;

        let Some((description, additional_info, status, created_at)) = row else {
            return Ok(None);
        };
        let status = serde_json::from_value(serde_json::Value::String(status))?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| AgentError::Persistence(format!("bad created_at for job {id}: {e}")))?
            .with_timezone(&chrono::Utc);
        Ok(Some(Job {
            id,
            description,
            additional_info,
            status,
            created_at,
        }))
    }

    fn load_task(&self, id: TaskId) -> Result<Option<Task>, AgentError> {
        let conn = self.lock()?;
        let payload = conn
            .prepare_cached("SELECT payload FROM tasks WHERE id = ?1")?
            .query_row(params![id.0 as i64], |row| row.get::<_, String>(0))
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(AgentError::from))
            .transpose()
    }

    fn load_command(&self, id: CommandId) -> Result<Option<Command>, AgentError> {
        let conn = self.lock()?;
        let payload = conn
            .prepare_cached("SELECT payload FROM commands WHERE id = ?1")?
            .query_row(params![id.0 as i64], |row| row.get::<_, String>(0))
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(AgentError::from))
            .transpose()
    }

    fn tasks_for_job(&self, job: JobId) -> Result<Vec<Task>, AgentError> {
        self.load_payloads("SELECT payload FROM tasks WHERE job_id = ?1 ORDER BY id", job.0)
    }

    fn commands_for_task(&self, task: TaskId) -> Result<Vec<Command>, AgentError> {
        self.load_payloads(
            "SELECT payload FROM commands WHERE task_id = ?1 ORDER BY id",
            task.0,
        )
    }
}
