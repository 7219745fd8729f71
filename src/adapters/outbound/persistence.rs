//! SQLite-backed run store.
//!
//! Each record is kept as a JSON payload next to the columns used for lookups and
//! ordering. All SQLite work runs on the blocking pool.

use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    core::{
        domain::{Conversation, Run, RunResult},
        error::Error as CoreError,
        ports::RunRepository,
    },
    paths::data_dir,
};

pub const DATABASE_FILE: &str = "runs.sqlite3";

#[derive(Clone)]
pub struct SqliteRunStore {
    db_path: PathBuf,
}

impl SqliteRunStore {
    /// Opens (and creates if needed) the database under `custom_root` or the data dir.
    pub fn open(custom_root: Option<PathBuf>) -> Result<Self> {
        let base = custom_root.unwrap_or_else(data_dir);
        if !base.exists() {
            fs::create_dir_all(&base)
                .with_context(|| format!("Failed to create data directory {}", base.display()))?;
        }
        let store = Self {
            db_path: base.join(DATABASE_FILE),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).with_context(|| {
            format!("Failed to open run database {}", self.db_path.display())
        })?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                test_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                payload_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS run_results (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                payload_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_run_results_run ON run_results (run_id, position);
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                order_index INTEGER NOT NULL,
                status TEXT NOT NULL,
                payload_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_run ON conversations (run_id, order_index);
            "#,
        )?;
        Ok(())
    }

    /// Runs `op` against a fresh connection on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> crate::core::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> crate::core::Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = store
                .connect()
                .map_err(|e| CoreError::Persistence(e.to_string()))?;
            op(&conn)
        })
        .await
        .map_err(|e| CoreError::System(format!("Join error: {e}")))?
    }
}

fn db_err(err: rusqlite::Error) -> CoreError {
    CoreError::Persistence(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> crate::core::Result<String> {
    serde_json::to_string(value).map_err(|e| CoreError::Persistence(e.to_string()))
}

fn decode<T: DeserializeOwned>(json: &str) -> crate::core::Result<T> {
    serde_json::from_str(json).map_err(|e| CoreError::Persistence(format!("corrupt row: {e}")))
}

fn decode_rows<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    run_id: &str,
) -> crate::core::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params![run_id], |row| row.get::<_, String>(0))
        .map_err(db_err)?;
    let mut decoded = Vec::new();
    for row in rows {
        decoded.push(decode(&row.map_err(db_err)?)?);
    }
    Ok(decoded)
}

#[async_trait]
impl RunRepository for SqliteRunStore {
    async fn save_run(&self, run: &Run) -> crate::core::Result<()> {
        let payload = encode(run)?;
        let (id, test_id, status, created_at) = (
            run.id.clone(),
            run.test_id.clone(),
            run.status.as_str(),
            run.created_at,
        );
        self.blocking(move |conn| {
            conn.execute(
                r#"
                INSERT INTO runs (id, test_id, status, created_at, payload_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id)
                DO UPDATE SET
                    status=excluded.status,
                    payload_json=excluded.payload_json
                "#,
                params![id, test_id, status, created_at, payload],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn load_run(&self, run_id: &str) -> crate::core::Result<Option<Run>> {
        let run_id = run_id.to_string();
        self.blocking(move |conn| {
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload_json FROM runs WHERE id = ?1",
                    params![run_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            payload.as_deref().map(decode).transpose()
        })
        .await
    }

    async fn list_runs(&self, limit: usize) -> crate::core::Result<Vec<Run>> {
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare("SELECT payload_json FROM runs ORDER BY created_at DESC, rowid DESC LIMIT ?1")
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![limit as i64], |row| row.get::<_, String>(0))
                .map_err(db_err)?;
            let mut runs = Vec::new();
            for row in rows {
                runs.push(decode(&row.map_err(db_err)?)?);
            }
            Ok(runs)
        })
        .await
    }

    async fn append_result(&self, result: &RunResult) -> crate::core::Result<()> {
        let payload = encode(result)?;
        let (id, run_id, position) = (result.id.clone(), result.run_id.clone(), result.position);
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO run_results (id, run_id, position, payload_json) VALUES (?1, ?2, ?3, ?4)",
                params![id, run_id, position as i64, payload],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn update_result(&self, result: &RunResult) -> crate::core::Result<()> {
        let payload = encode(result)?;
        let id = result.id.clone();
        self.blocking(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE run_results SET payload_json = ?2 WHERE id = ?1",
                    params![id, payload],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return Err(CoreError::NotFound(format!("result {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn load_results(&self, run_id: &str) -> crate::core::Result<Vec<RunResult>> {
        let run_id = run_id.to_string();
        self.blocking(move |conn| {
            decode_rows(
                conn,
                "SELECT payload_json FROM run_results WHERE run_id = ?1 ORDER BY position",
                &run_id,
            )
        })
        .await
    }

    async fn save_conversation(&self, conversation: &Conversation) -> crate::core::Result<()> {
        let payload = encode(conversation)?;
        let (id, run_id, order_index, status) = (
            conversation.id.clone(),
            conversation.run_id.clone(),
            conversation.order_index,
            conversation.status.as_str(),
        );
        self.blocking(move |conn| {
            conn.execute(
                r#"
                INSERT INTO conversations (id, run_id, order_index, status, payload_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id)
                DO UPDATE SET
                    status=excluded.status,
                    payload_json=excluded.payload_json
                "#,
                params![id, run_id, order_index as i64, status, payload],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn load_conversations(&self, run_id: &str) -> crate::core::Result<Vec<Conversation>> {
        let run_id = run_id.to_string();
        self.blocking(move |conn| {
            decode_rows(
                conn,
                "SELECT payload_json FROM conversations WHERE run_id = ?1 ORDER BY order_index, rowid",
                &run_id,
            )
        })
        .await
    }
}
