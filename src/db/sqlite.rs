use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tokio::task;
use tracing::{debug, info, warn};

use super::engine::{ConnectionId, Engine, ExecuteResult, OpenOptions, QueryResult, UpgradeStep};
use super::error::EngineError;
use super::value::Value;

type SharedConnection = Arc<Mutex<Connection>>;

/// [`Engine`] backed by `rusqlite`. Each open session lives in a table keyed
/// by [`ConnectionId`]; every call runs on tokio's blocking pool so the async
/// caller never stalls on disk I/O.
#[derive(Default)]
pub struct SqliteEngine {
    connections: Mutex<HashMap<ConnectionId, SharedConnection>>,
    next_id: AtomicU64,
}

impl SqliteEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently held open.
    pub fn open_connections(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<ConnectionId, SharedConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn connection(&self, id: ConnectionId) -> Result<SharedConnection, EngineError> {
        self.table()
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownConnection(id))
    }

    /// Run `func` against the connection behind `id` on the blocking pool.
    async fn with_connection<F, R>(&self, id: ConnectionId, func: F) -> Result<R, EngineError>
    where
        F: FnOnce(&mut Connection) -> Result<R, EngineError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.connection(id)?;
        task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            func(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    async fn open(&self, options: OpenOptions) -> Result<ConnectionId, EngineError> {
        let conn = task::spawn_blocking(move || open_connection(&options)).await??;
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.table().insert(id, Arc::new(Mutex::new(conn)));
        debug!(connection = %id, "sqlite connection registered");
        Ok(id)
    }

    async fn execute(
        &self,
        id: ConnectionId,
        statement: &str,
        params: &[Value],
    ) -> Result<ExecuteResult, EngineError> {
        let statement = statement.to_owned();
        let params = params.to_vec();
        self.with_connection(id, move |conn| {
            let rows_affected = conn.execute(&statement, params_from_iter(params.iter()))?;
            Ok(ExecuteResult {
                rows_affected,
                last_insert_id: conn.last_insert_rowid(),
            })
        })
        .await
    }

    async fn query(
        &self,
        id: ConnectionId,
        statement: &str,
        params: &[Value],
    ) -> Result<QueryResult, EngineError> {
        let statement = statement.to_owned();
        let params = params.to_vec();
        self.with_connection(id, move |conn| {
            let mut stmt = conn.prepare(&statement)?;
            let columns: Vec<String> = stmt
                .column_names()
                .iter()
                .map(ToString::to_string)
                .collect();
            let width = columns.len();

            let mut rows = Vec::new();
            let mut cursor = stmt.query(params_from_iter(params.iter()))?;
            while let Some(row) = cursor.next()? {
                let mut values = Vec::with_capacity(width);
                for idx in 0..width {
                    values.push(Value::from(row.get::<_, SqlValue>(idx)?));
                }
                rows.push(values);
            }

            Ok(QueryResult { columns, rows })
        })
        .await
    }

    async fn begin_transaction(&self, id: ConnectionId) -> Result<(), EngineError> {
        self.with_connection(id, |conn| Ok(conn.execute_batch("BEGIN")?))
            .await
    }

    async fn commit_transaction(&self, id: ConnectionId) -> Result<(), EngineError> {
        self.with_connection(id, |conn| Ok(conn.execute_batch("COMMIT")?))
            .await
    }

    async fn rollback_transaction(&self, id: ConnectionId) -> Result<(), EngineError> {
        self.with_connection(id, |conn| Ok(conn.execute_batch("ROLLBACK")?))
            .await
    }

    async fn close(&self, id: ConnectionId) -> Result<(), EngineError> {
        let conn = self
            .table()
            .remove(&id)
            .ok_or(EngineError::UnknownConnection(id))?;

        // A statement still running elsewhere keeps its clone alive; the
        // connection then closes when that clone drops.
        match Arc::try_unwrap(conn) {
            Ok(mutex) => {
                let conn = mutex.into_inner().unwrap_or_else(PoisonError::into_inner);
                task::spawn_blocking(move || conn.close().map_err(|(_, err)| err)).await??;
            }
            Err(_) => warn!(connection = %id, "connection still in use, deferring close"),
        }

        debug!(connection = %id, "sqlite connection closed");
        Ok(())
    }
}

/// Open the file described by `options` and bring its schema up to date.
fn open_connection(options: &OpenOptions) -> Result<Connection, EngineError> {
    if options.read_only {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&options.path, flags)?;
        let stored = user_version(&conn)?;
        if stored < options.version {
            warn!(
                path = %options.path.display(),
                stored,
                target = options.version,
                "read-only database is behind the target schema version"
            );
        }
        return Ok(conn);
    }

    ensure_parent_dir(&options.path)?;
    let mut conn = Connection::open(&options.path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    apply_upgrades(&mut conn, options.version, &options.upgrades)?;
    Ok(conn)
}

fn ensure_parent_dir(path: &Path) -> Result<(), EngineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn user_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Apply every step above the stored `user_version` up to `target`, one
/// transaction per step.
fn apply_upgrades(
    conn: &mut Connection,
    target: u32,
    upgrades: &[UpgradeStep],
) -> Result<(), EngineError> {
    let stored = user_version(conn)?;
    if stored >= target {
        return Ok(());
    }

    let mut pending: Vec<&UpgradeStep> = upgrades
        .iter()
        .filter(|step| step.version > stored && step.version <= target)
        .collect();
    pending.sort_by_key(|step| step.version);

    for step in pending {
        let tx = conn.transaction()?;
        for statement in &step.statements {
            tx.execute_batch(statement)?;
        }
        tx.execute_batch(&format!("PRAGMA user_version = {}", step.version))?;
        tx.commit()?;
        info!(version = step.version, "applied schema upgrade");
    }

    Ok(())
}
