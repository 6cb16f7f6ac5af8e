//! Session object presenting one always-available logical connection on top
//! of an engine that needs an explicit open.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use super::engine::{ConnectionId, Engine, ExecuteResult, OpenOptions, QueryResult};
use super::error::{DbError, EngineError, TxAction};
use super::mapper::map_results;
use super::value::Value;

/// An open attempt every concurrent caller can await.
type PendingOpen = Shared<BoxFuture<'static, Result<ConnectionId, Arc<EngineError>>>>;

#[derive(Default)]
struct SessionState {
    connection: Option<ConnectionId>,
    opening: Option<PendingOpen>,
    /// Bumped by every close; a waiter only caches a handle opened in the
    /// generation it joined.
    generation: u64,
}

/// Lazily opened database session.
///
/// The first operation opens the file (running schema upgrades); later ones
/// reuse the cached [`ConnectionId`]. After [`close`](Self::close) the next
/// operation opens again from scratch.
pub struct Database {
    engine: Arc<dyn Engine>,
    options: OpenOptions,
    state: Mutex<SessionState>,
}

impl Database {
    pub fn new(engine: Arc<dyn Engine>, options: OpenOptions) -> Self {
        Self {
            engine,
            options,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Whether a connection handle is currently cached.
    pub fn is_open(&self) -> bool {
        self.lock_state().connection.is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_open(&self) -> PendingOpen {
        let engine = Arc::clone(&self.engine);
        let options = self.options.clone();
        async move {
            debug!(path = %options.path.display(), "opening database");
            engine.open(options).await.map_err(Arc::new)
        }
        .boxed()
        .shared()
    }

    /// Open the database unless it is already open. Concurrent callers share
    /// a single in-flight attempt; a failed attempt is forgotten so the next
    /// call retries. A handle closed while this caller was still waiting is
    /// never cached; the caller opens again instead.
    pub async fn initialize(&self) -> Result<(), DbError> {
        loop {
            let (pending, generation) = {
                let mut state = self.lock_state();
                if state.connection.is_some() {
                    return Ok(());
                }
                let generation = state.generation;
                let pending = state
                    .opening
                    .get_or_insert_with(|| self.start_open())
                    .clone();
                (pending, generation)
            };

            let outcome = pending.clone().await;

            let mut state = self.lock_state();
            if state
                .opening
                .as_ref()
                .is_some_and(|current| current.ptr_eq(&pending))
            {
                state.opening = None;
            }

            match outcome {
                Ok(id) if state.generation != generation => {
                    debug!(connection = %id, "handle was closed before this caller resumed");
                    continue;
                }
                Ok(id) => {
                    if state.connection.is_none() {
                        info!(
                            connection = %id,
                            path = %self.options.path.display(),
                            "database opened"
                        );
                    }
                    state.connection.get_or_insert(id);
                    return Ok(());
                }
                Err(source) => {
                    return Err(DbError::Open {
                        path: self.options.path.clone(),
                        source,
                    })
                }
            }
        }
    }

    /// The cached handle, opening the database first when needed.
    pub async fn connection_id(&self) -> Result<ConnectionId, DbError> {
        let cached = self.lock_state().connection;
        if let Some(id) = cached {
            return Ok(id);
        }
        self.initialize().await?;
        self.lock_state().connection.ok_or(DbError::NotInitialized)
    }

    /// Forward a mutating statement.
    pub async fn execute(
        &self,
        statement: &str,
        params: &[Value],
    ) -> Result<ExecuteResult, DbError> {
        let id = self.connection_id().await?;
        Ok(self.engine.execute(id, statement, params).await?)
    }

    /// Forward a read statement and return its columnar result.
    pub async fn query(
        &self,
        statement: &str,
        params: &[Value],
    ) -> Result<QueryResult, DbError> {
        let id = self.connection_id().await?;
        Ok(self.engine.query(id, statement, params).await?)
    }

    /// [`query`](Self::query), then decode every row into `T`.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        statement: &str,
        params: &[Value],
    ) -> Result<Vec<T>, DbError> {
        let result = self.query(statement, params).await?;
        map_results(&result)
    }

    /// Run `callback` inside a transaction.
    ///
    /// Commits when the callback succeeds. When the callback or the commit
    /// fails the transaction is rolled back and that failure is returned.
    /// Transactions do not nest: calling this from inside `callback` fails at
    /// `BEGIN`.
    pub async fn run_in_transaction<'a, F, T, E>(&'a self, callback: F) -> Result<T, E>
    where
        F: FnOnce(&'a Database) -> BoxFuture<'a, Result<T, E>>,
        E: From<DbError>,
    {
        let id = self.connection_id().await?;
        self.engine
            .begin_transaction(id)
            .await
            .map_err(|source| DbError::Transaction {
                action: TxAction::Begin,
                source,
            })?;

        match callback(self).await {
            Ok(value) => match self.engine.commit_transaction(id).await {
                Ok(()) => Ok(value),
                Err(source) => {
                    self.rollback(id).await;
                    Err(DbError::Transaction {
                        action: TxAction::Commit,
                        source,
                    }
                    .into())
                }
            },
            Err(err) => {
                self.rollback(id).await;
                Err(err)
            }
        }
    }

    /// Roll back after a failure. The caller reports the original failure, so
    /// a rollback error is only logged.
    async fn rollback(&self, id: ConnectionId) {
        if let Err(err) = self.engine.rollback_transaction(id).await {
            error!(connection = %id, error = %err, "rollback failed");
        }
    }

    /// Close the connection if one is open. The next operation reopens it.
    ///
    /// The cached handle is dropped even when the engine reports a close
    /// failure; that failure is still returned.
    pub async fn close(&self) -> Result<(), DbError> {
        let cached = self.lock_state().connection;
        let Some(id) = cached else {
            return Ok(());
        };

        let closed = self.engine.close(id).await;

        {
            let mut state = self.lock_state();
            if state.connection == Some(id) {
                state.connection = None;
            }
            state.opening = None;
            state.generation = state.generation.wrapping_add(1);
        }

        match closed {
            Ok(()) => {
                debug!(connection = %id, "database closed");
                Ok(())
            }
            Err(err) => {
                error!(connection = %id, error = %err, "close failed; handle discarded");
                Err(err.into())
            }
        }
    }
}
