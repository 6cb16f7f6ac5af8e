use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use tempfile::TempDir;
use user_roster::db::{
    create_user, delete_user, fetch_users, map_rows, schema, update_user_name, ConnectionId,
    Database, DbError, Engine, EngineError, ExecuteResult, OpenOptions, QueryResult,
    SqliteEngine, TxAction, Value,
};
use user_roster::values;

/// Wraps the real engine, counting opens and optionally failing the first few.
/// The `fail_*` switches make the matching call report an error.
struct CountingEngine {
    inner: SqliteEngine,
    opens: AtomicUsize,
    failures_left: AtomicUsize,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    fail_close: AtomicBool,
}

impl CountingEngine {
    fn new() -> Arc<Self> {
        Self::failing(0)
    }

    fn failing(times: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteEngine::new(),
            opens: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(times),
            fail_commit: AtomicBool::new(false),
            fail_rollback: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        })
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

fn refused(what: &str) -> EngineError {
    EngineError::Io(std::io::Error::other(format!("{what} refused")))
}

#[async_trait]
impl Engine for CountingEngine {
    async fn open(&self, options: OpenOptions) -> Result<ConnectionId, EngineError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(EngineError::Io(std::io::Error::other("disk unavailable")));
        }
        self.inner.open(options).await
    }

    async fn execute(
        &self,
        id: ConnectionId,
        statement: &str,
        params: &[Value],
    ) -> Result<ExecuteResult, EngineError> {
        self.inner.execute(id, statement, params).await
    }

    async fn query(
        &self,
        id: ConnectionId,
        statement: &str,
        params: &[Value],
    ) -> Result<QueryResult, EngineError> {
        self.inner.query(id, statement, params).await
    }

    async fn begin_transaction(&self, id: ConnectionId) -> Result<(), EngineError> {
        self.inner.begin_transaction(id).await
    }

    async fn commit_transaction(&self, id: ConnectionId) -> Result<(), EngineError> {
        // Leaves the transaction open, as a failed COMMIT would.
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(refused("commit"));
        }
        self.inner.commit_transaction(id).await
    }

    async fn rollback_transaction(&self, id: ConnectionId) -> Result<(), EngineError> {
        self.inner.rollback_transaction(id).await?;
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(refused("rollback"));
        }
        Ok(())
    }

    async fn close(&self, id: ConnectionId) -> Result<(), EngineError> {
        self.inner.close(id).await?;
        if self.fail_close.swap(false, Ordering::SeqCst) {
            return Err(refused("close"));
        }
        Ok(())
    }
}

fn roster(engine: Arc<CountingEngine>) -> (Database, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(engine, schema::open_options(dir.path().join("roster.sqlite3")));
    (db, dir)
}

async fn user_count(db: &Database) -> i64 {
    let result = db.query("SELECT COUNT(*) FROM users", &[]).await.unwrap();
    result.rows[0][0].as_i64().unwrap()
}

#[tokio::test]
async fn concurrent_initialize_opens_once() {
    let engine = CountingEngine::new();
    let (db, _dir) = roster(engine.clone());

    let results = join_all((0..8).map(|_| db.initialize())).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(engine.opens(), 1);
    assert!(db.is_open());

    db.initialize().await.unwrap();
    assert_eq!(engine.opens(), 1);
}

#[tokio::test]
async fn concurrent_queries_share_one_open() {
    let engine = CountingEngine::new();
    let (db, _dir) = roster(engine.clone());

    let results = join_all((0..4).map(|_| db.query("SELECT id FROM users", &[]))).await;

    for result in results {
        assert_eq!(result.unwrap().rows.len(), 10);
    }
    assert_eq!(engine.opens(), 1);
}

#[tokio::test]
async fn seeded_rows_map_in_insertion_order() {
    let (db, _dir) = roster(CountingEngine::new());

    let result = db.query("SELECT * FROM users", &[]).await.unwrap();
    assert_eq!(
        result.columns,
        ["id", "email", "name", "dateCreated", "dateModified"]
    );

    let records = map_rows(&result.columns, &result.rows);
    assert_eq!(records.len(), schema::SEED_USERS.len());
    for (record, (email, name)) in records.iter().zip(schema::SEED_USERS) {
        assert_eq!(record["email"].as_str(), Some(email));
        assert_eq!(record["name"].as_str(), Some(name));
    }
}

#[tokio::test]
async fn failed_callback_rolls_back() {
    let (db, _dir) = roster(CountingEngine::new());

    let outcome: Result<(), DbError> = db
        .run_in_transaction(|db| {
            async move {
                db.execute(
                    "INSERT INTO users (email, name) VALUES (?1, ?2)",
                    &values!["temp@email.com", "Temp"],
                )
                .await?;
                db.execute("INSERT INTO missing_table VALUES (1)", &[]).await?;
                Ok::<_, DbError>(())
            }
            .boxed()
        })
        .await;

    assert!(matches!(outcome, Err(DbError::Statement(_))));
    assert_eq!(user_count(&db).await, 10);
}

#[tokio::test]
async fn callback_error_is_returned_unchanged() {
    #[derive(Debug, PartialEq)]
    enum AppError {
        Db(String),
        Rejected,
    }

    impl From<DbError> for AppError {
        fn from(err: DbError) -> Self {
            AppError::Db(err.to_string())
        }
    }

    let (db, _dir) = roster(CountingEngine::new());

    let outcome: Result<(), AppError> = db
        .run_in_transaction(|db| {
            async move {
                db.execute("DELETE FROM users", &[]).await?;
                Err::<(), _>(AppError::Rejected)
            }
            .boxed()
        })
        .await;

    assert_eq!(outcome, Err(AppError::Rejected));
    assert_eq!(user_count(&db).await, 10);
}

#[tokio::test]
async fn successful_callback_commits() {
    let (db, _dir) = roster(CountingEngine::new());

    let id = db
        .run_in_transaction(|db| {
            async move {
                let inserted = db
                    .execute(
                        "INSERT INTO users (email, name) VALUES (?1, ?2)",
                        &values!["kept@email.com", "Kept"],
                    )
                    .await?;
                Ok::<_, DbError>(inserted.last_insert_id)
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(id, 11);
    assert_eq!(user_count(&db).await, 11);
}

#[tokio::test]
async fn failed_commit_rolls_back_and_reports_commit() {
    let engine = CountingEngine::new();
    let (db, _dir) = roster(engine.clone());
    engine.fail_commit.store(true, Ordering::SeqCst);

    let outcome: Result<(), DbError> = db
        .run_in_transaction(|db| {
            async move {
                db.execute(
                    "INSERT INTO users (email, name) VALUES (?1, ?2)",
                    &values!["lost@email.com", "Lost"],
                )
                .await?;
                Ok::<_, DbError>(())
            }
            .boxed()
        })
        .await;

    assert!(matches!(
        outcome,
        Err(DbError::Transaction {
            action: TxAction::Commit,
            ..
        })
    ));
    assert_eq!(user_count(&db).await, 10);

    // The connection is usable for a fresh transaction afterwards.
    engine.fail_commit.store(false, Ordering::SeqCst);
    db.run_in_transaction(|_| async { Ok::<_, DbError>(()) }.boxed())
        .await
        .unwrap();
}

#[tokio::test]
async fn callback_error_survives_failed_rollback() {
    #[derive(Debug, PartialEq)]
    enum AppError {
        Db(String),
        Rejected,
    }

    impl From<DbError> for AppError {
        fn from(err: DbError) -> Self {
            AppError::Db(err.to_string())
        }
    }

    let engine = CountingEngine::new();
    let (db, _dir) = roster(engine.clone());
    engine.fail_rollback.store(true, Ordering::SeqCst);

    let outcome: Result<(), AppError> = db
        .run_in_transaction(|db| {
            async move {
                db.execute("DELETE FROM users", &[]).await?;
                Err::<(), _>(AppError::Rejected)
            }
            .boxed()
        })
        .await;

    assert_eq!(outcome, Err(AppError::Rejected));
    assert_eq!(user_count(&db).await, 10);
}

#[tokio::test]
async fn nested_transaction_fails_at_begin() {
    let (db, _dir) = roster(CountingEngine::new());

    let outcome: Result<(), DbError> = db
        .run_in_transaction(|outer| {
            async move {
                outer
                    .run_in_transaction(|_| async { Ok::<_, DbError>(()) }.boxed())
                    .await
            }
            .boxed()
        })
        .await;

    assert!(matches!(
        outcome,
        Err(DbError::Transaction {
            action: TxAction::Begin,
            ..
        })
    ));

    // The outer transaction was rolled back, so a new one can start.
    db.run_in_transaction(|_| async { Ok::<_, DbError>(()) }.boxed())
        .await
        .unwrap();
}

#[tokio::test]
async fn query_after_close_reopens() {
    let engine = CountingEngine::new();
    let (db, _dir) = roster(engine.clone());

    db.initialize().await.unwrap();
    db.close().await.unwrap();
    assert!(!db.is_open());
    assert_eq!(engine.inner.open_connections(), 0);

    assert_eq!(user_count(&db).await, 10);
    assert!(db.is_open());
    assert_eq!(engine.opens(), 2);
}

#[tokio::test]
async fn waiter_does_not_cache_a_handle_closed_while_it_slept() {
    let engine = CountingEngine::new();
    let (db, _dir) = roster(engine.clone());

    let mut late = Box::pin(db.initialize());
    assert!(futures::poll!(&mut late).is_pending());

    db.initialize().await.unwrap();
    db.close().await.unwrap();
    assert!(!db.is_open());

    late.await.unwrap();
    assert!(db.is_open());
    assert_eq!(engine.opens(), 2);
    assert_eq!(user_count(&db).await, 10);

    db.close().await.unwrap();
    assert_eq!(engine.inner.open_connections(), 0);
    assert_eq!(user_count(&db).await, 10);
}

#[tokio::test]
async fn failed_close_still_drops_the_handle() {
    let engine = CountingEngine::new();
    let (db, _dir) = roster(engine.clone());
    db.initialize().await.unwrap();

    engine.fail_close.store(true, Ordering::SeqCst);
    let err = db.close().await.unwrap_err();
    assert!(matches!(err, DbError::Statement(EngineError::Io(_))));
    assert!(!db.is_open());

    assert_eq!(user_count(&db).await, 10);
    assert_eq!(engine.opens(), 2);
    db.close().await.unwrap();
}

#[tokio::test]
async fn close_without_connection_is_noop() {
    let engine = CountingEngine::new();
    let (db, _dir) = roster(engine.clone());

    db.close().await.unwrap();
    assert_eq!(engine.opens(), 0);
}

#[tokio::test]
async fn seed_is_not_reapplied_on_reopen() {
    let engine = CountingEngine::new();
    let (db, dir) = roster(engine.clone());

    db.execute("DELETE FROM users WHERE id = 1", &[]).await.unwrap();
    db.close().await.unwrap();

    let reopened = Database::new(
        engine,
        schema::open_options(dir.path().join("roster.sqlite3")),
    );
    assert_eq!(user_count(&reopened).await, 9);
}

#[tokio::test]
async fn invalid_statement_surfaces_engine_error() {
    let (db, _dir) = roster(CountingEngine::new());

    let err = db.query("SELEC nonsense", &[]).await.unwrap_err();
    let message = err.to_string();
    match err {
        DbError::Statement(EngineError::Sqlite(inner)) => {
            assert!(message.contains("syntax error"));
            assert_eq!(message, inner.to_string());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn failed_open_can_be_retried() {
    let engine = CountingEngine::failing(1);
    let (db, _dir) = roster(engine.clone());

    let err = db.initialize().await.unwrap_err();
    assert!(matches!(err, DbError::Open { .. }));
    assert!(!db.is_open());

    db.initialize().await.unwrap();
    assert!(db.is_open());
    assert_eq!(engine.opens(), 2);
}

#[tokio::test]
async fn concurrent_callers_share_a_failed_open() {
    let engine = CountingEngine::failing(1);
    let (db, _dir) = roster(engine.clone());

    let results = join_all((0..3).map(|_| db.initialize())).await;

    assert!(results
        .iter()
        .all(|result| matches!(result, Err(DbError::Open { .. }))));
    assert_eq!(engine.opens(), 1);
}

#[tokio::test]
async fn read_only_session_rejects_writes() {
    let engine = CountingEngine::new();
    let (db, dir) = roster(engine.clone());
    db.initialize().await.unwrap();
    db.close().await.unwrap();

    let reader = Database::new(
        engine,
        schema::open_options(dir.path().join("roster.sqlite3")).read_only(true),
    );
    assert_eq!(user_count(&reader).await, 10);

    let err = reader
        .execute("DELETE FROM users", &[])
        .await
        .unwrap_err();
    assert_eq!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ReadOnly)
    );
}

#[tokio::test]
async fn user_repository_round_trip() {
    let (db, _dir) = roster(CountingEngine::new());

    let created = create_user(&db, "nina.ross@email.com", "Nina Ross")
        .await
        .unwrap();
    assert_eq!(created.id, 11);
    assert!(!created.date_created.is_empty());

    let err = create_user(&db, "nina.ross@email.com", "Nina Again")
        .await
        .unwrap_err();
    assert_eq!(
        err.root_cause().to_string(),
        "Email nina.ross@email.com is already registered."
    );

    update_user_name(&db, created.id, "Nina R.").await.unwrap();
    let users = fetch_users(&db).await.unwrap();
    assert_eq!(users.last().unwrap().name, "Nina R.");
    assert_eq!(users.len(), 11);

    delete_user(&db, created.id).await.unwrap();
    let err = delete_user(&db, created.id).await.unwrap_err();
    assert_eq!(err.to_string(), "User not found");
}
