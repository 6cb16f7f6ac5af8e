//! The handle-based contract the [`Database`](super::Database) wrapper
//! forwards to. An engine owns the real sessions; callers only ever see the
//! opaque [`ConnectionId`] it hands back from [`Engine::open`].

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use super::error::EngineError;
use super::value::Value;

/// Opaque identifier for one open session inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Statements that move a database to `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeStep {
    pub version: u32,
    pub statements: Vec<String>,
}

impl UpgradeStep {
    pub fn new<I, S>(version: u32, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version,
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }
}

/// Everything an engine needs to open (and, when writable, migrate) a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub path: PathBuf,
    /// Target schema version. Steps above the stored version and at most this
    /// one are applied in ascending order.
    pub version: u32,
    pub read_only: bool,
    pub upgrades: Vec<UpgradeStep>,
}

impl OpenOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            version: 0,
            read_only: false,
            upgrades: Vec::new(),
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Register an upgrade step and raise the target version to cover it.
    pub fn with_upgrade(mut self, step: UpgradeStep) -> Self {
        self.version = self.version.max(step.version);
        self.upgrades.push(step);
        self
    }
}

/// Result of a mutating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteResult {
    pub rows_affected: usize,
    pub last_insert_id: i64,
}

/// Columnar result of a read statement: names once, then positional rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[async_trait]
pub trait Engine: Send + Sync {
    async fn open(&self, options: OpenOptions) -> Result<ConnectionId, EngineError>;

    async fn execute(
        &self,
        id: ConnectionId,
        statement: &str,
        params: &[Value],
    ) -> Result<ExecuteResult, EngineError>;

    async fn query(
        &self,
        id: ConnectionId,
        statement: &str,
        params: &[Value],
    ) -> Result<QueryResult, EngineError>;

    async fn begin_transaction(&self, id: ConnectionId) -> Result<(), EngineError>;

    async fn commit_transaction(&self, id: ConnectionId) -> Result<(), EngineError>;

    async fn rollback_transaction(&self, id: ConnectionId) -> Result<(), EngineError>;

    async fn close(&self, id: ConnectionId) -> Result<(), EngineError>;
}
