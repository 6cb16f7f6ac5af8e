use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use super::engine::ConnectionId;

/// Failures reported by an [`Engine`](super::Engine) implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("no open connection with id {0}")]
    UnknownConnection(ConnectionId),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("database worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// The SQLite result code behind this failure, when there is one.
    pub fn sqlite_error_code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            EngineError::Sqlite(err) => err.sqlite_error_code(),
            _ => None,
        }
    }
}

/// Which half of a transaction the engine refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAction {
    Begin,
    Commit,
}

impl fmt::Display for TxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxAction::Begin => f.write_str("begin"),
            TxAction::Commit => f.write_str("commit"),
        }
    }
}

/// Errors surfaced by [`Database`](super::Database).
#[derive(Debug, Error)]
pub enum DbError {
    #[error("failed to open database at {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: Arc<EngineError>,
    },

    #[error("database not initialized")]
    NotInitialized,

    #[error(transparent)]
    Statement(#[from] EngineError),

    #[error("failed to {action} transaction")]
    Transaction {
        action: TxAction,
        #[source]
        source: EngineError,
    },

    #[error("failed to decode row: {0}")]
    Decode(#[from] serde_json::Error),
}

impl DbError {
    /// The SQLite result code behind this failure, when there is one.
    pub fn sqlite_error_code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            DbError::Open { source, .. } => source.sqlite_error_code(),
            DbError::Statement(source) | DbError::Transaction { source, .. } => {
                source.sqlite_error_code()
            }
            DbError::NotInitialized | DbError::Decode(_) => None,
        }
    }
}
