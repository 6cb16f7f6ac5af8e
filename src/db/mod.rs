//! Persistence layer: the lazily opened session wrapper, the engine it
//! forwards to, row mapping, schema, and the user queries built on top.

mod engine;
mod error;
mod mapper;
pub mod schema;
mod service;
mod sqlite;
mod users;
mod value;

pub use engine::{ConnectionId, Engine, ExecuteResult, OpenOptions, QueryResult, UpgradeStep};
pub use error::{DbError, EngineError, TxAction};
pub use mapper::{decode, map_results, map_rows, Record};
pub use service::Database;
pub use sqlite::SqliteEngine;
pub use users::{create_user, delete_user, fetch_user, fetch_users, update_user_name};
pub use value::Value;
