//! Core library surface for the user roster TUI.
//!
//! `db` holds the lazily opened session wrapper and everything it forwards to;
//! `ui` renders the user list on top of it. The binary only wires
//! configuration, logging and these two together.
pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod ui;

/// Convenience re-exports for the persistence layer.
pub use db::{fetch_users, Database, DbError, SqliteEngine};

/// The domain type the list view renders.
pub use models::User;

/// The interactive application entry point and state container.
pub use ui::{run_app, App};
