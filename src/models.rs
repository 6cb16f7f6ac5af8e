//! Domain models that mirror the SQLite schema and get passed to the TUI.

use std::fmt;

use serde::Deserialize;

/// A row of the `users` table. Field names follow the column names, so the
/// struct decodes straight from a mapped record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Primary key assigned by SQLite; never reassigned.
    pub id: i64,
    pub email: String,
    pub name: String,
    /// `datetime('now')` text at insert time.
    pub date_created: String,
    pub date_modified: String,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}
