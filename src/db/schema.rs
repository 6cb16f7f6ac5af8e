//! Schema and seed data for the roster database.

use std::path::PathBuf;

use super::engine::{OpenOptions, UpgradeStep};

/// Current schema version. Bump together with a new entry in [`upgrades`].
pub const SCHEMA_VERSION: u32 = 1;

/// Users inserted by the first schema version, in insertion order.
pub const SEED_USERS: [(&str, &str); 10] = [
    ("sarah.chen@email.com", "Sarah Chen"),
    ("michael.rodriguez@email.com", "Michael Rodriguez"),
    ("emma.wilson@email.com", "Emma Wilson"),
    ("james.okonkwo@email.com", "James Okonkwo"),
    ("priya.patel@email.com", "Priya Patel"),
    ("david.kim@email.com", "David Kim"),
    ("olivia.santos@email.com", "Olivia Santos"),
    ("alex.novak@email.com", "Alex Novak"),
    ("fatima.ali@email.com", "Fatima Ali"),
    ("lucas.berg@email.com", "Lucas Berg"),
];

const CREATE_USERS: &str = "CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    dateCreated TEXT NOT NULL DEFAULT (datetime('now')),
    dateModified TEXT NOT NULL DEFAULT (datetime('now'))
)";

fn seed_users_sql() -> String {
    let rows: Vec<String> = SEED_USERS
        .iter()
        .map(|(email, name)| format!("('{email}', '{name}')"))
        .collect();
    format!("INSERT INTO users (email, name) VALUES {}", rows.join(", "))
}

/// Every known upgrade step, oldest first.
pub fn upgrades() -> Vec<UpgradeStep> {
    vec![UpgradeStep::new(1, [CREATE_USERS.to_string(), seed_users_sql()])]
}

/// Writable open options for the roster file at `path`.
pub fn open_options(path: impl Into<PathBuf>) -> OpenOptions {
    upgrades()
        .into_iter()
        .fold(OpenOptions::new(path), OpenOptions::with_upgrade)
}
