use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use rusqlite::ErrorCode;

use crate::models::User;
use crate::values;

use super::error::DbError;
use super::service::Database;

/// Every user in insertion order. This is the query the list view runs on
/// mount.
pub async fn fetch_users(db: &Database) -> Result<Vec<User>> {
    db.query_as("SELECT * FROM users ORDER BY id", &[])
        .await
        .context("failed to load users")
}

/// Look up a single user by primary key.
pub async fn fetch_user(db: &Database, id: i64) -> Result<Option<User>> {
    let mut users: Vec<User> = db
        .query_as("SELECT * FROM users WHERE id = ?1", &values![id])
        .await
        .context("failed to load user")?;
    Ok(users.pop())
}

/// Insert a new user and return the stored row, timestamps included. Insert
/// and read-back share one transaction so a failed read leaves no orphan row.
pub async fn create_user(db: &Database, email: &str, name: &str) -> Result<User> {
    let user = db
        .run_in_transaction(|db| {
            async move {
                let inserted = db
                    .execute(
                        "INSERT INTO users (email, name) VALUES (?1, ?2)",
                        &values![email, name],
                    )
                    .await
                    .map_err(|err| map_unique_email(err, email))?;

                fetch_user(db, inserted.last_insert_id)
                    .await?
                    .ok_or_else(|| anyhow!("User vanished after insert"))
            }
            .boxed()
        })
        .await
        .context("failed to insert user")?;

    Ok(user)
}

/// Rename an existing user and bump `dateModified`.
pub async fn update_user_name(db: &Database, id: i64, name: &str) -> Result<()> {
    let updated = db
        .execute(
            "UPDATE users SET name = ?1, dateModified = datetime('now') WHERE id = ?2",
            &values![name, id],
        )
        .await
        .context("failed to update user")?;

    if updated.rows_affected == 0 {
        Err(anyhow!("User not found"))
    } else {
        Ok(())
    }
}

/// Remove a user row.
pub async fn delete_user(db: &Database, id: i64) -> Result<()> {
    let deleted = db
        .execute("DELETE FROM users WHERE id = ?1", &values![id])
        .await
        .context("failed to delete user")?;

    if deleted.rows_affected == 0 {
        Err(anyhow!("User not found"))
    } else {
        Ok(())
    }
}

/// Email is the only unique column besides the key, so a constraint
/// violation on insert means the address is taken.
fn map_unique_email(err: DbError, email: &str) -> anyhow::Error {
    if matches!(err.sqlite_error_code(), Some(ErrorCode::ConstraintViolation)) {
        anyhow!("Email {email} is already registered.")
    } else {
        err.into()
    }
}
