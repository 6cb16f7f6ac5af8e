use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use directories::BaseDirs;

/// Folder name used beneath the user's home directory for application data.
const DATA_DIR_NAME: &str = ".user-roster";
/// SQLite file name stored inside the application data directory.
const DB_FILE_NAME: &str = "roster.sqlite3";
/// Log file name; the TUI owns the terminal so logs go to disk.
const LOG_FILE_NAME: &str = "user-roster.log";

/// Browse the users stored in the local roster database.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// SQLite file to open (defaults to ~/.user-roster/roster.sqlite3).
    #[arg(long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Where to write logs (defaults to ~/.user-roster/user-roster.log).
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, value_name = "FILTER", default_value = "info")]
    pub log_level: String,
}

/// Resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub log_path: PathBuf,
    pub log_level: String,
}

impl AppConfig {
    /// Fill the gaps in `cli` with paths under the user's data directory.
    pub fn resolve(cli: Cli) -> Result<Self> {
        let (db_path, log_path) = match (cli.database, cli.log_file) {
            (Some(db), Some(log)) => (db, log),
            (db, log) => {
                let dir = data_dir()?;
                (
                    db.unwrap_or_else(|| dir.join(DB_FILE_NAME)),
                    log.unwrap_or_else(|| dir.join(LOG_FILE_NAME)),
                )
            }
        };

        Ok(Self {
            db_path,
            log_path,
            log_level: cli.log_level,
        })
    }
}

/// Resolve the application data directory inside the user's home.
fn data_dir() -> Result<PathBuf> {
    let base_dirs = BaseDirs::new().ok_or_else(|| anyhow!("could not locate home directory"))?;
    Ok(base_dirs.home_dir().join(DATA_DIR_NAME))
}
