//! Binary entry point: resolve configuration, start logging, open the roster
//! database lazily, and drive the Ratatui event loop until the user exits.
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use user_roster::config::{AppConfig, Cli};
use user_roster::db::schema;
use user_roster::{logging, run_app, App, Database, SqliteEngine};

fn main() -> Result<()> {
    let config = AppConfig::resolve(Cli::parse())?;
    logging::init(&config.log_path, &config.log_level)?;
    tracing::info!(database = %config.db_path.display(), "starting user roster");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let db = Database::new(
        Arc::new(SqliteEngine::new()),
        schema::open_options(&config.db_path),
    );

    let mut app = App::load(runtime, db)?;
    let result = run_app(&mut app);
    app.shutdown()?;
    result
}
