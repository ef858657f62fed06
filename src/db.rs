//! SQLite connection pool setup (spec §3).
//!
//! Every connection in the pool runs in WAL mode with foreign keys
//! enabled — `migrate.rs`'s `chunks`/`qa_contexts` tables rely on
//! `ON DELETE CASCADE`/`ON DELETE SET NULL` to keep the relational store
//! and the "null-chunk context is omitted on replay" invariant (spec §4.9)
//! correct, and SQLite ignores those clauses unless `foreign_keys` is on.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;

/// Open (or create) the sqlite database at `config.db.path`, creating its
/// parent directory if needed.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

    tracing::debug!(path = %db_path.display(), "sqlite pool connected");

    Ok(pool)
}
