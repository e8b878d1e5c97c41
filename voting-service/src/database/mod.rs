pub mod constants;
pub mod migrator;
pub mod models;
pub mod operations;
pub mod sql;

use std::str::FromStr;

use anyhow::{bail, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

pub use migrator::run_migrations;

pub const MEMORY_DB_PATH: &str = ":memory:";

/// Pooled database handle for the voting service
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database, enable foreign keys and run migrations.
    pub async fn connect(db_path: &str, max_connections: u32) -> Result<Self> {
        validate_db_path(db_path)?;
        info!("Initializing database at {:?}", db_path);

        // An in-memory database exists per connection, so the pool must not
        // fan out beyond one connection nor ever reap it.
        let (options, pool_options) = if db_path == MEMORY_DB_PATH {
            (
                SqliteConnectOptions::from_str("sqlite::memory:")?,
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None),
            )
        } else {
            (
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .create_if_missing(true),
                SqlitePoolOptions::new().max_connections(max_connections.max(1)),
            )
        };

        let pool = pool_options
            .connect_with(options.foreign_keys(true))
            .await?;

        run_migrations(&pool).await?;

        info!("Database initialized successfully");

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Reject database paths that could escape the data directory or silently
/// point at the wrong kind of filesystem entry.
pub fn validate_db_path(db_path: &str) -> Result<()> {
    if db_path == MEMORY_DB_PATH {
        return Ok(());
    }

    if db_path.is_empty() {
        bail!("Empty database path");
    }

    if db_path.contains(['\0', '\n', '\r', '\t']) {
        bail!("Invalid control characters in database path");
    }

    let path = std::path::Path::new(db_path);

    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        bail!("Parent directory traversal is not allowed in database path");
    }

    if path.file_name().is_none() {
        bail!("Database path must include a file name");
    }

    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() || meta.is_dir() {
            bail!("Database path must be a regular file");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_db_path;

    #[test]
    fn allows_memory_and_regular_paths() {
        assert!(validate_db_path(":memory:").is_ok());
        assert!(validate_db_path("data/voting.db").is_ok());
    }

    #[test]
    fn rejects_empty_and_control_chars() {
        assert!(validate_db_path("").is_err());
        assert!(validate_db_path("bad\nname.db").is_err());
        assert!(validate_db_path("bad\0name.db").is_err());
    }

    #[test]
    fn rejects_parent_traversal_and_bare_directories() {
        assert!(validate_db_path("../escape.db").is_err());
        assert!(validate_db_path("dir/../escape.db").is_err());
        assert!(validate_db_path("data/").is_err());
    }
}
