use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS catalog_records (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    title       TEXT    NOT NULL,
    start_date  INTEGER NOT NULL,
    end_date    INTEGER NOT NULL,
    url         TEXT    NOT NULL,
    image_url   TEXT,
    fingerprint TEXT    NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS catalog_records_fingerprint_uq
    ON catalog_records (fingerprint);
CREATE INDEX IF NOT EXISTS catalog_records_window_idx
    ON catalog_records (start_date, end_date);
CREATE TABLE IF NOT EXISTS scraper_settings (
    key        TEXT PRIMARY KEY,
    value      TEXT    NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

#[derive(Clone, Debug)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Opens (creating if needed) the SQLite database and ensures the schema.
    // SECURITY: never include raw DSNs in tracing spans.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| "parsing sqlite database url")?
            .create_if_missing(true)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            })
            .busy_timeout(Duration::from_secs(5));

        if !in_memory {
            if let Some(parent) = connect_options.get_filename().parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating database directory {}", parent.display()))?;
                }
            }
        }

        // An in-memory database lives and dies with its connection: pin it to one.
        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(10));
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options
                .max_connections(max_connections.max(1))
                .idle_timeout(Duration::from_secs(600))
        };

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .context("opening sqlite pool")?;
        info!(in_memory, "connected to db");

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Idempotent schema creation; safe to run on every start.
    pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(pool)
            .await
            .context("applying schema")?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn in_memory() -> Self {
        Self::connect("sqlite::memory:", 1)
            .await
            .expect("in-memory sqlite")
    }
}
