//! SQLite database shared by the checkpoint store and the history log.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// How long a writer waits on another process's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Async-safe handle to the database.
///
/// All access runs on tokio's blocking pool via `spawn_blocking`, so
/// synchronous SQLite I/O never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TendDb>>,
}

impl DbHandle {
    pub fn new(db: TendDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(TendDb::new(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(TendDb::new_in_memory()?))
    }

    /// Run a closure with the database on a blocking thread.
    /// Everything moved into `f` must be owned.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TendDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct TendDb {
    pub(crate) conn: Connection,
}

impl TendDb {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// In-memory database (tests, one-shot runs).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS checkpoints (
                    thread_id TEXT PRIMARY KEY,
                    step_seq INTEGER NOT NULL,
                    pending TEXT NOT NULL DEFAULT '[]',
                    snapshot TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS history (
                    thread_id TEXT PRIMARY KEY,
                    user_intent TEXT NOT NULL,
                    status TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    final_artifact TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_checkpoints_updated ON checkpoints(updated_at);
                CREATE INDEX IF NOT EXISTS idx_history_created ON history(created_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }
}
