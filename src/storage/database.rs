//! SQLite-backed object store with schema migrations.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OptionalExtension};

use crate::error::AppError;
use crate::storage::jobs::current_timestamp;
use crate::storage::object_store::{ListPage, ObjectStore};

/// Current schema version. Increment when adding new migrations.
const SCHEMA_VERSION: i32 = 1;

/// V1 schema: a single ordered key/value table.
const V1_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS objects (
    key TEXT PRIMARY KEY NOT NULL,
    body BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// SQLite database handle.
///
/// Each operation opens its own connection on the blocking pool, so the
/// handle is cheap to share between chunk workers.
#[derive(Debug, Clone)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Initializes the database at the given path.
    /// Creates parent directories if needed, opens the SQLite file, and runs migrations.
    pub async fn init(db_path: PathBuf) -> Result<Self, AppError> {
        let path = db_path.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::Storage(format!("Failed to create database directory: {e}"))
                })?;
            }

            let mut conn = open(&path)?;
            run_migrations(&mut conn)?;

            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Database init task failed: {e}")))??;

        tracing::info!("[STORAGE] SQLite object store ready at {}", db_path.display());

        Ok(Self { db_path })
    }

    /// Simple health check: executes SELECT 1.
    pub async fn health_check(&self) -> Result<(), AppError> {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = open(&db_path)?;
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| AppError::Storage(format!("Health check failed: {e}")))?;
            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Health check task failed: {e}")))?
    }
}

impl ObjectStore for Database {
    fn put<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        let db_path = self.db_path.clone();
        let key = key.to_string();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = open(&db_path)?;
                conn.execute(
                    r#"
                    INSERT INTO objects (key, body, updated_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        body = excluded.body,
                        updated_at = excluded.updated_at
                    "#,
                    rusqlite::params![key, body, current_timestamp()],
                )
                .map_err(|e| AppError::Storage(format!("Failed to put {key}: {e}")))?;

                Ok::<_, AppError>(())
            })
            .await
            .map_err(|e| AppError::Internal(format!("Put task failed: {e}")))?
        })
    }

    fn create<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        let db_path = self.db_path.clone();
        let key = key.to_string();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = open(&db_path)?;
                let inserted = conn.execute(
                    "INSERT INTO objects (key, body, updated_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![key, body, current_timestamp()],
                );

                match inserted {
                    Ok(_) => Ok(()),
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == ErrorCode::ConstraintViolation =>
                    {
                        Err(AppError::AlreadyExists(key))
                    }
                    Err(e) => Err(AppError::Storage(format!("Failed to create {key}: {e}"))),
                }
            })
            .await
            .map_err(|e| AppError::Internal(format!("Create task failed: {e}")))?
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, AppError>> + Send + 'a>> {
        let db_path = self.db_path.clone();
        let key = key.to_string();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = open(&db_path)?;
                conn.query_row("SELECT body FROM objects WHERE key = ?1", [&key], |row| {
                    row.get::<_, Vec<u8>>(0)
                })
                .optional()
                .map_err(|e| AppError::Storage(format!("Failed to get {key}: {e}")))
            })
            .await
            .map_err(|e| AppError::Internal(format!("Get task failed: {e}")))?
        })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        let db_path = self.db_path.clone();
        let key = key.to_string();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = open(&db_path)?;
                conn.execute("DELETE FROM objects WHERE key = ?1", [&key])
                    .map_err(|e| AppError::Storage(format!("Failed to delete {key}: {e}")))?;
                Ok::<_, AppError>(())
            })
            .await
            .map_err(|e| AppError::Internal(format!("Delete task failed: {e}")))?
        })
    }

    fn list_page<'a>(
        &'a self,
        prefix: &'a str,
        start_after: Option<&'a str>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<ListPage, AppError>> + Send + 'a>> {
        let db_path = self.db_path.clone();
        let prefix = prefix.to_string();
        let start_after = start_after.unwrap_or_default().to_string();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = open(&db_path)?;
                let mut stmt = conn
                    .prepare(
                        r#"
                        SELECT key FROM objects
                        WHERE key >= ?1
                          AND substr(key, 1, length(?1)) = ?1
                          AND key > ?2
                        ORDER BY key ASC
                        LIMIT ?3
                        "#,
                    )
                    .map_err(|e| AppError::Storage(format!("Failed to prepare listing: {e}")))?;

                let keys = stmt
                    .query_map(
                        rusqlite::params![prefix, start_after, limit as i64],
                        |row| row.get::<_, String>(0),
                    )
                    .map_err(|e| AppError::Storage(format!("Failed to list {prefix}: {e}")))?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| AppError::Storage(format!("Failed to collect keys: {e}")))?;

                Ok::<_, AppError>(ListPage::from_keys(keys, limit))
            })
            .await
            .map_err(|e| AppError::Internal(format!("List task failed: {e}")))?
        })
    }
}

/// Opens a connection with busy timeout and WAL mode.
fn open(path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(path)
        .map_err(|e| AppError::Storage(format!("Failed to open database: {e}")))?;

    conn.busy_timeout(Duration::from_secs(10))
        .map_err(|e| AppError::Storage(format!("Failed to set busy timeout: {e}")))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Storage(format!("Failed to set WAL mode: {e}")))?;

    Ok(conn)
}

/// Runs database migrations using PRAGMA user_version.
fn run_migrations(conn: &mut Connection) -> Result<(), AppError> {
    let current_version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| AppError::Storage(format!("Failed to get schema version: {e}")))?;

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .map_err(|e| AppError::Storage(format!("Failed to start migration transaction: {e}")))?;

    if current_version < 1 {
        tx.execute_batch(V1_SCHEMA)
            .map_err(|e| AppError::Storage(format!("V1 migration failed: {e}")))?;
    }

    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| AppError::Storage(format!("Failed to update schema version: {e}")))?;

    tx.commit()
        .map_err(|e| AppError::Storage(format!("Failed to commit migration: {e}")))?;

    Ok(())
}
