//! SQLite metadata store with migrations
//!
//! Chunk text and metadata live in one `chunks` table. `occurred_at` is kept
//! verbatim next to its parsed epoch-millisecond value so date filters run
//! in SQL; rows whose timestamp cannot be parsed have a NULL
//! `occurred_at_ms` and never satisfy a date bound.

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;

use super::{ChunkMetadata, ChunkRecord, FilterCriteria, MetadataStore, StoreError};

/// Connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Stay well below SQLite's bound-parameter limit
const MAX_IN_PARAMS: usize = 500;

const SELECT_RECORD: &str = "SELECT chunk_id, text, artifact_id, patient_id, artifact_type, \
                             occurred_at, author, source_url FROM chunks";

/// Metadata store backed by a pooled SQLite database
pub struct SqliteMetadataStore {
    pool: DbPool,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });
        let pool = Pool::builder().max_size(16).build(manager)?;

        Self::from_pool(pool)
    }

    /// Private in-memory database. The pool holds a single connection that
    /// is never recycled, so every caller sees the same data.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteConnectionManager::memory())?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: DbPool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying metadata store migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Number of stored chunks
    pub async fn count(&self) -> Result<usize, StoreError> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    /// Run a closure against a pooled connection on the blocking pool
    async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Metadata store task failed: {}", e)))?
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRecord> {
    Ok(ChunkRecord {
        chunk_id: row.get(0)?,
        text: row.get(1)?,
        metadata: ChunkMetadata {
            artifact_id: row.get(2)?,
            patient_id: row.get(3)?,
            artifact_type: row.get(4)?,
            occurred_at: row.get(5)?,
            author: row.get(6)?,
            source_url: row.get(7)?,
        },
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert_chunks(&self, records: &[ChunkRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let records = records.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO chunks
                        (chunk_id, text, artifact_id, patient_id, artifact_type,
                         occurred_at, occurred_at_ms, author, source_url)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;

                for record in &records {
                    let meta = &record.metadata;
                    let occurred_at_ms = meta.occurred_at().map(|ts| ts.timestamp_millis());
                    stmt.execute(params![
                        record.chunk_id,
                        record.text,
                        meta.artifact_id,
                        meta.patient_id,
                        meta.artifact_type,
                        meta.occurred_at,
                        occurred_at_ms,
                        meta.author,
                        meta.source_url,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn filter_chunks(&self, criteria: &FilterCriteria) -> Result<Vec<String>, StoreError> {
        let criteria = criteria.clone();
        self.run(move |conn| {
            let mut sql = String::from("SELECT chunk_id FROM chunks WHERE 1 = 1");
            let mut values: Vec<Value> = Vec::new();

            if let Some(patient_id) = criteria.patient_id {
                sql.push_str(" AND patient_id = ?");
                values.push(Value::Text(patient_id));
            }
            if let Some(from) = criteria.date_from {
                sql.push_str(" AND occurred_at_ms >= ?");
                values.push(Value::Integer(from.timestamp_millis()));
            }
            if let Some(to) = criteria.date_to {
                sql.push_str(" AND occurred_at_ms <= ?");
                values.push(Value::Integer(to.timestamp_millis()));
            }
            if !criteria.artifact_types.is_empty() {
                sql.push_str(&format!(
                    " AND artifact_type IN ({})",
                    placeholders(criteria.artifact_types.len())
                ));
                values.extend(criteria.artifact_types.into_iter().map(Value::Text));
            }
            sql.push_str(" ORDER BY rowid");

            let mut stmt = conn.prepare(&sql)?;
            let ids = stmt
                .query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn get_chunks_by_ids(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>, StoreError> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_ids = chunk_ids.to_vec();
        self.run(move |conn| {
            let mut records = Vec::with_capacity(chunk_ids.len());
            for group in chunk_ids.chunks(MAX_IN_PARAMS) {
                let sql = format!(
                    "{} WHERE chunk_id IN ({})",
                    SELECT_RECORD,
                    placeholders(group.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(group.iter()), record_from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
            Ok(records)
        })
        .await
    }

    async fn delete_chunks(&self, chunk_ids: &[String]) -> Result<(), StoreError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let chunk_ids = chunk_ids.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached("DELETE FROM chunks WHERE chunk_id = ?1")?;
                for chunk_id in &chunk_ids {
                    stmt.execute(params![chunk_id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.run(|conn| {
            conn.execute("DELETE FROM chunks", [])?;
            Ok(())
        })
        .await
    }
}

/// Each string is one migration
const MIGRATIONS: &[&str] = &[
    // Migration 1: chunk metadata
    r#"
    CREATE TABLE chunks (
        chunk_id TEXT PRIMARY KEY,
        text TEXT NOT NULL,
        artifact_id TEXT NOT NULL,
        patient_id TEXT NOT NULL,
        artifact_type TEXT NOT NULL,
        occurred_at TEXT NOT NULL,
        occurred_at_ms INTEGER,
        author TEXT,
        source_url TEXT
    );

    CREATE INDEX idx_chunks_patient ON chunks(patient_id);
    CREATE INDEX idx_chunks_type ON chunks(artifact_type);
    CREATE INDEX idx_chunks_occurred_at ON chunks(occurred_at_ms);
    CREATE INDEX idx_chunks_artifact ON chunks(artifact_id);
    "#,
];
