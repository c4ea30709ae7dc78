//! SQLite persistence for a built index.
//!
//! One `index.sqlite` file per index directory, holding two tables:
//!
//! - `manifest(key, value)`: the [`IndexManifest`] as JSON under key `"manifest"`.
//! - `chunks`: one row per chunk, with its embedding as a little-endian
//!   f32 BLOB.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

use tutor_rag_core::embedding::{blob_to_vec, vec_to_blob};
use tutor_rag_core::models::{Chunk, IndexEntry, IndexManifest};

/// File name of the database inside an index directory.
pub const DB_FILE: &str = "index.sqlite";

const MANIFEST_KEY: &str = "manifest";

pub async fn connect(db_path: &Path, create: bool) -> sqlx::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Delete);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

pub async fn run_migrations(pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manifest (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            char_start INTEGER NOT NULL,
            char_end INTEGER NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(document_id, sequence_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn write_manifest(pool: &SqlitePool, manifest: &IndexManifest) -> sqlx::Result<()> {
    let value = serde_json::to_string(manifest).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query(
        "INSERT INTO manifest (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(MANIFEST_KEY)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn read_manifest(pool: &SqlitePool) -> sqlx::Result<Option<IndexManifest>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM manifest WHERE key = ?")
        .bind(MANIFEST_KEY)
        .fetch_optional(pool)
        .await?;

    value
        .map(|v| serde_json::from_str(&v).map_err(|e| sqlx::Error::Decode(Box::new(e))))
        .transpose()
}

/// Insert all entries in a single transaction.
pub async fn insert_entries(pool: &SqlitePool, entries: &[IndexEntry]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    for entry in entries {
        let chunk = &entry.chunk;
        sqlx::query(
            "INSERT OR REPLACE INTO chunks
             (id, document_id, sequence_index, text, char_start, char_end, hash, embedding)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.sequence_index as i64)
        .bind(&chunk.text)
        .bind(chunk.char_span.start as i64)
        .bind(chunk.char_span.end as i64)
        .bind(&chunk.hash)
        .bind(vec_to_blob(&entry.embedding))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// All persisted entries, ordered by `(document_id, sequence_index)`.
pub async fn load_entries(pool: &SqlitePool) -> sqlx::Result<Vec<IndexEntry>> {
    let rows = sqlx::query(
        "SELECT id, document_id, sequence_index, text, char_start, char_end, hash, embedding
         FROM chunks ORDER BY document_id, sequence_index",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> sqlx::Result<IndexEntry> {
            let embedding: Vec<u8> = row.try_get("embedding")?;
            let char_start: i64 = row.try_get("char_start")?;
            let char_end: i64 = row.try_get("char_end")?;
            let sequence_index: i64 = row.try_get("sequence_index")?;
            Ok(IndexEntry {
                chunk: Chunk {
                    id: row.try_get("id")?,
                    document_id: row.try_get("document_id")?,
                    sequence_index: sequence_index as usize,
                    text: row.try_get("text")?,
                    char_span: char_start as usize..char_end as usize,
                    hash: row.try_get("hash")?,
                },
                embedding: blob_to_vec(&embedding),
            })
        })
        .collect()
}
