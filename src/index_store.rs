//! Persisted index: a directory holding `index.sqlite`.
//!
//! Three tables:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `manifest` | one row: embedding provider/model/dims, build id, build time, chunk count, data fingerprint, chunking levels |
//! | `chunks` | chunk metadata and text |
//! | `vectors` | one little-endian `f32` BLOB per chunk |
//!
//! A directory with a readable manifest means the index exists and a
//! rebuild can be skipped. Saving writes a complete new database next to the
//! old one and renames it over `index.sqlite`; the index is never updated in
//! place, and other files in the directory are left alone.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

use worldcup_rag_core::chunk::ChunkLevel;
use worldcup_rag_core::embedding::{blob_to_vec, vec_to_blob};
use worldcup_rag_core::index::{IndexEntry, VectorIndex};
use worldcup_rag_core::models::Chunk;

use crate::db;

pub const INDEX_FILE: &str = "index.sqlite";

/// Metadata describing how an index was built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub build_id: String,
    pub built_at: String,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub dims: usize,
    pub chunk_count: usize,
    pub statement_count: usize,
    pub data_fingerprint: String,
    pub levels: Vec<ChunkLevel>,
}

pub fn index_file(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manifest (
            build_id TEXT PRIMARY KEY,
            built_at TEXT NOT NULL,
            embedding_provider TEXT NOT NULL,
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            statement_count INTEGER NOT NULL,
            data_fingerprint TEXT NOT NULL,
            levels_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            granularity TEXT NOT NULL,
            byte_length INTEGER NOT NULL,
            char_offset INTEGER NOT NULL,
            overlap INTEGER NOT NULL,
            source_ids_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            chunk_id TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_granularity ON chunks(granularity)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Replace the index in `dir` with a fresh one.
///
/// The old `index.sqlite` stays readable until the new one is complete.
pub async fn save_index(dir: &Path, index: &VectorIndex, manifest: &Manifest) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create index dir {}", dir.display()))?;

    let staging = dir.join(format!("{}.{}.tmp", INDEX_FILE, uuid::Uuid::new_v4()));
    if let Err(e) = write_index(&staging, index, manifest).await {
        remove_sqlite_files(&staging);
        return Err(e);
    }

    let target = index_file(dir);
    for suffix in ["-wal", "-shm"] {
        let _ = std::fs::remove_file(sidecar(&target, suffix));
    }
    std::fs::rename(&staging, &target)
        .with_context(|| format!("Failed to move new index into {}", target.display()))?;
    remove_sqlite_files(&staging);
    Ok(())
}

async fn write_index(file: &Path, index: &VectorIndex, manifest: &Manifest) -> Result<()> {
    let pool = db::connect(file).await?;
    create_schema(&pool).await?;

    let mut tx = pool.begin().await?;
    for entry in index.entries() {
        let c = &entry.chunk;
        sqlx::query(
            "INSERT INTO chunks (id, text, granularity, byte_length, char_offset, overlap, source_ids_json)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&c.id)
        .bind(&c.text)
        .bind(c.granularity.as_str())
        .bind(c.byte_length as i64)
        .bind(c.offset as i64)
        .bind(c.overlap as i64)
        .bind(serde_json::to_string(&c.source_statement_ids)?)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO vectors (chunk_id, dims, embedding) VALUES (?, ?, ?)")
            .bind(&c.id)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        "INSERT INTO manifest (build_id, built_at, embedding_provider, embedding_model, dims,
                               chunk_count, statement_count, data_fingerprint, levels_json)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&manifest.build_id)
    .bind(&manifest.built_at)
    .bind(&manifest.embedding_provider)
    .bind(&manifest.embedding_model)
    .bind(manifest.dims as i64)
    .bind(manifest.chunk_count as i64)
    .bind(manifest.statement_count as i64)
    .bind(&manifest.data_fingerprint)
    .bind(serde_json::to_string(&manifest.levels)?)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    // fold the WAL into the main file so the rename carries everything
    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
        .execute(&pool)
        .await?;
    pool.close().await;
    Ok(())
}

fn sidecar(file: &Path, suffix: &str) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Best-effort removal of a database and its WAL/SHM files.
fn remove_sqlite_files(file: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(sidecar(file, suffix));
    }
}

/// Read the manifest, or `None` when no index exists at `dir`.
pub async fn read_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let file = index_file(dir);
    if !file.exists() {
        return Ok(None);
    }
    let pool = db::connect(&file).await?;
    let manifest = fetch_manifest(&pool).await;
    pool.close().await;
    manifest
}

async fn fetch_manifest(pool: &SqlitePool) -> Result<Option<Manifest>> {
    let row = match sqlx::query("SELECT * FROM manifest LIMIT 1")
        .fetch_optional(pool)
        .await
    {
        Ok(row) => row,
        // a half-written index has no manifest table
        Err(_) => return Ok(None),
    };
    let Some(row) = row else {
        return Ok(None);
    };

    let levels_json: String = row.get("levels_json");
    Ok(Some(Manifest {
        build_id: row.get("build_id"),
        built_at: row.get("built_at"),
        embedding_provider: row.get("embedding_provider"),
        embedding_model: row.get("embedding_model"),
        dims: row.get::<i64, _>("dims") as usize,
        chunk_count: row.get::<i64, _>("chunk_count") as usize,
        statement_count: row.get::<i64, _>("statement_count") as usize,
        data_fingerprint: row.get("data_fingerprint"),
        levels: serde_json::from_str(&levels_json).context("Corrupt manifest levels")?,
    }))
}

/// Load the whole index into memory.
pub async fn load_index(dir: &Path) -> Result<(VectorIndex, Manifest)> {
    let file = index_file(dir);
    if !file.exists() {
        bail!("No index at {}. Run `wcr build` first.", dir.display());
    }
    let pool = db::connect(&file).await?;

    let manifest = fetch_manifest(&pool)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Index at {} has no manifest", dir.display()))?;

    let rows = sqlx::query(
        r#"
        SELECT c.id, c.text, c.granularity, c.byte_length, c.char_offset, c.overlap,
               c.source_ids_json, v.embedding
        FROM chunks c
        JOIN vectors v ON v.chunk_id = c.id
        ORDER BY c.id
        "#,
    )
    .fetch_all(&pool)
    .await?;
    pool.close().await;

    let mut index = VectorIndex::new();
    for row in rows {
        let granularity: String = row.get("granularity");
        let source_ids: String = row.get("source_ids_json");
        let blob: Vec<u8> = row.get("embedding");
        let chunk = Chunk {
            id: row.get("id"),
            text: row.get("text"),
            source_statement_ids: serde_json::from_str(&source_ids)
                .context("Corrupt chunk source ids")?,
            granularity: granularity.parse()?,
            byte_length: row.get::<i64, _>("byte_length") as usize,
            offset: row.get::<i64, _>("char_offset") as usize,
            overlap: row.get::<i64, _>("overlap") as usize,
        };
        index.insert(IndexEntry {
            chunk,
            vector: blob_to_vec(&blob),
        })?;
    }

    if index.len() != manifest.chunk_count {
        bail!(
            "Index at {} is incomplete: manifest lists {} chunks, found {}",
            dir.display(),
            manifest.chunk_count,
            index.len()
        );
    }

    Ok((index, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldcup_rag_core::chunk::{chunk_all, default_levels};

    fn sample_index() -> VectorIndex {
        let chunks = chunk_all(
            "Quem foi campeão em 2022? Argentina.",
            &["2022-champion-01".to_string()],
            &default_levels(),
        );
        let vectors = (0..chunks.len())
            .map(|i| vec![i as f32, 1.0, -0.5])
            .collect();
        VectorIndex::from_batch(chunks, vectors).unwrap()
    }

    fn manifest(chunk_count: usize) -> Manifest {
        Manifest {
            build_id: "b1".to_string(),
            built_at: "2026-01-01T00:00:00Z".to_string(),
            embedding_provider: "hash".to_string(),
            embedding_model: "hash".to_string(),
            dims: 3,
            chunk_count,
            statement_count: 1,
            data_fingerprint: "abc".to_string(),
            levels: default_levels(),
        }
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("wc_index");
        let index = sample_index();
        let m = manifest(index.len());

        save_index(&dir, &index, &m).await.unwrap();
        assert!(index_file(&dir).exists());

        let (loaded, loaded_manifest) = load_index(&dir).await.unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded_manifest, m);
    }

    #[tokio::test]
    async fn test_save_replaces_existing_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("wc_index");
        let index = sample_index();

        save_index(&dir, &index, &manifest(index.len())).await.unwrap();
        let mut second = manifest(index.len());
        second.build_id = "b2".to_string();
        save_index(&dir, &index, &second).await.unwrap();

        let (_, loaded) = load_index(&dir).await.unwrap();
        assert_eq!(loaded.build_id, "b2");
    }

    #[tokio::test]
    async fn test_save_leaves_other_files_in_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path();
        std::fs::write(dir.join("world_cup.csv"), b"Year,Host\n2022,Qatar\n").unwrap();

        let index = sample_index();
        save_index(dir, &index, &manifest(index.len())).await.unwrap();
        save_index(dir, &index, &manifest(index.len())).await.unwrap();

        assert!(dir.join("world_cup.csv").exists());
        let leftovers: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "staging files left: {:?}", leftovers);
        assert!(load_index(dir).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_manifest_missing() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(read_manifest(tmp.path()).await.unwrap().is_none());
        assert!(load_index(tmp.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_load_detects_count_mismatch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("wc_index");
        let index = sample_index();
        save_index(&dir, &index, &manifest(index.len() + 1))
            .await
            .unwrap();
        assert!(load_index(&dir).await.is_err());
    }
}
