//! Secondary keyword index.
//!
//! Each ingest rebuilds `index/<video_id>/keyword.db`, a small SQLite
//! database holding the video's chunks with an FTS5 table over their text.
//! Answer synthesis retrieves supporting passages from it with BM25.
//!
//! Building this index is best-effort: the orchestrator logs and swallows
//! any failure, because primary (vector) search does not depend on it.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;
use std::path::Path;

use crate::db;
use crate::layout::DataLayout;
use crate::migrate;
use crate::models::Chunk;

pub const KEYWORD_DB_FILE: &str = "keyword.db";

/// A chunk matched by keyword search. Higher score is better.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub chunk: Chunk,
    pub score: f64,
}

/// Replace the index at `db_path` with `chunks`.
pub async fn build_keyword_index(db_path: &Path, chunks: &[Chunk]) -> Result<()> {
    let pool = db::connect(db_path).await?;
    migrate::run_migrations(&pool).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM chunks_fts")
        .execute(&mut *tx)
        .await?;

    for (ordinal, chunk) in chunks.iter().enumerate() {
        let ordinal = ordinal as i64;
        sqlx::query(
            r#"
            INSERT INTO chunks (ordinal, video_id, start_secs, end_secs, transcript, caption, frame_file, text)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ordinal)
        .bind(&chunk.video_id)
        .bind(chunk.start)
        .bind(chunk.end)
        .bind(&chunk.transcript)
        .bind(&chunk.caption)
        .bind(&chunk.frame_file)
        .bind(&chunk.text)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (ordinal, text) VALUES (?, ?)")
            .bind(ordinal)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    pool.close().await;
    Ok(())
}

/// Best-effort index built after the vector upsert.
#[async_trait]
pub trait SecondaryIndexer: Send + Sync {
    async fn build(&self, video_id: &str, chunks: &[Chunk]) -> Result<()>;
}

/// [`SecondaryIndexer`] writing `index/<video_id>/keyword.db`.
pub struct KeywordIndexer {
    layout: DataLayout,
}

impl KeywordIndexer {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl SecondaryIndexer for KeywordIndexer {
    async fn build(&self, video_id: &str, chunks: &[Chunk]) -> Result<()> {
        build_keyword_index(&self.layout.keyword_db(video_id), chunks).await
    }
}

/// Turn free text into an FTS5 query: every word quoted, OR'd together.
///
/// FTS5 syntax characters in user input would otherwise be parsed as
/// operators or cause syntax errors.
pub fn sanitize_fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// BM25 search over an existing index. The caller checks that it exists.
pub async fn keyword_search(db_path: &Path, query: &str, limit: usize) -> Result<Vec<KeywordHit>> {
    let Some(fts_query) = sanitize_fts_query(query) else {
        return Ok(Vec::new());
    };

    let pool = db::connect_existing(db_path).await?;
    let rows = sqlx::query(
        r#"
        SELECT c.video_id, c.start_secs, c.end_secs, c.transcript, c.caption,
               c.frame_file, c.text, chunks_fts.rank AS rank
        FROM chunks_fts
        JOIN chunks c ON c.ordinal = chunks_fts.ordinal
        WHERE chunks_fts MATCH ?
        ORDER BY chunks_fts.rank
        LIMIT ?
        "#,
    )
    .bind(&fts_query)
    .bind(limit as i64)
    .fetch_all(&pool)
    .await?;
    pool.close().await;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            KeywordHit {
                chunk: Chunk {
                    video_id: row.get("video_id"),
                    start: row.get("start_secs"),
                    end: row.get("end_secs"),
                    transcript: row.get("transcript"),
                    caption: row.get("caption"),
                    frame_file: row.get("frame_file"),
                    text: row.get("text"),
                    point_id: None,
                },
                score: -rank, // negate so higher = better
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(start: f64, transcript: &str, caption: &str) -> Chunk {
        Chunk::new("vid", start, start + 5.0, transcript, caption.to_string(), None)
    }

    #[test]
    fn sanitizes_operators_away() {
        assert_eq!(
            sanitize_fts_query("what's NEAR(\"the\" cat)?").as_deref(),
            Some("\"what\" OR \"s\" OR \"near\" OR \"the\" OR \"cat\"")
        );
        assert_eq!(sanitize_fts_query("  ?! "), None);
    }

    #[tokio::test]
    async fn build_then_search() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("vid").join(KEYWORD_DB_FILE);
        let chunks = vec![
            chunk(0.0, "welcome to the kitchen", "a person at a stove"),
            chunk(5.0, "today we bake bread", "flour on a table"),
            chunk(10.0, "the bread needs to rise", "dough in a bowl"),
        ];
        build_keyword_index(&db_path, &chunks).await.unwrap();

        let hits = keyword_search(&db_path, "bread?", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chunk.text.contains("bread")));
        assert!(hits[0].score >= hits[1].score);

        let hits = keyword_search(&db_path, "stove", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.start, 0.0);
    }

    #[tokio::test]
    async fn rebuild_replaces_previous_rows() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join(KEYWORD_DB_FILE);
        build_keyword_index(&db_path, &[chunk(0.0, "old words", "")])
            .await
            .unwrap();
        build_keyword_index(&db_path, &[chunk(0.0, "new words", "")])
            .await
            .unwrap();

        assert!(keyword_search(&db_path, "old", 5).await.unwrap().is_empty());
        assert_eq!(keyword_search(&db_path, "words", 5).await.unwrap().len(), 1);
    }
}
