use anyhow::Result;
use sqlx::SqlitePool;

/// Create the keyword index schema if it does not exist yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Chunk rows, one per aligned transcript segment
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            ordinal INTEGER PRIMARY KEY,
            video_id TEXT NOT NULL,
            start_secs REAL NOT NULL,
            end_secs REAL NOT NULL,
            transcript TEXT NOT NULL,
            caption TEXT NOT NULL,
            frame_file TEXT,
            text TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                ordinal UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_start ON chunks(start_secs)")
        .execute(pool)
        .await?;

    Ok(())
}
