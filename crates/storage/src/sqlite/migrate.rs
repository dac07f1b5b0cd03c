use sqlx::SqlitePool;
use tracing::{debug, info};

use super::SqliteInitError;

/// Applies every pending schema version in order.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: question bank and topic pools. Usage stamps are epoch millis.
    if is_applied(pool, 1).await? {
        debug!("schema version 1 already applied");
    } else {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS questions (
                    id INTEGER PRIMARY KEY,
                    topic TEXT NOT NULL,
                    kind TEXT NOT NULL CHECK (kind IN ('I', 'A')),
                    type_number INTEGER NOT NULL CHECK (type_number >= 0),
                    last_used INTEGER NOT NULL,
                    text TEXT NOT NULL DEFAULT '',
                    question_content TEXT,
                    answer_content TEXT,
                    image TEXT,
                    audio TEXT,
                    answer_audio TEXT
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS topic_pool (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    group_code INTEGER NOT NULL CHECK (group_code IN (1, 2, 8)),
                    topic TEXT NOT NULL,
                    last_used INTEGER NOT NULL,
                    UNIQUE (group_code, topic)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_questions_slot
                    ON questions (topic, kind, type_number, last_used, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_questions_type_number
                    ON questions (type_number, last_used, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_topic_pool_group_last_used
                    ON topic_pool (group_code, last_used, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("applied schema version 1");
    }

    Ok(())
}
