use chrono::{DateTime, Utc};
use exam_core::model::{QuestionId, TopicGroup, TopicName, TopicPoolEntry};
use exam_core::time::to_millis;

use super::SqliteRepository;
use super::mapping::{map_topic_row, question_id_to_i64};
use crate::repository::{StorageError, TopicPoolRepository, UsageStore};

fn conn(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait::async_trait]
impl TopicPoolRepository for SqliteRepository {
    async fn upsert_topic_entry(&self, entry: &TopicPoolEntry) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO topic_pool (group_code, topic, last_used)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(group_code, topic) DO UPDATE SET
                last_used = excluded.last_used
            ",
        )
        .bind(entry.group().code())
        .bind(entry.topic().as_str())
        .bind(to_millis(entry.last_used()))
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl UsageStore for SqliteRepository {
    async fn least_recently_used_topics(
        &self,
        group: TopicGroup,
    ) -> Result<Vec<TopicPoolEntry>, StorageError> {
        // `id` is AUTOINCREMENT, so it doubles as insertion order.
        let rows = sqlx::query(
            r"
            SELECT group_code, topic, last_used
            FROM topic_pool
            WHERE group_code = ?1
            ORDER BY last_used ASC, id ASC
            ",
        )
        .bind(group.code())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_topic_row).collect()
    }

    async fn touch_topic(
        &self,
        group: TopicGroup,
        topic: &TopicName,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE topic_pool
            SET last_used = MAX(last_used, ?3)
            WHERE group_code = ?1 AND topic = ?2
            ",
        )
        .bind(group.code())
        .bind(topic.as_str())
        .bind(to_millis(now))
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn touch_question(
        &self,
        id: QuestionId,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let res = sqlx::query("UPDATE questions SET last_used = MAX(last_used, ?2) WHERE id = ?1")
            .bind(question_id_to_i64(id)?)
            .bind(to_millis(now))
            .execute(&self.pool)
            .await
            .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
