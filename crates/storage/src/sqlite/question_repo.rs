use exam_core::model::{Question, QuestionId, TopicName};
use exam_core::time::to_millis;
use sqlx::{QueryBuilder, Sqlite};

use super::SqliteRepository;
use super::mapping::{QUESTION_COLUMNS, map_question_row, question_id_from_i64, question_id_to_i64};
use crate::repository::{QuestionQuery, QuestionRepository, StorageError};

fn conn(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait::async_trait]
impl QuestionRepository for SqliteRepository {
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let content = question.content();
        sqlx::query(
            r"
            INSERT INTO questions (
                id, topic, kind, type_number, last_used, text,
                question_content, answer_content, image, audio, answer_audio
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                topic = excluded.topic,
                kind = excluded.kind,
                type_number = excluded.type_number,
                last_used = excluded.last_used,
                text = excluded.text,
                question_content = excluded.question_content,
                answer_content = excluded.answer_content,
                image = excluded.image,
                audio = excluded.audio,
                answer_audio = excluded.answer_audio
            ",
        )
        .bind(question_id_to_i64(question.id())?)
        .bind(question.topic().as_str())
        .bind(question.kind().as_str())
        .bind(i64::from(question.type_number()))
        .bind(to_millis(question.last_used()))
        .bind(content.text.as_str())
        .bind(content.question_content.as_deref())
        .bind(content.answer_content.as_deref())
        .bind(content.image.as_deref())
        .bind(content.audio.as_deref())
        .bind(content.answer_audio.as_deref())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn get_question(&self, id: QuestionId) -> Result<Question, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?1"
        ))
        .bind(question_id_to_i64(id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        map_question_row(&row)
    }

    async fn find_questions(&self, query: &QuestionQuery) -> Result<Vec<Question>, StorageError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE 1 = 1"));
        if let Some(topic) = &query.topic {
            qb.push(" AND topic = ").push_bind(topic.as_str().to_owned());
        }
        if let Some(kind) = query.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(type_number) = query.type_number {
            qb.push(" AND type_number = ")
                .push_bind(i64::from(type_number));
        }
        if let Some(exclude) = query.exclude {
            qb.push(" AND id <> ").push_bind(question_id_to_i64(exclude)?);
        }
        qb.push(" ORDER BY last_used ASC, id ASC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = qb.build().fetch_all(&self.pool).await.map_err(conn)?;
        rows.iter().map(map_question_row).collect()
    }

    async fn first_questions_for_topic(
        &self,
        topic: &TopicName,
        limit: u32,
    ) -> Result<Vec<Question>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE topic = ?1 ORDER BY id ASC LIMIT ?2"
        ))
        .bind(topic.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_question_row).collect()
    }

    async fn next_question_id(&self) -> Result<QuestionId, StorageError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM questions")
            .fetch_one(&self.pool)
            .await
            .map_err(conn)?;
        question_id_from_i64(max.unwrap_or(0) + 1)
    }
}
