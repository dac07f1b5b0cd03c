use exam_core::model::{
    Question, QuestionContent, QuestionId, QuestionKind, TopicGroup, TopicName, TopicPoolEntry,
};
use exam_core::time::from_millis;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) const QUESTION_COLUMNS: &str = "id, topic, kind, type_number, last_used, text, \
     question_content, answer_content, image, audio, answer_audio";

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// A stored row failed domain validation.
fn invalid<E: Into<exam_core::Error>>(e: E) -> StorageError {
    StorageError::Serialization(e.into().to_string())
}

pub(crate) fn question_id_to_i64(id: QuestionId) -> Result<i64, StorageError> {
    i64::try_from(id.value())
        .map_err(|_| StorageError::Serialization("question_id overflow".into()))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    u64::try_from(v)
        .map(QuestionId::new)
        .map_err(|_| StorageError::Serialization(format!("negative question_id: {v}")))
}

pub(crate) fn map_question_row(row: &SqliteRow) -> Result<Question, StorageError> {
    let kind: QuestionKind = row
        .try_get::<String, _>("kind")
        .map_err(ser)?
        .parse::<QuestionKind>()
        .map_err(invalid)?;
    let type_number_i64: i64 = row.try_get("type_number").map_err(ser)?;
    let type_number = u32::try_from(type_number_i64).map_err(|_| {
        StorageError::Serialization(format!("invalid type_number: {type_number_i64}"))
    })?;

    let content = QuestionContent {
        text: row.try_get("text").map_err(ser)?,
        question_content: row.try_get("question_content").map_err(ser)?,
        answer_content: row.try_get("answer_content").map_err(ser)?,
        image: row.try_get("image").map_err(ser)?,
        audio: row.try_get("audio").map_err(ser)?,
        answer_audio: row.try_get("answer_audio").map_err(ser)?,
    };

    Question::new(
        question_id_from_i64(row.try_get("id").map_err(ser)?)?,
        row.try_get::<String, _>("topic").map_err(ser)?,
        kind,
        type_number,
        from_millis(row.try_get("last_used").map_err(ser)?),
    )
    .map(|q| q.with_content(content))
    .map_err(invalid)
}

pub(crate) fn map_topic_row(row: &SqliteRow) -> Result<TopicPoolEntry, StorageError> {
    let group = TopicGroup::from_code(row.try_get("group_code").map_err(ser)?).map_err(invalid)?;
    let topic = TopicName::new(row.try_get::<String, _>("topic").map_err(ser)?).map_err(invalid)?;
    Ok(TopicPoolEntry::new(
        group,
        topic,
        from_millis(row.try_get("last_used").map_err(ser)?),
    ))
}
