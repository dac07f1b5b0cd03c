//! Bulk import of a question bank document.

use exam_core::model::{
    Question, QuestionContent, QuestionId, QuestionKind, TopicGroup, TopicName, TopicPoolEntry,
};
use exam_core::time::never_used;
use serde::Deserialize;
use tracing::info;

use crate::repository::{Storage, StorageError};

/// Serialized bank, e.g.
///
/// ```json
/// {
///   "topics": [{ "group": 2, "topic": "travel" }],
///   "questions": [{ "topic": "travel", "kind": "I", "type_number": 0, "text": "..." }]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionBank {
    #[serde(default)]
    pub topics: Vec<BankTopic>,
    #[serde(default)]
    pub questions: Vec<BankQuestion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BankTopic {
    pub group: TopicGroup,
    pub topic: TopicName,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BankQuestion {
    #[serde(default)]
    pub id: Option<QuestionId>,
    pub topic: TopicName,
    pub kind: QuestionKind,
    #[serde(default)]
    pub type_number: u32,
    #[serde(flatten)]
    pub content: QuestionContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub topics: usize,
    pub questions: usize,
}

/// Write every entry of `bank` with a fresh (never used) stamp.
///
/// Questions without an explicit id are numbered after the current maximum, in
/// document order. Re-importing an existing entry resets its usage.
///
/// # Errors
///
/// Returns `StorageError` on the first write that fails; earlier writes stay.
pub async fn import_bank(
    storage: &Storage,
    bank: QuestionBank,
) -> Result<ImportReport, StorageError> {
    for topic in &bank.topics {
        storage
            .topics
            .upsert_topic_entry(&TopicPoolEntry::new(
                topic.group,
                topic.topic.clone(),
                never_used(),
            ))
            .await?;
    }

    let mut next_id = storage.questions.next_question_id().await?;
    for entry in &bank.questions {
        let id = match entry.id {
            Some(id) => id,
            None => {
                let id = next_id;
                next_id = QuestionId::new(id.value() + 1);
                id
            }
        };
        if id >= next_id {
            next_id = QuestionId::new(id.value() + 1);
        }
        let question = Question::new(
            id,
            entry.topic.as_str(),
            entry.kind,
            entry.type_number,
            never_used(),
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))?
        .with_content(entry.content.clone());
        storage.questions.upsert_question(&question).await?;
    }

    let report = ImportReport {
        topics: bank.topics.len(),
        questions: bank.questions.len(),
    };
    info!(topics = report.topics, questions = report.questions, "imported question bank");
    Ok(report)
}
