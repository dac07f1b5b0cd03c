use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    Question, QuestionId, QuestionKind, TopicGroup, TopicName, TopicPoolEntry,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::artifacts::{self, ArtifactRepository};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

//
// ─── QUERIES ───────────────────────────────────────────────────────────────────
//

/// Field-equality filter over the question bank.
///
/// Every adapter returns matches least-recently-used first, breaking ties by
/// ascending id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionQuery {
    pub topic: Option<TopicName>,
    pub kind: Option<QuestionKind>,
    pub type_number: Option<u32>,
    pub exclude: Option<QuestionId>,
    pub limit: Option<u32>,
}

impl QuestionQuery {
    /// Rotating slot on one topic.
    #[must_use]
    pub fn slot(topic: &TopicName, kind: QuestionKind, type_number: u32) -> Self {
        Self {
            topic: Some(topic.clone()),
            kind: Some(kind),
            type_number: Some(type_number),
            ..Self::default()
        }
    }

    /// Fixed slot across the whole bank.
    #[must_use]
    pub fn type_number(type_number: u32) -> Self {
        Self {
            type_number: Some(type_number),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn excluding(mut self, id: Option<QuestionId>) -> Self {
        self.exclude = id;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn matches(&self, question: &Question) -> bool {
        self.topic.as_ref().is_none_or(|t| question.topic() == t)
            && self.kind.is_none_or(|k| question.kind() == k)
            && self.type_number.is_none_or(|n| question.type_number() == n)
            && self.exclude.is_none_or(|id| question.id() != id)
    }
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Read side of the question bank.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Persist or replace a question.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the question cannot be stored.
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError>;

    /// Fetch a question by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_question(&self, id: QuestionId) -> Result<Question, StorageError>;

    /// Questions matching `query`, least recently used first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    async fn find_questions(&self, query: &QuestionQuery) -> Result<Vec<Question>, StorageError>;

    /// Questions of a topic in insertion order, ignoring usage.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    async fn first_questions_for_topic(
        &self,
        topic: &TopicName,
        limit: u32,
    ) -> Result<Vec<Question>, StorageError>;

    /// Id one past the highest stored id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    async fn next_question_id(&self) -> Result<QuestionId, StorageError>;
}

/// Write side of the topic pools.
#[async_trait]
pub trait TopicPoolRepository: Send + Sync {
    /// Insert a pool entry, or overwrite `last_used` if `(group, topic)` exists.
    /// New entries are ordered after every existing entry of the group.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the entry cannot be stored.
    async fn upsert_topic_entry(&self, entry: &TopicPoolEntry) -> Result<(), StorageError>;
}

/// Shared "last used" bookkeeping, visible to every exam session.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Pool entries of `group` ascending by `last_used`, ties in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store is unavailable.
    async fn least_recently_used_topics(
        &self,
        group: TopicGroup,
    ) -> Result<Vec<TopicPoolEntry>, StorageError>;

    /// Stamp a pool entry as used at `now`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the entry does not exist.
    async fn touch_topic(
        &self,
        group: TopicGroup,
        topic: &TopicName,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Stamp a question as used at `now`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the question does not exist.
    async fn touch_question(&self, id: QuestionId, now: DateTime<Utc>)
    -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

/// In-memory repository for tests and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    questions: Arc<Mutex<BTreeMap<QuestionId, Question>>>,
    topics: Arc<Mutex<Vec<TopicPoolEntry>>>,
    artifacts: Arc<Mutex<Vec<String>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl QuestionRepository for InMemoryRepository {
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let mut guard = self.questions.lock().map_err(poisoned)?;
        guard.insert(question.id(), question.clone());
        Ok(())
    }

    async fn get_question(&self, id: QuestionId) -> Result<Question, StorageError> {
        let guard = self.questions.lock().map_err(poisoned)?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn find_questions(&self, query: &QuestionQuery) -> Result<Vec<Question>, StorageError> {
        let guard = self.questions.lock().map_err(poisoned)?;
        // BTreeMap iterates by id, so the stable sort keeps id as tiebreaker.
        let mut found: Vec<Question> = guard
            .values()
            .filter(|q| query.matches(q))
            .cloned()
            .collect();
        found.sort_by_key(Question::last_used);
        if let Some(limit) = query.limit {
            found.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(found)
    }

    async fn first_questions_for_topic(
        &self,
        topic: &TopicName,
        limit: u32,
    ) -> Result<Vec<Question>, StorageError> {
        let guard = self.questions.lock().map_err(poisoned)?;
        Ok(guard
            .values()
            .filter(|q| q.topic() == topic)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn next_question_id(&self) -> Result<QuestionId, StorageError> {
        let guard = self.questions.lock().map_err(poisoned)?;
        let next = guard.keys().next_back().map_or(1, |id| id.value() + 1);
        Ok(QuestionId::new(next))
    }
}

#[async_trait]
impl TopicPoolRepository for InMemoryRepository {
    async fn upsert_topic_entry(&self, entry: &TopicPoolEntry) -> Result<(), StorageError> {
        let mut guard = self.topics.lock().map_err(poisoned)?;
        match guard
            .iter_mut()
            .find(|e| e.group() == entry.group() && e.topic() == entry.topic())
        {
            Some(existing) => *existing = entry.clone(),
            None => guard.push(entry.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl UsageStore for InMemoryRepository {
    async fn least_recently_used_topics(
        &self,
        group: TopicGroup,
    ) -> Result<Vec<TopicPoolEntry>, StorageError> {
        let guard = self.topics.lock().map_err(poisoned)?;
        let mut pool: Vec<TopicPoolEntry> =
            guard.iter().filter(|e| e.group() == group).cloned().collect();
        pool.sort_by_key(TopicPoolEntry::last_used);
        Ok(pool)
    }

    async fn touch_topic(
        &self,
        group: TopicGroup,
        topic: &TopicName,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = self.topics.lock().map_err(poisoned)?;
        let entry = guard
            .iter_mut()
            .find(|e| e.group() == group && e.topic() == topic)
            .ok_or(StorageError::NotFound)?;
        entry.mark_used(now);
        Ok(())
    }

    async fn touch_question(
        &self,
        id: QuestionId,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = self.questions.lock().map_err(poisoned)?;
        let question = guard.get_mut(&id).ok_or(StorageError::NotFound)?;
        question.mark_used(now);
        Ok(())
    }
}

#[async_trait]
impl ArtifactRepository for InMemoryRepository {
    async fn record_artifact(&self, at: DateTime<Utc>) -> Result<String, StorageError> {
        let mut guard = self.artifacts.lock().map_err(poisoned)?;
        let name = artifacts::unique_artifact_name(at, |candidate| {
            guard.iter().any(|existing| existing == candidate)
        });
        guard.push(name.clone());
        Ok(name)
    }

    async fn list_artifacts(&self) -> Result<Vec<String>, StorageError> {
        let guard = self.artifacts.lock().map_err(poisoned)?;
        Ok(artifacts::chronological(guard.iter().cloned()))
    }

    async fn clear_artifacts(&self) -> Result<usize, StorageError> {
        let mut guard = self.artifacts.lock().map_err(poisoned)?;
        let removed = guard.len();
        guard.clear();
        Ok(removed)
    }
}

//
// ─── AGGREGATE ─────────────────────────────────────────────────────────────────
//

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub questions: Arc<dyn QuestionRepository>,
    pub topics: Arc<dyn TopicPoolRepository>,
    pub usage: Arc<dyn UsageStore>,
    pub artifacts: Arc<dyn ArtifactRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            questions: Arc::new(repo.clone()),
            topics: Arc::new(repo.clone()),
            usage: Arc::new(repo.clone()),
            artifacts: Arc::new(repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use exam_core::time::{fixed_now, never_used};

    fn question(id: u64, topic: &str, kind: QuestionKind, last_used: DateTime<Utc>) -> Question {
        Question::new(QuestionId::new(id), topic, kind, 0, last_used).unwrap()
    }

    fn entry(group: TopicGroup, topic: &str, last_used: DateTime<Utc>) -> TopicPoolEntry {
        TopicPoolEntry::new(group, TopicName::new(topic).unwrap(), last_used)
    }

    #[tokio::test]
    async fn find_orders_by_last_used_then_id() {
        let repo = InMemoryRepository::new();
        let now = fixed_now();
        repo.upsert_question(&question(3, "travel", QuestionKind::Long, never_used()))
            .await
            .unwrap();
        repo.upsert_question(&question(1, "travel", QuestionKind::Long, now))
            .await
            .unwrap();
        repo.upsert_question(&question(2, "travel", QuestionKind::Long, never_used()))
            .await
            .unwrap();
        repo.upsert_question(&question(4, "travel", QuestionKind::Short, never_used()))
            .await
            .unwrap();

        let topic = TopicName::new("travel").unwrap();
        let found = repo
            .find_questions(&QuestionQuery::slot(&topic, QuestionKind::Long, 0))
            .await
            .unwrap();
        let ids: Vec<u64> = found.iter().map(|q| q.id().value()).collect();
        assert_eq!(ids, vec![2, 3, 1]);

        let excluded = repo
            .find_questions(
                &QuestionQuery::slot(&topic, QuestionKind::Long, 0)
                    .excluding(Some(QuestionId::new(2)))
                    .limit(1),
            )
            .await
            .unwrap();
        assert_eq!(excluded[0].id(), QuestionId::new(3));
        assert_eq!(excluded.len(), 1);
    }

    #[tokio::test]
    async fn topic_ties_keep_insertion_order() {
        let repo = InMemoryRepository::new();
        let now = fixed_now();
        for name in ["b", "a", "c"] {
            repo.upsert_topic_entry(&entry(TopicGroup::Survey, name, now))
                .await
                .unwrap();
        }
        repo.upsert_topic_entry(&entry(TopicGroup::RolePlay, "a", never_used()))
            .await
            .unwrap();

        let pool = repo
            .least_recently_used_topics(TopicGroup::Survey)
            .await
            .unwrap();
        let names: Vec<&str> = pool.iter().map(|e| e.topic().as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);

        repo.touch_topic(
            TopicGroup::Survey,
            &TopicName::new("b").unwrap(),
            now + Duration::seconds(1),
        )
        .await
        .unwrap();
        let pool = repo
            .least_recently_used_topics(TopicGroup::Survey)
            .await
            .unwrap();
        let names: Vec<&str> = pool.iter().map(|e| e.topic().as_str()).collect();
        assert_eq!(names, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn touching_unknown_entities_is_not_found() {
        let repo = InMemoryRepository::new();
        let err = repo
            .touch_question(QuestionId::new(7), fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));

        let err = repo
            .touch_topic(TopicGroup::Opening, &TopicName::new("x").unwrap(), fixed_now())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn next_id_follows_highest() {
        let repo = InMemoryRepository::new();
        assert_eq!(repo.next_question_id().await.unwrap(), QuestionId::new(1));
        repo.upsert_question(&question(9, "x", QuestionKind::Short, never_used()))
            .await
            .unwrap();
        assert_eq!(repo.next_question_id().await.unwrap(), QuestionId::new(10));
    }
}
