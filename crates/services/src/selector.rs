use std::sync::Arc;

use exam_core::model::{Question, QuestionId, QuestionKind, TopicGroup, TopicName, TopicPoolEntry};
use storage::repository::{QuestionQuery, QuestionRepository, StorageError};
use tracing::{debug, warn};

use crate::error::ExamError;
use crate::rotation::TopicRotator;

/// What a topic-bound step asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRequest {
    pub kind: QuestionKind,
    pub type_number: u32,
    /// Id the answer must differ from. Set only for the second step of a
    /// linked pair.
    pub exclude: Option<QuestionId>,
}

/// Question that answered a slot and the pool entry it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMatch {
    pub topic: TopicPoolEntry,
    pub question: Question,
    pub used_fallback: bool,
}

/// Least-recently-used question lookup.
#[derive(Clone)]
pub struct QuestionSelector {
    questions: Arc<dyn QuestionRepository>,
    rotator: TopicRotator,
}

impl QuestionSelector {
    #[must_use]
    pub fn new(questions: Arc<dyn QuestionRepository>, rotator: TopicRotator) -> Self {
        Self { questions, rotator }
    }

    /// Least recently used question on `topic` with the given kind and type
    /// number, skipping `exclude`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    pub async fn select_one(
        &self,
        topic: &TopicName,
        kind: QuestionKind,
        type_number: u32,
        exclude: Option<QuestionId>,
    ) -> Result<Option<Question>, StorageError> {
        let query = QuestionQuery::slot(topic, kind, type_number)
            .excluding(exclude)
            .limit(1);
        Ok(self.questions.find_questions(&query).await?.into_iter().next())
    }

    /// Same matching as [`select_one`](Self::select_one) for the second step of
    /// a linked pair: every candidate other than `exclude` is considered and
    /// the least recently used one wins.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    pub async fn select_first_available(
        &self,
        topic: &TopicName,
        kind: QuestionKind,
        type_number: u32,
        exclude: QuestionId,
    ) -> Result<Option<Question>, StorageError> {
        let query = QuestionQuery::slot(topic, kind, type_number).excluding(Some(exclude));
        let candidates = self.questions.find_questions(&query).await?;
        debug!(%topic, candidates = candidates.len(), %exclude, "linked step candidates");
        Ok(candidates.into_iter().next())
    }

    /// Least recently used question with `type_number`, any topic.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    pub async fn select_fixed_slot(
        &self,
        type_number: u32,
    ) -> Result<Option<Question>, StorageError> {
        let query = QuestionQuery::type_number(type_number).limit(1);
        Ok(self.questions.find_questions(&query).await?.into_iter().next())
    }

    /// First question ever added under `topic`. Usage is ignored so the
    /// opening question stays the same for the whole attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    pub async fn opening_question(
        &self,
        topic: &TopicName,
    ) -> Result<Option<Question>, StorageError> {
        Ok(self
            .questions
            .first_questions_for_topic(topic, 1)
            .await?
            .into_iter()
            .next())
    }

    async fn match_slot(
        &self,
        topic: &TopicName,
        slot: SlotRequest,
    ) -> Result<Option<Question>, StorageError> {
        match slot.exclude {
            Some(exclude) => {
                self.select_first_available(topic, slot.kind, slot.type_number, exclude)
                    .await
            }
            None => {
                self.select_one(topic, slot.kind, slot.type_number, None)
                    .await
            }
        }
    }

    /// Try `current`, then at most one fallback topic of `group`.
    ///
    /// Nothing is written; the caller stamps usage once it commits.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::Storage` if the bank or pool cannot be read.
    pub async fn select_with_fallback(
        &self,
        group: TopicGroup,
        current: TopicPoolEntry,
        slot: SlotRequest,
    ) -> Result<Option<SlotMatch>, ExamError> {
        if let Some(question) = self.match_slot(current.topic(), slot).await? {
            return Ok(Some(SlotMatch {
                topic: current,
                question,
                used_fallback: false,
            }));
        }

        let Some(fallback) = self.rotator.fallback_topic(group, current.topic()).await? else {
            warn!(
                %group,
                topic = %current.topic(),
                kind = %slot.kind,
                "no match and no fallback topic"
            );
            return Ok(None);
        };
        warn!(
            %group,
            from = %current.topic(),
            to = %fallback.topic(),
            kind = %slot.kind,
            "falling back to next topic"
        );

        Ok(self
            .match_slot(fallback.topic(), slot)
            .await?
            .map(|question| SlotMatch {
                topic: fallback,
                question,
                used_fallback: true,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use exam_core::time::{fixed_now, never_used};
    use storage::repository::{InMemoryRepository, TopicPoolRepository, UsageStore};

    fn name(s: &str) -> TopicName {
        TopicName::new(s).unwrap()
    }

    async fn add_question(
        repo: &InMemoryRepository,
        id: u64,
        topic: &str,
        kind: QuestionKind,
        type_number: u32,
    ) {
        repo.upsert_question(
            &Question::new(QuestionId::new(id), topic, kind, type_number, never_used()).unwrap(),
        )
        .await
        .unwrap();
    }

    async fn add_topic(repo: &InMemoryRepository, topic: &str, offset: i64) {
        repo.upsert_topic_entry(&TopicPoolEntry::new(
            TopicGroup::Survey,
            name(topic),
            fixed_now() + Duration::seconds(offset),
        ))
        .await
        .unwrap();
    }

    fn selector(repo: &InMemoryRepository) -> QuestionSelector {
        QuestionSelector::new(
            Arc::new(repo.clone()),
            TopicRotator::new(Arc::new(repo.clone())),
        )
    }

    fn long_slot(exclude: Option<QuestionId>) -> SlotRequest {
        SlotRequest {
            kind: QuestionKind::Long,
            type_number: 0,
            exclude,
        }
    }

    #[tokio::test]
    async fn select_one_skips_excluded_id() {
        let repo = InMemoryRepository::new();
        add_question(&repo, 1, "food", QuestionKind::Long, 0).await;
        add_question(&repo, 2, "food", QuestionKind::Long, 0).await;
        let selector = selector(&repo);

        let q = selector
            .select_one(&name("food"), QuestionKind::Long, 0, Some(QuestionId::new(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(q.id(), QuestionId::new(2));

        let none = selector
            .select_first_available(&name("food"), QuestionKind::Short, 0, QuestionId::new(1))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn fixed_slot_ignores_topic() {
        let repo = InMemoryRepository::new();
        add_question(&repo, 1, "food", QuestionKind::Long, 13).await;
        add_question(&repo, 2, "travel", QuestionKind::Short, 13).await;
        repo.touch_question(QuestionId::new(1), fixed_now()).await.unwrap();

        let q = selector(&repo).select_fixed_slot(13).await.unwrap().unwrap();
        assert_eq!(q.id(), QuestionId::new(2));
    }

    #[tokio::test]
    async fn opening_question_uses_insertion_order() {
        let repo = InMemoryRepository::new();
        add_question(&repo, 4, "intro", QuestionKind::Long, 0).await;
        add_question(&repo, 3, "intro", QuestionKind::Short, 0).await;
        repo.touch_question(QuestionId::new(3), fixed_now()).await.unwrap();

        let q = selector(&repo)
            .opening_question(&name("intro"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(q.id(), QuestionId::new(3));
    }

    #[tokio::test]
    async fn falls_back_one_topic_only() {
        let repo = InMemoryRepository::new();
        add_topic(&repo, "a", 0).await;
        add_topic(&repo, "b", 1).await;
        add_topic(&repo, "c", 2).await;
        add_question(&repo, 1, "c", QuestionKind::Long, 0).await;
        let selector = selector(&repo);

        let pool = repo_pool(&repo).await;
        let from_a = selector
            .select_with_fallback(TopicGroup::Survey, pool[0].clone(), long_slot(None))
            .await
            .unwrap();
        assert!(from_a.is_none());

        let from_b = selector
            .select_with_fallback(TopicGroup::Survey, pool[1].clone(), long_slot(None))
            .await
            .unwrap()
            .unwrap();
        assert!(from_b.used_fallback);
        assert_eq!(from_b.topic.topic().as_str(), "c");
        assert_eq!(from_b.question.id(), QuestionId::new(1));
    }

    #[tokio::test]
    async fn exclusion_can_push_to_fallback() {
        let repo = InMemoryRepository::new();
        add_topic(&repo, "a", 0).await;
        add_topic(&repo, "b", 1).await;
        add_question(&repo, 1, "a", QuestionKind::Long, 0).await;
        add_question(&repo, 2, "b", QuestionKind::Long, 0).await;
        let selector = selector(&repo);

        let pool = repo_pool(&repo).await;
        let found = selector
            .select_with_fallback(
                TopicGroup::Survey,
                pool[0].clone(),
                long_slot(Some(QuestionId::new(1))),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.question.id(), QuestionId::new(2));
        assert_eq!(found.topic.topic().as_str(), "b");
    }

    async fn repo_pool(repo: &InMemoryRepository) -> Vec<TopicPoolEntry> {
        repo.least_recently_used_topics(TopicGroup::Survey)
            .await
            .unwrap()
    }
}
