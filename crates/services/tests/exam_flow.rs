use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use exam_core::model::{
    ExamPhase, Question, QuestionId, QuestionKind, SessionState, TopicGroup, TopicName,
    TopicPoolEntry,
};
use exam_core::plan::{GroupSpan, StepIndex};
use exam_core::time::{fixed_now, never_used};
use services::{Clock, ExamController, ExamError};
use storage::Storage;
use storage::artifacts::ArtifactRepository;
use storage::repository::{
    InMemoryRepository, QuestionQuery, QuestionRepository, StorageError, TopicPoolRepository,
    UsageStore,
};

fn name(s: &str) -> TopicName {
    TopicName::new(s).unwrap()
}

async fn add_topic(storage: &Storage, group: TopicGroup, topic: &str, last_used: DateTime<Utc>) {
    storage
        .topics
        .upsert_topic_entry(&TopicPoolEntry::new(group, name(topic), last_used))
        .await
        .unwrap();
}

async fn add_question(
    storage: &Storage,
    id: u64,
    topic: &str,
    kind: QuestionKind,
    type_number: u32,
) {
    let question =
        Question::new(QuestionId::new(id), topic, kind, type_number, never_used()).unwrap();
    storage.questions.upsert_question(&question).await.unwrap();
}

fn controller(storage: &Storage) -> ExamController {
    ExamController::from_storage(Clock::fixed(fixed_now()), storage)
}

/// Opening pool with one topic and a single question (id 1).
async fn with_opening(storage: &Storage) {
    add_topic(storage, TopicGroup::Opening, "intro", never_used()).await;
    add_question(storage, 1, "intro", QuestionKind::Short, 0).await;
}

/// Every question and pool entry, for before/after comparisons.
async fn snapshot(storage: &Storage) -> (Vec<Question>, Vec<TopicPoolEntry>) {
    let questions = storage
        .questions
        .find_questions(&QuestionQuery::default())
        .await
        .unwrap();
    let mut topics = Vec::new();
    for group in TopicGroup::ALL {
        topics.extend(storage.usage.least_recently_used_topics(group).await.unwrap());
    }
    (questions, topics)
}

/// A complete bank: three survey topics, two role-play topics, fixed slots.
///
/// Each topic has short questions `id` and `id + 3` and long ones `id + 1`
/// and `id + 2`.
async fn full_bank() -> Storage {
    let storage = Storage::in_memory();
    with_opening(&storage).await;

    let mut id = 10;
    for (group, topic) in [
        (TopicGroup::Survey, "travel"),
        (TopicGroup::Survey, "food"),
        (TopicGroup::Survey, "music"),
        (TopicGroup::RolePlay, "bank"),
        (TopicGroup::RolePlay, "hotel"),
    ] {
        add_topic(&storage, group, topic, never_used()).await;
        add_question(&storage, id, topic, QuestionKind::Short, 0).await;
        add_question(&storage, id + 1, topic, QuestionKind::Long, 0).await;
        add_question(&storage, id + 2, topic, QuestionKind::Long, 0).await;
        add_question(&storage, id + 3, topic, QuestionKind::Short, 0).await;
        id += 10;
    }
    for slot in 11..=15 {
        add_question(&storage, 100 + u64::from(slot), "misc", QuestionKind::Long, slot).await;
    }
    storage
}

#[tokio::test]
async fn full_exam_serves_fifteen_steps() {
    let storage = full_bank().await;
    let controller = controller(&storage);
    let mut session = SessionState::new();

    let start = controller.start_exam(&mut session).await.unwrap();
    assert_eq!(start.topic, name("intro"));
    assert_eq!(start.question.id(), QuestionId::new(1));

    let mut served = Vec::new();
    let mut step = 1;
    loop {
        let question = controller.get_step(&mut session, step).await.unwrap();
        controller.record_answer(&session).await.unwrap();
        served.push(question);
        if step == 15 {
            break;
        }
        step = i64::from(controller.advance(&mut session, step).unwrap().get());
    }

    assert_eq!(served.len(), 15);
    for (first, second) in [(3, 4), (6, 7), (9, 10)] {
        assert_ne!(served[first - 1].id(), served[second - 1].id());
    }

    // Steps 2-4 and 5-7 read the same pool but keep their own topic.
    let first_span = served[1].topic().clone();
    let second_span = served[4].topic().clone();
    assert!(served[1..4].iter().all(|q| *q.topic() == first_span));
    assert!(served[4..7].iter().all(|q| *q.topic() == second_span));
    assert_ne!(first_span, second_span);
    assert!(served[7..10].iter().all(|q| q.topic().as_str() == "bank"));

    for (offset, question) in served[10..].iter().enumerate() {
        assert_eq!(question.type_number(), 11 + u32::try_from(offset).unwrap());
    }

    let summary = controller.finish_exam(&mut session).await.unwrap();
    assert_eq!(summary.artifacts.len(), 15);
    assert_eq!(session.phase(), ExamPhase::Finished);
}

#[tokio::test]
async fn first_visits_rotate_through_every_topic() {
    let storage = Storage::in_memory();
    with_opening(&storage).await;
    for (id, topic) in [(10, "travel"), (20, "food"), (30, "music")] {
        add_topic(&storage, TopicGroup::Survey, topic, never_used()).await;
        add_question(&storage, id, topic, QuestionKind::Short, 0).await;
    }

    let base = controller(&storage);
    let mut seen = Vec::new();
    for attempt in 0..3 {
        let controller = base
            .clone()
            .with_clock(Clock::fixed(fixed_now() + Duration::minutes(attempt)));
        let mut session = SessionState::new();
        controller.start_exam(&mut session).await.unwrap();
        let question = controller.get_step(&mut session, 2).await.unwrap();
        seen.push(question.topic().clone());
    }

    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 3);
}

#[tokio::test]
async fn failed_step_leaves_usage_untouched() {
    let storage = Storage::in_memory();
    with_opening(&storage).await;
    add_topic(&storage, TopicGroup::Survey, "travel", never_used()).await;
    add_question(&storage, 10, "travel", QuestionKind::Long, 0).await;

    let controller = controller(&storage);
    let mut session = SessionState::new();
    controller.start_exam(&mut session).await.unwrap();

    let before = snapshot(&storage).await;
    let session_before = session.clone();
    let err = controller.get_step(&mut session, 2).await.unwrap_err();

    assert!(matches!(err, ExamError::QuestionNotFound { step } if step.get() == 2));
    assert_eq!(snapshot(&storage).await, before);
    assert_eq!(session, session_before);
}

#[tokio::test]
async fn missing_slot_falls_back_to_next_topic() {
    let storage = Storage::in_memory();
    with_opening(&storage).await;
    add_topic(&storage, TopicGroup::Survey, "a", never_used()).await;
    add_topic(&storage, TopicGroup::Survey, "b", fixed_now() - Duration::days(1)).await;
    add_question(&storage, 10, "a", QuestionKind::Long, 0).await;
    add_question(&storage, 20, "b", QuestionKind::Short, 0).await;
    add_question(&storage, 21, "b", QuestionKind::Long, 0).await;

    let controller = controller(&storage);
    let mut session = SessionState::new();
    controller.start_exam(&mut session).await.unwrap();

    let question = controller.get_step(&mut session, 2).await.unwrap();
    assert_eq!(question.id(), QuestionId::new(20));
    assert_eq!(session.sticky_topic(GroupSpan::First), Some(&name("b")));

    // "a" is now the least recently used entry, but the span stays on "b".
    let question = controller.get_step(&mut session, 4).await.unwrap();
    assert_eq!(question.id(), QuestionId::new(21));
}

#[tokio::test]
async fn step_two_takes_least_recently_used_topic() {
    let storage = Storage::in_memory();
    with_opening(&storage).await;
    add_topic(&storage, TopicGroup::Survey, "travel", fixed_now() - Duration::days(2)).await;
    add_topic(&storage, TopicGroup::Survey, "food", fixed_now() - Duration::days(1)).await;
    add_question(&storage, 10, "travel", QuestionKind::Short, 0).await;

    let controller = controller(&storage);
    let mut session = SessionState::new();
    controller.start_exam(&mut session).await.unwrap();

    let question = controller.get_step(&mut session, 2).await.unwrap();
    assert_eq!(question.id(), QuestionId::new(10));
    assert_eq!(session.sticky_topic(GroupSpan::First), Some(&name("travel")));

    let pool = storage
        .usage
        .least_recently_used_topics(TopicGroup::Survey)
        .await
        .unwrap();
    let travel = pool.iter().find(|e| e.topic().as_str() == "travel").unwrap();
    assert_eq!(travel.last_used(), fixed_now());
}

#[tokio::test]
async fn opening_question_repeats_within_attempt() {
    let storage = Storage::in_memory();
    with_opening(&storage).await;
    add_question(&storage, 2, "intro", QuestionKind::Short, 0).await;

    let controller = controller(&storage);
    let mut session = SessionState::new();
    let start = controller.start_exam(&mut session).await.unwrap();

    let first = controller.get_step(&mut session, 1).await.unwrap();
    let second = controller.get_step(&mut session, 1).await.unwrap();
    assert_eq!(first.id(), start.question.id());
    assert_eq!(second.id(), start.question.id());
}

#[tokio::test]
async fn out_of_range_steps_are_rejected_without_writes() {
    let storage = full_bank().await;
    let controller = controller(&storage);
    let mut session = SessionState::new();
    controller.start_exam(&mut session).await.unwrap();

    let before = snapshot(&storage).await;
    for step in [0, 16, -1] {
        let err = controller.get_step(&mut session, step).await.unwrap_err();
        assert!(matches!(err, ExamError::InvalidStep { step: s } if s == step));
    }
    assert_eq!(snapshot(&storage).await, before);

    let err = controller.advance(&mut session, 15).unwrap_err();
    assert!(matches!(err, ExamError::InvalidStep { step: 16 }));
    assert_eq!(session.current_step(), Some(StepIndex::FIRST));
}

#[tokio::test]
async fn calls_before_start_are_rejected() {
    let storage = full_bank().await;
    let controller = controller(&storage);
    let mut session = SessionState::new();

    assert!(matches!(
        controller.get_step(&mut session, 2).await,
        Err(ExamError::SessionNotStarted)
    ));
    assert!(matches!(
        controller.advance(&mut session, 1),
        Err(ExamError::SessionNotStarted)
    ));
    assert!(matches!(
        controller.record_answer(&session).await,
        Err(ExamError::SessionNotStarted)
    ));
    assert!(matches!(
        controller.finish_exam(&mut session).await,
        Err(ExamError::SessionNotStarted)
    ));
}

#[tokio::test]
async fn returning_to_step_one_forgets_first_span_topic() {
    let storage = full_bank().await;
    let controller = controller(&storage);
    let mut session = SessionState::new();
    controller.start_exam(&mut session).await.unwrap();

    controller.get_step(&mut session, 2).await.unwrap();
    controller.get_step(&mut session, 5).await.unwrap();
    assert!(session.sticky_topic(GroupSpan::First).is_some());

    let next = controller.advance(&mut session, 0).unwrap();
    assert_eq!(next, StepIndex::FIRST);
    assert!(session.sticky_topic(GroupSpan::First).is_none());
    assert!(session.sticky_topic(GroupSpan::Second).is_some());
}

#[tokio::test]
async fn linked_step_never_repeats_its_partner() {
    let storage = Storage::in_memory();
    with_opening(&storage).await;
    add_topic(&storage, TopicGroup::RolePlay, "bank", never_used()).await;
    add_topic(&storage, TopicGroup::RolePlay, "hotel", fixed_now() - Duration::days(1)).await;
    add_question(&storage, 10, "bank", QuestionKind::Short, 0).await;
    add_question(&storage, 11, "bank", QuestionKind::Long, 0).await;
    add_question(&storage, 20, "hotel", QuestionKind::Long, 0).await;

    let controller = controller(&storage);
    let mut session = SessionState::new();
    controller.start_exam(&mut session).await.unwrap();

    let nine = controller.get_step(&mut session, 9).await.unwrap();
    assert_eq!(nine.id(), QuestionId::new(11));
    assert_eq!(session.linked_question(GroupSpan::Third), Some(QuestionId::new(11)));

    // "bank" was just stamped, so it sorts last and offers no fallback hop.
    let before = snapshot(&storage).await;
    let err = controller.get_step(&mut session, 10).await.unwrap_err();
    assert!(matches!(err, ExamError::QuestionNotFound { step } if step.get() == 10));
    assert_eq!(snapshot(&storage).await, before);
    assert_eq!(session.sticky_topic(GroupSpan::Third), Some(&name("bank")));
}

#[tokio::test]
async fn linked_step_prefers_the_other_candidate() {
    let storage = full_bank().await;
    let controller = controller(&storage);
    let mut session = SessionState::new();
    controller.start_exam(&mut session).await.unwrap();

    // Serve step 7 first so the partner id is unset, then walk 6 -> 7.
    let early = controller.get_step(&mut session, 7).await.unwrap();
    let six = controller.get_step(&mut session, 6).await.unwrap();
    let seven = controller.get_step(&mut session, 7).await.unwrap();

    assert_eq!(early.id(), QuestionId::new(11));
    assert_eq!(six.id(), QuestionId::new(12));
    assert_ne!(seven.id(), six.id());
    assert_eq!(seven.id(), QuestionId::new(11));
}

#[tokio::test]
async fn first_span_serves_two_short_questions_then_a_long_one() {
    let storage = Storage::in_memory();
    with_opening(&storage).await;
    add_topic(&storage, TopicGroup::Survey, "travel", never_used()).await;
    add_question(&storage, 10, "travel", QuestionKind::Short, 0).await;
    add_question(&storage, 11, "travel", QuestionKind::Short, 0).await;
    add_question(&storage, 12, "travel", QuestionKind::Long, 0).await;

    let controller = controller(&storage);
    let mut session = SessionState::new();
    controller.start_exam(&mut session).await.unwrap();

    let mut served = Vec::new();
    for step in 2..=4 {
        let question = controller.get_step(&mut session, step).await.unwrap();
        served.push((question.id().value(), question.kind()));
    }

    assert_eq!(
        served,
        vec![
            (10, QuestionKind::Short),
            (11, QuestionKind::Short),
            (12, QuestionKind::Long),
        ]
    );
    assert_eq!(session.linked_question(GroupSpan::First), Some(QuestionId::new(11)));
    assert_eq!(session.sticky_topic(GroupSpan::First), Some(&name("travel")));
}

#[tokio::test]
async fn empty_pool_is_reported() {
    let storage = Storage::in_memory();
    let controller = controller(&storage);
    let mut session = SessionState::new();

    let err = controller.start_exam(&mut session).await.unwrap_err();
    assert!(matches!(
        err,
        ExamError::PoolExhausted {
            group: TopicGroup::Opening
        }
    ));
    assert_eq!(session.phase(), ExamPhase::NotStarted);
}

#[tokio::test]
async fn finish_lists_recordings_in_order() {
    let storage = full_bank().await;
    let base = controller(&storage);
    let mut session = SessionState::new();
    base.start_exam(&mut session).await.unwrap();

    let later = base
        .clone()
        .with_clock(Clock::fixed(fixed_now() + Duration::seconds(30)));
    let second = later.record_answer(&session).await.unwrap();
    let first = base.record_answer(&session).await.unwrap();

    let summary = base.finish_exam(&mut session).await.unwrap();
    assert_eq!(summary.artifacts, vec![first, second]);
    assert_eq!(summary.started_at, Some(fixed_now()));

    // A new attempt starts from an empty catalog.
    base.start_exam(&mut session).await.unwrap();
    assert!(storage.artifacts.list_artifacts().await.unwrap().is_empty());
}

/// Usage store that is always down.
struct UnavailableUsage;

#[async_trait]
impl UsageStore for UnavailableUsage {
    async fn least_recently_used_topics(
        &self,
        _group: TopicGroup,
    ) -> Result<Vec<TopicPoolEntry>, StorageError> {
        Err(StorageError::Connection("store unavailable".into()))
    }

    async fn touch_topic(
        &self,
        _group: TopicGroup,
        _topic: &TopicName,
        _now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        Err(StorageError::Connection("store unavailable".into()))
    }

    async fn touch_question(
        &self,
        _id: QuestionId,
        _now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        Err(StorageError::Connection("store unavailable".into()))
    }
}

#[tokio::test]
async fn store_failures_surface_unchanged() {
    let repo = InMemoryRepository::new();
    let controller = ExamController::new(
        Clock::fixed(fixed_now()),
        Arc::new(repo.clone()),
        Arc::new(UnavailableUsage),
        Arc::new(repo),
    );
    let mut session = SessionState::new();

    let err = controller.start_exam(&mut session).await.unwrap_err();
    assert!(matches!(err, ExamError::Storage(StorageError::Connection(_))));
    assert_eq!(session.phase(), ExamPhase::NotStarted);
}

/// Reads pass through to `inner`; every stamp fails.
struct StampingFails {
    inner: InMemoryRepository,
}

#[async_trait]
impl UsageStore for StampingFails {
    async fn least_recently_used_topics(
        &self,
        group: TopicGroup,
    ) -> Result<Vec<TopicPoolEntry>, StorageError> {
        self.inner.least_recently_used_topics(group).await
    }

    async fn touch_topic(
        &self,
        _group: TopicGroup,
        _topic: &TopicName,
        _now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        Err(StorageError::Connection("store unavailable".into()))
    }

    async fn touch_question(
        &self,
        _id: QuestionId,
        _now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        Err(StorageError::Connection("store unavailable".into()))
    }
}

#[tokio::test]
async fn failed_start_keeps_earlier_recordings() {
    let repo = InMemoryRepository::new();
    repo.upsert_topic_entry(&TopicPoolEntry::new(
        TopicGroup::Opening,
        name("intro"),
        never_used(),
    ))
    .await
    .unwrap();
    let opening =
        Question::new(QuestionId::new(1), "intro", QuestionKind::Short, 0, never_used()).unwrap();
    repo.upsert_question(&opening).await.unwrap();
    let kept = repo.record_artifact(fixed_now()).await.unwrap();

    let controller = ExamController::new(
        Clock::fixed(fixed_now()),
        Arc::new(repo.clone()),
        Arc::new(StampingFails {
            inner: repo.clone(),
        }),
        Arc::new(repo.clone()),
    );
    let mut session = SessionState::new();

    let err = controller.start_exam(&mut session).await.unwrap_err();
    assert!(matches!(err, ExamError::Storage(StorageError::Connection(_))));
    assert_eq!(session.phase(), ExamPhase::NotStarted);
    assert_eq!(repo.list_artifacts().await.unwrap(), vec![kept]);
}
