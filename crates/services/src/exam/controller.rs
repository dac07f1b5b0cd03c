use std::sync::Arc;

use exam_core::Clock;
use exam_core::model::{
    Question, QuestionId, QuestionKind, ROTATING_TYPE_NUMBER, SessionState, TopicGroup, TopicName,
};
use exam_core::plan::{GroupSpan, LinkRole, StepIndex, StepRule};
use storage::Storage;
use storage::artifacts::ArtifactRepository;
use storage::repository::{QuestionRepository, UsageStore};
use tracing::{debug, info, warn};

use super::outcome::{ExamStart, ExamSummary};
use crate::error::ExamError;
use crate::rotation::TopicRotator;
use crate::selector::{QuestionSelector, SlotRequest};

/// Session changes a successful step applies after stamping usage.
#[derive(Debug, Default)]
struct StepCommit {
    topic: Option<(TopicGroup, TopicName)>,
    sticky: Option<(GroupSpan, TopicName)>,
    reserve: Option<(GroupSpan, QuestionId)>,
}

/// Runs an exam one step at a time.
///
/// Every step is staged first: selection only reads from storage, and usage
/// stamps plus session changes are applied once a question has been found.
#[derive(Clone)]
pub struct ExamController {
    clock: Clock,
    rotator: TopicRotator,
    selector: QuestionSelector,
    usage: Arc<dyn UsageStore>,
    artifacts: Arc<dyn ArtifactRepository>,
}

impl ExamController {
    #[must_use]
    pub fn new(
        clock: Clock,
        questions: Arc<dyn QuestionRepository>,
        usage: Arc<dyn UsageStore>,
        artifacts: Arc<dyn ArtifactRepository>,
    ) -> Self {
        let rotator = TopicRotator::new(Arc::clone(&usage));
        let selector = QuestionSelector::new(questions, rotator.clone());
        Self {
            clock,
            rotator,
            selector,
            usage,
            artifacts,
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: &Storage) -> Self {
        Self::new(
            clock,
            Arc::clone(&storage.questions),
            Arc::clone(&storage.usage),
            Arc::clone(&storage.artifacts),
        )
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Start (or restart) an attempt and serve step 1.
    ///
    /// Recordings left by earlier attempts are dropped only after the opening
    /// question and topic have been stamped.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::PoolExhausted` if the opening pool is empty and
    /// `ExamError::QuestionNotFound` if its topic has no questions.
    pub async fn start_exam(&self, session: &mut SessionState) -> Result<ExamStart, ExamError> {
        let entry = self.rotator.select_topic(TopicGroup::Opening, None).await?;
        let Some(question) = self.selector.opening_question(entry.topic()).await? else {
            warn!(topic = %entry.topic(), "opening topic has no questions");
            return Err(ExamError::QuestionNotFound {
                step: StepIndex::FIRST,
            });
        };

        let now = self.clock.now();
        self.usage.touch_question(question.id(), now).await?;
        self.usage
            .touch_topic(TopicGroup::Opening, entry.topic(), now)
            .await?;
        let cleared = self.artifacts.clear_artifacts().await?;
        session.begin(entry.topic().clone(), now);
        info!(
            topic = %entry.topic(),
            question = %question.id(),
            cleared_recordings = cleared,
            "exam started"
        );

        Ok(ExamStart {
            topic: entry.topic().clone(),
            question,
        })
    }

    /// Serve the question for `step`.
    ///
    /// # Errors
    ///
    /// - `ExamError::InvalidStep` if `step` is outside 1..=15 (checked before anything else)
    /// - `ExamError::SessionNotStarted` if the attempt is not in progress
    /// - `ExamError::PoolExhausted` / `ExamError::QuestionNotFound` if nothing can be served
    pub async fn get_step(
        &self,
        session: &mut SessionState,
        step: i64,
    ) -> Result<Question, ExamError> {
        let step = StepIndex::new(step).map_err(|_| ExamError::InvalidStep { step })?;
        if !session.is_in_progress() {
            return Err(ExamError::SessionNotStarted);
        }

        let (question, commit) = match step.rule() {
            StepRule::Opening => {
                let topic = session
                    .opening_topic()
                    .ok_or(ExamError::SessionNotStarted)?;
                let question = self
                    .selector
                    .opening_question(topic)
                    .await?
                    .ok_or(ExamError::QuestionNotFound { step })?;
                (question, StepCommit::default())
            }
            StepRule::Group { span, kind, link } => {
                self.group_step(session, step, span, kind, link).await?
            }
            StepRule::FixedSlot { type_number } => {
                let question = self
                    .selector
                    .select_fixed_slot(type_number)
                    .await?
                    .ok_or(ExamError::QuestionNotFound { step })?;
                (question, StepCommit::default())
            }
        };

        self.commit(session, &question, commit).await?;
        debug!(%step, question = %question.id(), topic = %question.topic(), "served step");
        Ok(question)
    }

    /// Shared policy of steps 2-10; only the span, kind and link role vary.
    async fn group_step(
        &self,
        session: &SessionState,
        step: StepIndex,
        span: GroupSpan,
        kind: QuestionKind,
        link: LinkRole,
    ) -> Result<(Question, StepCommit), ExamError> {
        let group = span.pool();
        let current = self
            .rotator
            .select_topic(group, session.sticky_topic(span))
            .await?;
        let exclude = match link {
            LinkRole::Exclude => session.linked_question(span),
            LinkRole::Unlinked | LinkRole::Reserve => None,
        };
        let slot = SlotRequest {
            kind,
            type_number: ROTATING_TYPE_NUMBER,
            exclude,
        };

        let Some(found) = self
            .selector
            .select_with_fallback(group, current, slot)
            .await?
        else {
            return Err(ExamError::QuestionNotFound { step });
        };

        let topic = found.topic.topic().clone();
        let reserve = (link == LinkRole::Reserve).then(|| (span, found.question.id()));
        Ok((
            found.question,
            StepCommit {
                topic: Some((group, topic.clone())),
                sticky: Some((span, topic)),
                reserve,
            },
        ))
    }

    async fn commit(
        &self,
        session: &mut SessionState,
        question: &Question,
        commit: StepCommit,
    ) -> Result<(), ExamError> {
        let now = self.clock.now();
        self.usage.touch_question(question.id(), now).await?;
        if let Some((group, topic)) = &commit.topic {
            self.usage.touch_topic(*group, topic, now).await?;
        }

        if let Some((span, topic)) = commit.sticky {
            session.set_sticky_topic(span, topic);
        }
        if let Some((span, id)) = commit.reserve {
            session.reserve_linked_question(span, id);
        }
        Ok(())
    }

    /// Move past `believed_current`, returning the step to show next.
    ///
    /// The next step is derived from the caller's view rather than the stored
    /// one, so a repeated request lands on the same step. Going back to step 1
    /// forgets the topic of steps 2-4.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidStep` if the next step would fall outside
    /// 1..=15 and `ExamError::SessionNotStarted` if the attempt is not in
    /// progress.
    pub fn advance(
        &self,
        session: &mut SessionState,
        believed_current: i64,
    ) -> Result<StepIndex, ExamError> {
        let raw = believed_current.saturating_add(1);
        let next = StepIndex::new(raw).map_err(|_| ExamError::InvalidStep { step: raw })?;
        if !session.is_in_progress() {
            return Err(ExamError::SessionNotStarted);
        }

        if next == StepIndex::FIRST {
            session.clear_sticky_topic(GroupSpan::First);
        }
        session.move_to(next);
        debug!(step = %next, "advanced");
        Ok(next)
    }

    /// Reserve a recording name for an answer given during the attempt.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::SessionNotStarted` if the attempt is not in progress.
    pub async fn record_answer(&self, session: &SessionState) -> Result<String, ExamError> {
        let Some(step) = session.current_step() else {
            return Err(ExamError::SessionNotStarted);
        };
        let name = self.artifacts.record_artifact(self.clock.now()).await?;
        debug!(%step, artifact = %name, "recorded answer");
        Ok(name)
    }

    /// End the attempt and list its recordings.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::SessionNotStarted` if the attempt is not in progress.
    pub async fn finish_exam(&self, session: &mut SessionState) -> Result<ExamSummary, ExamError> {
        let Some(step) = session.current_step() else {
            return Err(ExamError::SessionNotStarted);
        };
        let artifacts = self.artifacts.list_artifacts().await?;

        let now = self.clock.now();
        session.finish(now);
        if !step.is_last() {
            info!(%step, "exam finished early");
        }
        info!(recordings = artifacts.len(), "exam finished");

        Ok(ExamSummary {
            artifacts,
            started_at: session.started_at(),
            finished_at: now,
        })
    }
}
