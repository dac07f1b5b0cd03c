use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{QuestionId, TopicName};
use crate::plan::{GroupSpan, StepIndex};

/// Lifecycle of one exam attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ExamPhase {
    NotStarted,
    InProgress { step: StepIndex },
    Finished,
}

/// Per-attempt bookkeeping.
///
/// Each [`GroupSpan`] owns its own sticky topic and linked-question slot, even
/// though the first two spans rotate through the same pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    phase: ExamPhase,
    opening_topic: Option<TopicName>,
    sticky_topics: [Option<TopicName>; 3],
    linked_questions: [Option<QuestionId>; 3],
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: ExamPhase::NotStarted,
            opening_topic: None,
            sticky_topics: [None, None, None],
            linked_questions: [None, None, None],
            started_at: None,
            finished_at: None,
        }
    }

    /// Enter step 1 with a freshly chosen opening topic.
    ///
    /// Anything left over from an earlier attempt is discarded.
    pub fn begin(&mut self, opening_topic: TopicName, started_at: DateTime<Utc>) {
        *self = Self {
            phase: ExamPhase::InProgress {
                step: StepIndex::FIRST,
            },
            opening_topic: Some(opening_topic),
            started_at: Some(started_at),
            ..Self::new()
        };
    }

    #[must_use]
    pub fn phase(&self) -> ExamPhase {
        self.phase
    }

    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(self.phase, ExamPhase::InProgress { .. })
    }

    #[must_use]
    pub fn current_step(&self) -> Option<StepIndex> {
        match self.phase {
            ExamPhase::InProgress { step } => Some(step),
            _ => None,
        }
    }

    pub fn move_to(&mut self, step: StepIndex) {
        self.phase = ExamPhase::InProgress { step };
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.phase = ExamPhase::Finished;
        self.finished_at = Some(at);
    }

    #[must_use]
    pub fn opening_topic(&self) -> Option<&TopicName> {
        self.opening_topic.as_ref()
    }

    #[must_use]
    pub fn sticky_topic(&self, span: GroupSpan) -> Option<&TopicName> {
        self.sticky_topics[span.slot()].as_ref()
    }

    pub fn set_sticky_topic(&mut self, span: GroupSpan, topic: TopicName) {
        self.sticky_topics[span.slot()] = Some(topic);
    }

    pub fn clear_sticky_topic(&mut self, span: GroupSpan) {
        self.sticky_topics[span.slot()] = None;
    }

    /// Id chosen at the first step of the span's linked pair.
    #[must_use]
    pub fn linked_question(&self, span: GroupSpan) -> Option<QuestionId> {
        self.linked_questions[span.slot()]
    }

    pub fn reserve_linked_question(&mut self, span: GroupSpan, id: QuestionId) {
        self.linked_questions[span.slot()] = Some(id);
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn topic(name: &str) -> TopicName {
        TopicName::new(name).unwrap()
    }

    #[test]
    fn new_session_is_not_started() {
        let state = SessionState::new();
        assert_eq!(state.phase(), ExamPhase::NotStarted);
        assert_eq!(state.current_step(), None);
        assert!(state.opening_topic().is_none());
    }

    #[test]
    fn begin_resets_previous_attempt() {
        let mut state = SessionState::new();
        state.begin(topic("intro"), fixed_now());
        state.set_sticky_topic(GroupSpan::First, topic("travel"));
        state.reserve_linked_question(GroupSpan::Third, QuestionId::new(9));
        state.finish(fixed_now());

        state.begin(topic("self"), fixed_now());
        assert_eq!(state.current_step(), Some(StepIndex::FIRST));
        assert_eq!(state.opening_topic(), Some(&topic("self")));
        assert!(state.sticky_topic(GroupSpan::First).is_none());
        assert!(state.linked_question(GroupSpan::Third).is_none());
        assert!(state.finished_at().is_none());
    }

    #[test]
    fn spans_keep_independent_slots() {
        let mut state = SessionState::new();
        state.set_sticky_topic(GroupSpan::First, topic("travel"));
        state.set_sticky_topic(GroupSpan::Second, topic("food"));
        state.clear_sticky_topic(GroupSpan::First);

        assert!(state.sticky_topic(GroupSpan::First).is_none());
        assert_eq!(state.sticky_topic(GroupSpan::Second), Some(&topic("food")));
    }

    #[test]
    fn state_survives_json() {
        let mut state = SessionState::new();
        state.begin(topic("intro"), fixed_now());
        state.move_to(StepIndex::new(4).unwrap());
        state.reserve_linked_question(GroupSpan::First, QuestionId::new(3));

        let json = serde_json::to_string(&state).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
