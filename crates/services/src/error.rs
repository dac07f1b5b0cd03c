//! Shared error types for the services crate.

use exam_core::model::TopicGroup;
use exam_core::plan::StepIndex;
use storage::repository::StorageError;
use thiserror::Error;

/// Errors emitted by the exam engine.
///
/// None of them are retried; a failed call leaves the session and every usage
/// stamp as they were.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExamError {
    #[error("no topic available in the {group} pool")]
    PoolExhausted { group: TopicGroup },
    #[error("no question available for step {step}")]
    QuestionNotFound { step: StepIndex },
    #[error("step {step} is outside 1..=15")]
    InvalidStep { step: i64 },
    #[error("exam has not been started")]
    SessionNotStarted,
    #[error(transparent)]
    Storage(#[from] StorageError),
}
