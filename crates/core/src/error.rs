use thiserror::Error;

use crate::model::{QuestionError, TopicError};
use crate::plan::StepError;

/// Any validation failure raised by the domain model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Topic(#[from] TopicError),
    #[error(transparent)]
    Step(#[from] StepError),
}
