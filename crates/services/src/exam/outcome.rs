use chrono::{DateTime, Utc};
use exam_core::model::{Question, TopicName};
use serde::Serialize;

/// What the transport shows after `start_exam`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamStart {
    pub topic: TopicName,
    pub question: Question,
}

/// Returned by `finish_exam`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExamSummary {
    /// Recorded answers, oldest first.
    pub artifacts: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}
