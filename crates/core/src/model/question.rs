use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::QuestionId;
use crate::model::topic::{TopicError, TopicName};

//
// ─── QUESTION KIND ─────────────────────────────────────────────────────────────
//

/// Answer format of a question.
///
/// Stored as the single-letter tags used by the question bank: `I` for the
/// one-minute short form and `A` for the two-minute long form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionKind {
    #[serde(rename = "I")]
    Short,
    #[serde(rename = "A")]
    Long,
}

impl QuestionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::Short => "I",
            QuestionKind::Long => "A",
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionKind {
    type Err = QuestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "I" => Ok(QuestionKind::Short),
            "A" => Ok(QuestionKind::Long),
            other => Err(QuestionError::UnknownKind(other.to_owned())),
        }
    }
}

//
// ─── CONTENT ───────────────────────────────────────────────────────────────────
//

/// Presentation payload of a question. The sequencing engine never reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionContent {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub question_content: Option<String>,
    #[serde(default)]
    pub answer_content: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub answer_audio: Option<String>,
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// Type number used by every rotating (topic-bound) slot.
pub const ROTATING_TYPE_NUMBER: u32 = 0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("unknown question kind: {0}")]
    UnknownKind(String),
    #[error(transparent)]
    Topic(#[from] TopicError),
}

/// A question in the bank.
///
/// Everything except `last_used` is fixed once the question is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    id: QuestionId,
    topic: TopicName,
    kind: QuestionKind,
    type_number: u32,
    last_used: DateTime<Utc>,
    content: QuestionContent,
}

impl Question {
    /// Build a question.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::Topic` if the topic name is blank.
    pub fn new(
        id: QuestionId,
        topic: impl Into<String>,
        kind: QuestionKind,
        type_number: u32,
        last_used: DateTime<Utc>,
    ) -> Result<Self, QuestionError> {
        Ok(Self {
            id,
            topic: TopicName::new(topic)?,
            kind,
            type_number,
            last_used,
            content: QuestionContent::default(),
        })
    }

    #[must_use]
    pub fn with_content(mut self, content: QuestionContent) -> Self {
        self.content = content;
        self
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    #[must_use]
    pub fn kind(&self) -> QuestionKind {
        self.kind
    }

    #[must_use]
    pub fn type_number(&self) -> u32 {
        self.type_number
    }

    #[must_use]
    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_used
    }

    #[must_use]
    pub fn content(&self) -> &QuestionContent {
        &self.content
    }

    /// Record that the question was served at `at`.
    ///
    /// `last_used` never moves backwards; an older `at` is ignored.
    pub fn mark_used(&mut self, at: DateTime<Utc>) {
        if at > self.last_used {
            self.last_used = at;
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
