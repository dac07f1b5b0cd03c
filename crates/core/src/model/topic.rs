use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopicError {
    #[error("topic name cannot be empty")]
    EmptyName,
    #[error("unknown topic group code: {0}")]
    UnknownGroup(i64),
}

/// Validated topic name (trimmed, non-empty).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicName(String);

impl TopicName {
    /// Create a validated topic name.
    ///
    /// # Errors
    ///
    /// Returns `TopicError::EmptyName` if the name is empty after trimming.
    pub fn new(value: impl Into<String>) -> Result<Self, TopicError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TopicError::EmptyName);
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TopicName {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopicName> for String {
    fn from(value: TopicName) -> Self {
        value.0
    }
}

//
// ─── TOPIC GROUP ───────────────────────────────────────────────────────────────
//

/// Rotation pool a topic belongs to.
///
/// The numeric codes are the step at which the pool is first consulted and are
/// what gets persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum TopicGroup {
    /// Step 1.
    Opening,
    /// Steps 2-7, shared by two independent spans.
    Survey,
    /// Steps 8-10.
    RolePlay,
}

impl TopicGroup {
    pub const ALL: [TopicGroup; 3] = [
        TopicGroup::Opening,
        TopicGroup::Survey,
        TopicGroup::RolePlay,
    ];

    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            TopicGroup::Opening => 1,
            TopicGroup::Survey => 2,
            TopicGroup::RolePlay => 8,
        }
    }

    /// Resolve a persisted group code.
    ///
    /// # Errors
    ///
    /// Returns `TopicError::UnknownGroup` for codes other than 1, 2 and 8.
    pub fn from_code(code: i64) -> Result<Self, TopicError> {
        match code {
            1 => Ok(TopicGroup::Opening),
            2 => Ok(TopicGroup::Survey),
            8 => Ok(TopicGroup::RolePlay),
            other => Err(TopicError::UnknownGroup(other)),
        }
    }
}

impl fmt::Display for TopicGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TopicGroup::Opening => "opening",
            TopicGroup::Survey => "survey",
            TopicGroup::RolePlay => "role-play",
        };
        write!(f, "{name}({})", self.code())
    }
}

impl TryFrom<i64> for TopicGroup {
    type Error = TopicError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::from_code(value)
    }
}

impl From<TopicGroup> for i64 {
    fn from(value: TopicGroup) -> Self {
        value.code()
    }
}

//
// ─── POOL ENTRY ────────────────────────────────────────────────────────────────
//

/// One topic inside a group's rotation pool, identified by `(group, topic)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPoolEntry {
    group: TopicGroup,
    topic: TopicName,
    last_used: DateTime<Utc>,
}

impl TopicPoolEntry {
    #[must_use]
    pub fn new(group: TopicGroup, topic: TopicName, last_used: DateTime<Utc>) -> Self {
        Self {
            group,
            topic,
            last_used,
        }
    }

    #[must_use]
    pub fn group(&self) -> TopicGroup {
        self.group
    }

    #[must_use]
    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    #[must_use]
    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_used
    }

    /// Same forward-only rule as `Question::mark_used`.
    pub fn mark_used(&mut self, at: DateTime<Utc>) {
        if at > self.last_used {
            self.last_used = at;
        }
    }
}
