//! Fixed layout of the 15-step exam.
//!
//! Every step maps to exactly one [`StepRule`]. The three topic-bound spans
//! (2-4, 5-7, 8-10) share one shape: three questions on the span's topic where
//! the last one may not repeat the one before it. Only the kinds differ, see
//! [`GroupSpan::kinds`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::{QuestionKind, TopicGroup};

/// Number of steps in an exam.
pub const TOTAL_STEPS: u32 = 15;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepError {
    #[error("step {0} is outside 1..=15")]
    OutOfRange(i64),
}

/// A validated 1-based exam step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct StepIndex(u32);

impl StepIndex {
    pub const FIRST: StepIndex = StepIndex(1);
    pub const LAST: StepIndex = StepIndex(TOTAL_STEPS);

    /// Validate a raw step number.
    ///
    /// # Errors
    ///
    /// Returns `StepError::OutOfRange` unless `1 <= raw <= TOTAL_STEPS`.
    pub fn new(raw: i64) -> Result<Self, StepError> {
        match u32::try_from(raw) {
            Ok(step) if (1..=TOTAL_STEPS).contains(&step) => Ok(Self(step)),
            _ => Err(StepError::OutOfRange(raw)),
        }
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn is_last(self) -> bool {
        self == Self::LAST
    }

    /// Selection rule that applies to this step.
    #[must_use]
    pub fn rule(self) -> StepRule {
        match self.0 {
            1 => StepRule::Opening,
            2..=10 => {
                let (span, offset) = match self.0 {
                    2..=4 => (GroupSpan::First, self.0 - 2),
                    5..=7 => (GroupSpan::Second, self.0 - 5),
                    _ => (GroupSpan::Third, self.0 - 8),
                };
                let (position, link) = match offset {
                    0 => (0, LinkRole::Unlinked),
                    1 => (1, LinkRole::Reserve),
                    _ => (2, LinkRole::Exclude),
                };
                let kind = span.kinds()[position];
                StepRule::Group { span, kind, link }
            }
            n => StepRule::FixedSlot { type_number: n },
        }
    }
}

impl fmt::Display for StepIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for StepIndex {
    type Error = StepError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StepIndex> for u32 {
    fn from(value: StepIndex) -> Self {
        value.0
    }
}

//
// ─── RULES ─────────────────────────────────────────────────────────────────────
//

/// Three-step range that keeps one sticky topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupSpan {
    /// Steps 2-4.
    First,
    /// Steps 5-7.
    Second,
    /// Steps 8-10.
    Third,
}

impl GroupSpan {
    pub const ALL: [GroupSpan; 3] = [GroupSpan::First, GroupSpan::Second, GroupSpan::Third];

    /// Pool the span rotates through. First and Second both read Survey.
    #[must_use]
    pub fn pool(self) -> TopicGroup {
        match self {
            GroupSpan::First | GroupSpan::Second => TopicGroup::Survey,
            GroupSpan::Third => TopicGroup::RolePlay,
        }
    }

    /// Question kinds served at the span's three steps, in order.
    ///
    /// Steps 2-4 open with two short questions; the later spans switch to the
    /// long form after their opener.
    #[must_use]
    pub fn kinds(self) -> [QuestionKind; 3] {
        match self {
            GroupSpan::First => [QuestionKind::Short, QuestionKind::Short, QuestionKind::Long],
            GroupSpan::Second | GroupSpan::Third => {
                [QuestionKind::Short, QuestionKind::Long, QuestionKind::Long]
            }
        }
    }

    #[must_use]
    pub fn first_step(self) -> StepIndex {
        match self {
            GroupSpan::First => StepIndex(2),
            GroupSpan::Second => StepIndex(5),
            GroupSpan::Third => StepIndex(8),
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            GroupSpan::First => 0,
            GroupSpan::Second => 1,
            GroupSpan::Third => 2,
        }
    }
}

/// Role a step plays in a linked pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    Unlinked,
    /// Remember the chosen id for the next step (3, 6, 9).
    Reserve,
    /// Must differ from the reserved id (4, 7, 10).
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepRule {
    /// Step 1: first question of the opening topic.
    Opening,
    /// Steps 2-10.
    Group {
        span: GroupSpan,
        kind: QuestionKind,
        link: LinkRole,
    },
    /// Steps 11-15: whole bank, matched on type number only.
    FixedSlot { type_number: u32 },
}
