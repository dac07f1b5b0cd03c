use std::sync::Arc;

use exam_core::model::{TopicGroup, TopicName, TopicPoolEntry};
use storage::repository::UsageStore;
use tracing::debug;

use crate::error::ExamError;

/// Picks topics from a group's pool, least recently used first.
#[derive(Clone)]
pub struct TopicRotator {
    usage: Arc<dyn UsageStore>,
}

impl TopicRotator {
    #[must_use]
    pub fn new(usage: Arc<dyn UsageStore>) -> Self {
        Self { usage }
    }

    /// Current topic for `group`.
    ///
    /// A `remembered` topic that is still in the pool wins; otherwise the least
    /// recently used entry is returned.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::PoolExhausted` if the pool is empty.
    pub async fn select_topic(
        &self,
        group: TopicGroup,
        remembered: Option<&TopicName>,
    ) -> Result<TopicPoolEntry, ExamError> {
        let pool = self.usage.least_recently_used_topics(group).await?;

        if let Some(remembered) = remembered {
            if let Some(entry) = pool.iter().find(|e| e.topic() == remembered) {
                return Ok(entry.clone());
            }
            debug!(%group, topic = %remembered, "remembered topic left the pool");
        }

        pool.into_iter()
            .next()
            .ok_or(ExamError::PoolExhausted { group })
    }

    /// Entry right after `current` in least-recently-used order.
    ///
    /// `None` when `current` is last or no longer in the pool. Only one hop is
    /// ever offered.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::Storage` if the pool cannot be read.
    pub async fn fallback_topic(
        &self,
        group: TopicGroup,
        current: &TopicName,
    ) -> Result<Option<TopicPoolEntry>, ExamError> {
        let pool = self.usage.least_recently_used_topics(group).await?;
        let Some(position) = pool.iter().position(|e| e.topic() == current) else {
            return Ok(None);
        };
        Ok(pool.into_iter().nth(position + 1))
    }
}
