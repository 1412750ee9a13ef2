//! In-memory publisher for tests/dev.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::publisher::{PublishError, Publisher};

/// Publisher that records every event it receives.
///
/// - No IO
/// - Never fails
/// - Events are kept in publish order until [`InMemoryPublisher::take`] drains them
#[derive(Debug)]
pub struct InMemoryPublisher<T> {
    published: Mutex<Vec<T>>,
}

impl<T> InMemoryPublisher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain recorded events.
    pub fn take(&self) -> Vec<T> {
        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *published)
    }
}

impl<T: Clone> InMemoryPublisher<T> {
    /// Copy of the recorded events.
    pub fn published(&self) -> Vec<T> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T> Default for InMemoryPublisher<T> {
    fn default() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl<T> Publisher<T> for InMemoryPublisher<T>
where
    T: Send + 'static,
{
    async fn publish(&self, event: T) -> Result<(), PublishError> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}
