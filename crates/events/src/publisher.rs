//! Outbound publisher seam.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event serialization failed: {0}")]
    Serialization(String),

    #[error("event transport failed: {0}")]
    Transport(String),
}

/// Sends events of one concrete type.
///
/// Delivery semantics (fire-and-forget vs acknowledged) are the implementation's
/// business; callers only see success or failure of the single call.
#[async_trait]
pub trait Publisher<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn publish(&self, event: T) -> Result<(), PublishError>;
}

#[async_trait]
impl<T, P> Publisher<T> for Arc<P>
where
    T: Send + 'static,
    P: Publisher<T> + ?Sized,
{
    async fn publish(&self, event: T) -> Result<(), PublishError> {
        (**self).publish(event).await
    }
}
