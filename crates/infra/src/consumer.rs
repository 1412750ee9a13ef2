//! Create-user consumer: turns stream entries into `UserService::create` calls.
//!
//! Entries are read with a consumer group and acknowledged whether or not the user could be
//! created; there is no redelivery. Entries whose payload is missing or is not a
//! `{"name", "email"}` document are logged and skipped.

use serde::Deserialize;
use thiserror::Error;

use crate::user_service::CreateUserDto;

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The shutdown signal fired.
    #[error("consumer has been stopped")]
    Stopped,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("stream error: {0}")]
    Stream(String),
}

#[derive(Debug, Deserialize)]
struct CreateUserPayload {
    name: String,
    email: String,
}

/// Decode the `payload` field of a create-user entry.
pub fn parse_create_user(payload: Option<&str>) -> Result<CreateUserDto, ConsumerError> {
    let payload = payload.ok_or_else(|| ConsumerError::Malformed("missing payload field".into()))?;

    let parsed: CreateUserPayload =
        serde_json::from_str(payload).map_err(|e| ConsumerError::Malformed(e.to_string()))?;

    Ok(CreateUserDto {
        name: parsed.name,
        email: parsed.email,
    })
}

#[cfg(feature = "redis")]
pub use self::streams::CreateUserConsumer;

#[cfg(feature = "redis")]
mod streams {
    use std::sync::Arc;
    use std::time::Duration;

    use redis::AsyncCommands;
    use redis::aio::ConnectionManager;
    use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
    use tokio::sync::watch;
    use tracing::{debug, error, info, instrument, warn};

    use super::{ConsumerError, parse_create_user};
    use crate::cache::CacheStore;
    use crate::store::Store;
    use crate::user_service::UserService;

    const BATCH_SIZE: usize = 16;
    const BLOCK: Duration = Duration::from_secs(1);

    pub struct CreateUserConsumer<S, C> {
        conn: ConnectionManager,
        stream: String,
        group: String,
        consumer: String,
        service: Arc<UserService<S, C>>,
    }

    impl<S: Store, C: CacheStore> CreateUserConsumer<S, C> {
        /// `conn` should be dedicated to this consumer: the blocking reads hold it.
        pub fn new(
            conn: ConnectionManager,
            stream: impl Into<String>,
            group: impl Into<String>,
            consumer: impl Into<String>,
            service: Arc<UserService<S, C>>,
        ) -> Self {
            Self {
                conn,
                stream: stream.into(),
                group: group.into(),
                consumer: consumer.into(),
                service,
            }
        }

        /// Create the consumer group (and the stream) unless they already exist.
        pub async fn ensure_group(&self) -> Result<(), ConsumerError> {
            let mut conn = self.conn.clone();
            let created: redis::RedisResult<()> = conn
                .xgroup_create_mkstream(&self.stream, &self.group, "0")
                .await;

            match created {
                Ok(()) => {
                    info!(stream = %self.stream, group = %self.group, "consumer group created");
                    Ok(())
                }
                Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
                Err(e) => Err(ConsumerError::Stream(format!("XGROUP CREATE failed: {e}"))),
            }
        }

        /// Consume until `shutdown` flips to `true`, then return [`ConsumerError::Stopped`].
        ///
        /// Read failures end the loop and are returned.
        #[instrument(
            skip(self, shutdown),
            fields(stream = %self.stream, group = %self.group, consumer = %self.consumer)
        )]
        pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
            self.ensure_group().await?;
            info!("running consumer");

            let options = StreamReadOptions::default()
                .group(&self.group, &self.consumer)
                .count(BATCH_SIZE)
                .block(BLOCK.as_millis() as usize);
            let keys = [self.stream.as_str()];
            let ids = [">"];

            loop {
                if *shutdown.borrow() {
                    info!("consumer stopped");
                    return Err(ConsumerError::Stopped);
                }

                let mut conn = self.conn.clone();
                let read = conn.xread_options::<_, _, StreamReadReply>(&keys, &ids, &options);

                let reply = tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            warn!("shutdown sender dropped");
                        }
                        info!("consumer stopped");
                        return Err(ConsumerError::Stopped);
                    }
                    reply = read => reply,
                };

                let reply = reply.map_err(|e| {
                    error!(error = %e, "failed to read from stream");
                    ConsumerError::Stream(format!("XREADGROUP failed: {e}"))
                })?;

                for entry in reply.keys.into_iter().flat_map(|key| key.ids) {
                    self.handle(&entry).await;
                    self.ack(&entry.id).await?;
                }
            }
        }

        async fn handle(&self, entry: &StreamId) {
            let payload: Option<String> = entry.get("payload");

            let dto = match parse_create_user(payload.as_deref()) {
                Ok(dto) => dto,
                Err(e) => {
                    error!(entry_id = %entry.id, error = %e, "failed to decode message payload");
                    return;
                }
            };

            match self.service.create(dto).await {
                Ok(user_id) => debug!(entry_id = %entry.id, %user_id, "created user from message"),
                Err(e) => warn!(entry_id = %entry.id, error = %e, "could not create user from message"),
            }
        }

        async fn ack(&self, entry_id: &str) -> Result<(), ConsumerError> {
            let mut conn = self.conn.clone();
            let _: i64 = conn
                .xack(&self.stream, &self.group, &[entry_id])
                .await
                .map_err(|e| ConsumerError::Stream(format!("XACK failed: {e}")))?;
            Ok(())
        }
    }
}
