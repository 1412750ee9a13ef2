//! Redis Streams plumbing (XADD side).
//!
//! ## Stream layout
//!
//! Every entry carries two fields:
//!
//! - `key`: the user id, so consumers can partition or deduplicate
//! - `payload`: the event as a JSON document
//!
//! Entry ids are generated by Redis (`*`).

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{info, instrument};

use lure_events::{PublishError, Publisher};
use lure_users::UserCreated;

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),
}

/// Open a reconnecting connection to `redis_url`.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, RedisStreamsError> {
    let client =
        redis::Client::open(redis_url).map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

    ConnectionManager::new(client)
        .await
        .map_err(|e| RedisStreamsError::Connection(e.to_string()))
}

/// Appends [`UserCreated`] events to a stream.
#[derive(Clone)]
pub struct UserCreatedPublisher {
    conn: ConnectionManager,
    stream_key: String,
}

impl UserCreatedPublisher {
    pub fn new(conn: ConnectionManager, stream_key: impl Into<String>) -> Self {
        Self {
            conn,
            stream_key: stream_key.into(),
        }
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }
}

impl std::fmt::Debug for UserCreatedPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCreatedPublisher")
            .field("stream_key", &self.stream_key)
            .finish_non_exhaustive()
    }
}

/// `(key, payload)` fields of the stream entry for `event`.
fn entry_fields(event: &UserCreated) -> Result<[(&'static str, String); 2], PublishError> {
    let payload =
        serde_json::to_string(event).map_err(|e| PublishError::Serialization(e.to_string()))?;

    Ok([("key", event.id.to_string()), ("payload", payload)])
}

#[async_trait]
impl Publisher<UserCreated> for UserCreatedPublisher {
    #[instrument(
        skip(self, event),
        fields(stream_key = %self.stream_key, user_id = %event.id),
        err
    )]
    async fn publish(&self, event: UserCreated) -> Result<(), PublishError> {
        let fields = entry_fields(&event)?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream_key).arg("*");
        for (field, value) in &fields {
            cmd.arg(*field).arg(value);
        }

        let mut conn = self.conn.clone();
        let entry_id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| PublishError::Transport(format!("XADD failed: {}", e)))?;

        info!(%entry_id, "published user created event");
        Ok(())
    }
}
