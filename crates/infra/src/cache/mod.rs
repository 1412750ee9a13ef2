//! Key/value cache with JSON values.
//!
//! Backends ([`CacheStore`]) only move strings around; [`JsonCache`] owns the
//! serialization so every backend stores the same representation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

mod in_memory;
#[cfg(feature = "redis")]
mod redis_backend;

pub use in_memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use redis_backend::RedisCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to serialize cache value: {0}")]
    Serialization(String),

    #[error("failed to deserialize cache value: {0}")]
    Deserialization(String),

    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Per-write options.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// `None` keeps the value until it is deleted or evicted.
    pub expiration: Option<Duration>,
}

impl CacheOptions {
    pub fn with_expiration(expiration: Duration) -> Self {
        Self {
            expiration: Some(expiration),
        }
    }
}

/// Raw string cache backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn set_raw(&self, key: &str, value: String, options: CacheOptions)
    -> Result<(), CacheError>;

    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn del(&self, key: &str) -> Result<(), CacheError>;
}

#[async_trait]
impl<C> CacheStore for Arc<C>
where
    C: CacheStore + ?Sized,
{
    async fn set_raw(
        &self,
        key: &str,
        value: String,
        options: CacheOptions,
    ) -> Result<(), CacheError> {
        (**self).set_raw(key, value, options).await
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get_raw(key).await
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        (**self).del(key).await
    }
}

/// Cache that stores values as JSON documents.
#[derive(Debug, Clone)]
pub struct JsonCache<C> {
    store: C,
}

impl<C: CacheStore> JsonCache<C> {
    pub fn new(store: C) -> Self {
        Self { store }
    }

    pub async fn set<T>(&self, key: &str, value: &T, options: CacheOptions) -> Result<(), CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let json =
            serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.store.set_raw(key, json, options).await
    }

    /// `Ok(None)` on a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.store.get_raw(key).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CacheError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.store.del(key).await
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    #[tokio::test]
    async fn stores_values_as_json() {
        let backend = Arc::new(InMemoryCache::new());
        let cache = JsonCache::new(backend.clone());
        let profile = Profile {
            name: "ada".to_string(),
            visits: 3,
        };

        cache
            .set("profile:ada", &profile, CacheOptions::default())
            .await
            .unwrap();

        let raw = backend.get_raw("profile:ada").await.unwrap().unwrap();
        assert_eq!(raw, r#"{"name":"ada","visits":3}"#);
        assert_eq!(cache.get::<Profile>("profile:ada").await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn miss_is_none() {
        let cache = JsonCache::new(InMemoryCache::new());
        assert_eq!(cache.get::<Profile>("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn foreign_documents_fail_to_decode() {
        let backend = Arc::new(InMemoryCache::new());
        backend
            .set_raw("profile:ada", "not json".to_string(), CacheOptions::default())
            .await
            .unwrap();
        let cache = JsonCache::new(backend);

        let err = cache.get::<Profile>("profile:ada").await.unwrap_err();

        assert!(matches!(err, CacheError::Deserialization(_)));
    }

    #[tokio::test]
    async fn deleted_values_are_gone() {
        let cache = JsonCache::new(InMemoryCache::new());
        cache.set("k", &1u8, CacheOptions::default()).await.unwrap();

        cache.del("k").await.unwrap();

        assert_eq!(cache.get::<u8>("k").await.unwrap(), None);
    }
}
