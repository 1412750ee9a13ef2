//! User use cases: the only place that combines units of work, the cache and the event bus.
//!
//! ## Flow
//!
//! - **Reads** go through the cache (`user:{id}`) first and fall back to a read-only unit of
//!   work; the loaded user is cached afterwards.
//! - **Writes** run in a read-write unit of work. `update` and `delete` invalidate the cached
//!   copy after commit; `create` publishes [`UserCreated`] after commit.
//!
//! Cache problems never fail an operation: a broken or undecodable entry is a miss, and a
//! failed write or delete is logged. A failed publish *is* an error, even though the user
//! was already committed.
//!
//! Every unit of work is cancelled once the use case is done with it. After a successful
//! save that cancel is a no-op; after a failure it rolls the transaction back.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use lure_core::{DomainError, UserId};
use lure_events::{BusError, EventBus};
use lure_users::{User, UserCreated, UserEvent};

use crate::cache::{CacheOptions, CacheStore, JsonCache};
use crate::storage::{StorageError, UnitOfWorkFactory};
use crate::store::{Store, StoreError};

/// User as handed out by the use cases (and as stored in the cache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDto {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id_typed(),
            created_at: user.created_at(),
            updated_at: user.updated_at(),
            name: user.name().to_string(),
            email: user.email().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserDto {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserDto {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Error)]
pub enum UserServiceError {
    #[error("user not found")]
    NotFound,

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("unit of work is already finished")]
    Finished,

    #[error(transparent)]
    Store(StoreError),

    #[error("failed to publish event: {0}")]
    Publish(#[from] BusError),
}

impl From<StoreError> for UserServiceError {
    fn from(err: StoreError) -> Self {
        UserServiceError::Store(err)
    }
}

impl From<StorageError> for UserServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => UserServiceError::NotFound,
            StorageError::Finished => UserServiceError::Finished,
            StorageError::Store(e) => UserServiceError::Store(e),
        }
    }
}

impl From<DomainError> for UserServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound => UserServiceError::NotFound,
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                UserServiceError::Validation(msg)
            }
        }
    }
}

fn cache_key(id: UserId) -> String {
    format!("user:{id}")
}

pub struct UserService<S, C> {
    works: UnitOfWorkFactory<S>,
    cache: JsonCache<C>,
    bus: EventBus<UserEvent>,
    cache_ttl: Option<Duration>,
}

impl<S: Store, C: CacheStore> UserService<S, C> {
    pub fn new(
        works: UnitOfWorkFactory<S>,
        cache: JsonCache<C>,
        bus: EventBus<UserEvent>,
        cache_ttl: Option<Duration>,
    ) -> Self {
        Self {
            works,
            cache,
            bus,
            cache_ttl,
        }
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn get_by_id(&self, id: UserId) -> Result<UserDto, UserServiceError> {
        debug!("getting user by id");
        let key = cache_key(id);

        match self.cache.get::<UserDto>(&key).await {
            Ok(Some(cached)) => {
                info!("received cached user");
                return Ok(cached);
            }
            Ok(None) => debug!("user is not cached"),
            Err(e) => warn!(error = %e, "could not read cached user"),
        }

        let mut work = self.works.start_read_work().await?;
        let loaded = async {
            let user = work.users().get_by_id(id).await?;
            work.save().await?;
            Ok::<_, StorageError>(user)
        }
        .await;
        if let Err(e) = work.cancel().await {
            warn!(error = %e, "could not cancel unit of read work");
        }
        let dto = UserDto::from(&loaded?);

        let options = CacheOptions {
            expiration: self.cache_ttl,
        };
        if let Err(e) = self.cache.set(&key, &dto, options).await {
            error!(error = %e, "failed to cache user");
        }

        info!("got user by id");
        Ok(dto)
    }

    #[instrument(skip(self, dto), err)]
    pub async fn create(&self, dto: CreateUserDto) -> Result<UserId, UserServiceError> {
        let user = User::create(dto.name, dto.email)?;
        let id = user.id_typed();

        let mut work = self.works.start_work().await?;
        let created = async {
            let user = work.users().insert(user).await?;
            work.save().await?;
            Ok::<_, StorageError>(user.get())
        }
        .await;
        if let Err(e) = work.cancel().await {
            warn!(user_id = %id, error = %e, "could not cancel unit of work");
        }
        let user = created?;

        if let Err(e) = self
            .bus
            .publish(UserEvent::Created(UserCreated::from(&user)))
            .await
        {
            error!(user_id = %id, error = %e, "user created but event was not published");
            return Err(e.into());
        }

        info!(user_id = %id, "created user");
        Ok(id)
    }

    #[instrument(skip(self, dto), fields(user_id = %id), err)]
    pub async fn update(&self, id: UserId, dto: UpdateUserDto) -> Result<(), UserServiceError> {
        let mut work = self.works.start_work().await?;
        let updated = async {
            let user = work.users().get_by_id(id).await?;
            user.modify(|u| u.update(dto.name, dto.email))?;
            work.save().await?;
            Ok::<_, UserServiceError>(())
        }
        .await;
        if let Err(e) = work.cancel().await {
            warn!(error = %e, "could not cancel unit of work");
        }
        updated?;

        self.invalidate(id).await;
        info!("updated user");
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn delete(&self, id: UserId) -> Result<(), UserServiceError> {
        let mut work = self.works.start_work().await?;
        let deleted = async {
            let user = work.users().get_by_id(id).await?;
            work.users().remove(&user).await?;
            work.save().await?;
            Ok::<_, StorageError>(())
        }
        .await;
        if let Err(e) = work.cancel().await {
            warn!(error = %e, "could not cancel unit of work");
        }
        deleted?;

        self.invalidate(id).await;
        info!("deleted user");
        Ok(())
    }

    async fn invalidate(&self, id: UserId) {
        if let Err(e) = self.cache.del(&cache_key(id)).await {
            warn!(user_id = %id, error = %e, "failed to invalidate cached user");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use lure_events::{InMemoryPublisher, PublishError, Publisher};

    use super::*;
    use crate::cache::{CacheError, InMemoryCache};
    use crate::store::InMemoryStore;

    struct Harness<C> {
        store: InMemoryStore,
        cache: Arc<C>,
        published: Arc<InMemoryPublisher<UserCreated>>,
        service: UserService<InMemoryStore, Arc<C>>,
    }

    fn harness_with<C: CacheStore>(cache: C) -> Harness<C> {
        let store = InMemoryStore::new();
        let cache = Arc::new(cache);
        let published = Arc::new(InMemoryPublisher::new());
        let bus = EventBus::<UserEvent>::builder()
            .with_publisher::<UserCreated, _>(published.clone())
            .unwrap()
            .build();
        let service = UserService::new(
            UnitOfWorkFactory::new(store.clone()),
            JsonCache::new(cache.clone()),
            bus,
            Some(Duration::from_secs(60)),
        );

        Harness {
            store,
            cache,
            published,
            service,
        }
    }

    fn harness() -> Harness<InMemoryCache> {
        harness_with(InMemoryCache::new())
    }

    fn ada() -> CreateUserDto {
        CreateUserDto {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        }
    }

    /// Cache whose backend is down.
    struct UnreachableCache;

    #[async_trait]
    impl CacheStore for UnreachableCache {
        async fn set_raw(&self, _: &str, _: String, _: CacheOptions) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }

        async fn get_raw(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }

        async fn del(&self, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".to_string()))
        }
    }

    struct BrokenPublisher;

    #[async_trait]
    impl Publisher<UserCreated> for BrokenPublisher {
        async fn publish(&self, _event: UserCreated) -> Result<(), PublishError> {
            Err(PublishError::Transport("stream unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn create_commits_and_publishes_user_created() {
        let h = harness();

        let id = h.service.create(ada()).await.unwrap();

        let stored = h.store.user(id).unwrap();
        assert_eq!(stored.name(), "Ada");
        let events = h.published.published();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].email, "ada@example.com");
        assert_eq!(h.store.stats().updates, 0);
    }

    #[tokio::test]
    async fn invalid_input_never_opens_a_transaction() {
        let h = harness();

        let err = h
            .service
            .create(CreateUserDto {
                name: " ".to_string(),
                email: "ada@example.com".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, UserServiceError::Validation(_)));
        assert_eq!(h.store.stats().begun, 0);
        assert!(h.published.published().is_empty());
    }

    #[tokio::test]
    async fn get_by_id_serves_repeat_reads_from_the_cache() {
        let h = harness();
        let id = h.service.create(ada()).await.unwrap();
        let begun = h.store.stats().begun;

        let first = h.service.get_by_id(id).await.unwrap();
        let second = h.service.get_by_id(id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.name, "Ada");
        assert_eq!(h.store.stats().begun, begun + 1);
        assert!(h.cache.contains(&format!("user:{id}")));
    }

    #[tokio::test]
    async fn undecodable_cache_entry_falls_through_to_the_store() {
        let h = harness();
        let id = h.service.create(ada()).await.unwrap();
        h.cache
            .set_raw(&format!("user:{id}"), "{broken".to_string(), CacheOptions::default())
            .await
            .unwrap();

        let user = h.service.get_by_id(id).await.unwrap();

        assert_eq!(user.id, id);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let h = harness();

        let err = h.service.get_by_id(UserId::new()).await.unwrap_err();

        assert!(matches!(err, UserServiceError::NotFound));
    }

    #[tokio::test]
    async fn update_writes_once_and_invalidates_the_cache() {
        let h = harness();
        let id = h.service.create(ada()).await.unwrap();
        h.service.get_by_id(id).await.unwrap();

        h.service
            .update(
                id,
                UpdateUserDto {
                    name: "Ada Lovelace".to_string(),
                    email: "ada@lovelace.dev".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(h.store.stats().updates, 1);
        assert!(!h.cache.contains(&format!("user:{id}")));
        let fresh = h.service.get_by_id(id).await.unwrap();
        assert_eq!(fresh.name, "Ada Lovelace");
        assert!(fresh.updated_at > fresh.created_at);
    }

    #[tokio::test]
    async fn invalid_update_rolls_back() {
        let h = harness();
        let id = h.service.create(ada()).await.unwrap();
        let rollbacks = h.store.stats().rollbacks;

        let err = h
            .service
            .update(
                id,
                UpdateUserDto {
                    name: "Ada".to_string(),
                    email: "nope".to_string(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UserServiceError::Validation(_)));
        assert_eq!(h.store.stats().rollbacks, rollbacks + 1);
        assert_eq!(h.store.user(id).unwrap().email(), "ada@example.com");
    }

    #[tokio::test]
    async fn update_of_unknown_user_is_not_found() {
        let h = harness();

        let err = h
            .service
            .update(
                UserId::new(),
                UpdateUserDto {
                    name: "Ada".to_string(),
                    email: "ada@example.com".to_string(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UserServiceError::NotFound));
    }

    #[tokio::test]
    async fn delete_removes_the_row_and_the_cached_copy() {
        let h = harness();
        let id = h.service.create(ada()).await.unwrap();
        h.service.get_by_id(id).await.unwrap();

        h.service.delete(id).await.unwrap();

        assert!(h.store.user(id).is_none());
        assert!(!h.cache.contains(&format!("user:{id}")));
        assert_eq!(h.store.stats().updates, 0);
        assert!(matches!(
            h.service.delete(id).await.unwrap_err(),
            UserServiceError::NotFound
        ));
    }

    #[tokio::test]
    async fn cache_outage_does_not_fail_any_use_case() {
        let h = harness_with(UnreachableCache);

        let id = h.service.create(ada()).await.unwrap();
        assert_eq!(h.service.get_by_id(id).await.unwrap().id, id);
        h.service
            .update(
                id,
                UpdateUserDto {
                    name: "Ada".to_string(),
                    email: "ada@lovelace.dev".to_string(),
                },
            )
            .await
            .unwrap();
        h.service.delete(id).await.unwrap();
    }

    #[tokio::test]
    async fn publish_failure_is_reported_after_commit() {
        let store = InMemoryStore::new();
        let bus = EventBus::<UserEvent>::builder()
            .with_publisher::<UserCreated, _>(BrokenPublisher)
            .unwrap()
            .build();
        let service = UserService::new(
            UnitOfWorkFactory::new(store.clone()),
            JsonCache::new(InMemoryCache::new()),
            bus,
            None,
        );

        let err = service.create(ada()).await.unwrap_err();

        assert!(matches!(err, UserServiceError::Publish(BusError::Publish(_))));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn unregistered_event_is_an_error() {
        let store = InMemoryStore::new();
        let service = UserService::new(
            UnitOfWorkFactory::new(store.clone()),
            JsonCache::new(InMemoryCache::new()),
            EventBus::<UserEvent>::builder().build(),
            None,
        );

        let err = service.create(ada()).await.unwrap_err();

        assert!(matches!(
            err,
            UserServiceError::Publish(BusError::NotRegistered(_))
        ));
    }
}
