use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use lure_core::UserId;
use lure_events::{BusError, EventBus, InMemoryPublisher};
use lure_infra::cache::{InMemoryCache, JsonCache};
use lure_infra::storage::UnitOfWorkFactory;
use lure_infra::store::InMemoryStore;
use lure_infra::{Config, CreateUserDto, UpdateUserDto, UserDto, UserService, UserServiceError};
use lure_users::{UserCreated, UserEvent};

#[cfg(feature = "redis")]
use lure_infra::{
    cache::{CacheError, RedisCache},
    consumer::CreateUserConsumer,
    event_bus::{RedisStreamsError, UserCreatedPublisher, connect},
    store::{PgStore, StoreError},
};

pub type InMemoryUserService = UserService<InMemoryStore, Arc<InMemoryCache>>;

#[cfg(feature = "redis")]
pub type PersistentUserService = UserService<PgStore, RedisCache>;

#[cfg(feature = "redis")]
pub type PersistentConsumer = CreateUserConsumer<PgStore, RedisCache>;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("event bus wiring failed: {0}")]
    Bus(#[from] BusError),

    #[error("USE_PERSISTENT_STORES=true but no database is configured")]
    MissingDatabase,

    #[cfg(feature = "redis")]
    #[error("database setup failed: {0}")]
    Store(#[from] StoreError),

    #[cfg(feature = "redis")]
    #[error("cache setup failed: {0}")]
    Cache(#[from] CacheError),

    #[cfg(feature = "redis")]
    #[error("stream setup failed: {0}")]
    Streams(#[from] RedisStreamsError),
}

#[derive(Clone)]
pub enum AppServices {
    InMemory {
        users: Arc<InMemoryUserService>,
        store: InMemoryStore,
        published: Arc<InMemoryPublisher<UserCreated>>,
        request_timeout: Duration,
    },
    #[cfg(feature = "redis")]
    Persistent {
        users: Arc<PersistentUserService>,
        request_timeout: Duration,
    },
}

pub async fn build_services(config: &Config) -> Result<AppServices, StartupError> {
    if config.use_persistent_stores {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services(config).await;
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
        }
    }

    AppServices::in_memory(config.user_cache_ttl, config.request_timeout)
}

#[cfg(feature = "redis")]
async fn build_persistent_services(config: &Config) -> Result<AppServices, StartupError> {
    let db = config.database.as_ref().ok_or(StartupError::MissingDatabase)?;

    let store = PgStore::connect_lazy(
        &db.primary_url,
        db.replica_url.as_deref(),
        db.max_connections,
    )?;
    store.migrate().await?;

    let cache = RedisCache::connect(&config.redis_url).await?;
    let publisher =
        UserCreatedPublisher::new(connect(&config.redis_url).await?, &config.streams.user_created_stream);

    let bus = EventBus::<UserEvent>::builder()
        .with_publisher::<UserCreated, _>(publisher)?
        .build();

    let users = UserService::new(
        UnitOfWorkFactory::new(store),
        JsonCache::new(cache),
        bus,
        config.user_cache_ttl,
    );

    info!(
        replica = db.replica_url.is_some(),
        stream = %config.streams.user_created_stream,
        "persistent services ready"
    );

    Ok(AppServices::Persistent {
        users: Arc::new(users),
        request_timeout: config.request_timeout,
    })
}

impl AppServices {
    /// Services over the in-memory store, cache and a recording publisher.
    pub fn in_memory(
        cache_ttl: Option<Duration>,
        request_timeout: Duration,
    ) -> Result<Self, StartupError> {
        let store = InMemoryStore::new();
        let published = Arc::new(InMemoryPublisher::<UserCreated>::new());

        let bus = EventBus::<UserEvent>::builder()
            .with_publisher::<UserCreated, _>(published.clone())?
            .build();

        let users = UserService::new(
            UnitOfWorkFactory::new(store.clone()),
            JsonCache::new(Arc::new(InMemoryCache::new())),
            bus,
            cache_ttl,
        );

        info!("in-memory services ready");

        Ok(AppServices::InMemory {
            users: Arc::new(users),
            store,
            published,
            request_timeout,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        match self {
            AppServices::InMemory { request_timeout, .. } => *request_timeout,
            #[cfg(feature = "redis")]
            AppServices::Persistent { request_timeout, .. } => *request_timeout,
        }
    }

    /// Events recorded by the in-memory publisher (empty for persistent services).
    pub fn published_user_events(&self) -> Vec<UserCreated> {
        match self {
            AppServices::InMemory { published, .. } => published.published(),
            #[cfg(feature = "redis")]
            AppServices::Persistent { .. } => Vec::new(),
        }
    }

    /// Number of stored users, when the store is in memory.
    pub fn stored_user_count(&self) -> Option<usize> {
        match self {
            AppServices::InMemory { store, .. } => Some(store.user_count()),
            #[cfg(feature = "redis")]
            AppServices::Persistent { .. } => None,
        }
    }

    pub async fn get_user(&self, id: UserId) -> Result<UserDto, UserServiceError> {
        match self {
            AppServices::InMemory { users, .. } => users.get_by_id(id).await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { users, .. } => users.get_by_id(id).await,
        }
    }

    pub async fn create_user(&self, dto: CreateUserDto) -> Result<UserId, UserServiceError> {
        match self {
            AppServices::InMemory { users, .. } => users.create(dto).await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { users, .. } => users.create(dto).await,
        }
    }

    pub async fn update_user(&self, id: UserId, dto: UpdateUserDto) -> Result<(), UserServiceError> {
        match self {
            AppServices::InMemory { users, .. } => users.update(id, dto).await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { users, .. } => users.update(id, dto).await,
        }
    }

    pub async fn delete_user(&self, id: UserId) -> Result<(), UserServiceError> {
        match self {
            AppServices::InMemory { users, .. } => users.delete(id).await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { users, .. } => users.delete(id).await,
        }
    }
}

#[cfg(feature = "redis")]
impl AppServices {
    /// Create-user consumer bound to the persistent services; `None` when running in memory.
    ///
    /// The consumer gets its own connection since its blocking reads hold it.
    pub async fn create_user_consumer(
        &self,
        config: &Config,
    ) -> Result<Option<PersistentConsumer>, StartupError> {
        match self {
            AppServices::InMemory { .. } => Ok(None),
            AppServices::Persistent { users, .. } => {
                let conn = connect(&config.redis_url).await?;
                Ok(Some(CreateUserConsumer::new(
                    conn,
                    &config.streams.create_user_stream,
                    &config.streams.create_user_group,
                    format!("lure-api-{}", std::process::id()),
                    users.clone(),
                )))
            }
        }
    }
}
