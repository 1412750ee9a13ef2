//! Transactional row store for the `users` table.
//!
//! The store is the only thing that talks to the database. Everything above it (repositories,
//! units of work) works against these traits, so the same code runs over Postgres in
//! production and over [`InMemoryStore`] in tests and dev mode.
//!
//! ## Transactions
//!
//! Every row operation happens inside a transaction opened with [`Store::begin`]. All
//! transactions are `SERIALIZABLE`; [`AccessMode::ReadOnly`] transactions are routed to the
//! replica when one is configured. A transaction that is dropped without `commit` or
//! `rollback` is rolled back.

use async_trait::async_trait;
use thiserror::Error;

use lure_core::UserId;
use lure_users::User;

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryStore, InMemoryTransaction, StoreStats};
pub use postgres::{PgStore, PgTransaction};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IsolationLevel {
    Serializable,
}

impl IsolationLevel {
    fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub access: AccessMode,
}

impl TxOptions {
    pub fn read_write() -> Self {
        Self {
            isolation: IsolationLevel::Serializable,
            access: AccessMode::ReadWrite,
        }
    }

    pub fn read_only() -> Self {
        Self {
            isolation: IsolationLevel::Serializable,
            access: AccessMode::ReadOnly,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.access == AccessMode::ReadOnly
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Serialization failure or unique violation; the transaction lost a race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A write was attempted inside a read-only transaction.
    #[error("read-only transaction: {0}")]
    ReadOnly(String),

    #[error("connection pool closed")]
    PoolClosed,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("failed to decode row: {0}")]
    Decode(String),

    #[error("database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
        code: Option<String>,
    },
}

/// Row operations on the `users` table, executed inside the current transaction.
#[async_trait]
pub trait UserRows: Send {
    async fn select_user(&mut self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError>;

    /// Overwrite every column of the row keyed by `user`'s id. Returns rows affected.
    async fn update_user(&mut self, user: &User) -> Result<u64, StoreError>;

    /// Returns rows affected.
    async fn delete_user(&mut self, id: UserId) -> Result<u64, StoreError>;
}

/// An open transaction.
#[async_trait]
pub trait StoreTransaction: UserRows + Sized + 'static {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Something that can open transactions.
#[async_trait]
pub trait Store: Send + Sync {
    type Tx: StoreTransaction;

    async fn begin(&self, options: TxOptions) -> Result<Self::Tx, StoreError>;
}

#[async_trait]
impl<S> Store for std::sync::Arc<S>
where
    S: Store + ?Sized,
{
    type Tx = S::Tx;

    async fn begin(&self, options: TxOptions) -> Result<Self::Tx, StoreError> {
        (**self).begin(options).await
    }
}
