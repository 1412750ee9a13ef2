use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use lure_core::UserId;
use lure_users::User;

use super::{Store, StoreError, StoreTransaction, TxOptions, UserRows};

/// Counters of what the store was asked to do.
///
/// Row counters are bumped when the statement runs, not when it commits, so tests can assert
/// that a flush never issued an update even if the work was later rolled back.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub begun: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    /// Bumped on every committed write to a row, deletes included. Absent means 0.
    versions: HashMap<UserId, u64>,
    stats: StoreStats,
}

impl State {
    fn version(&self, id: &UserId) -> u64 {
        self.versions.get(id).copied().unwrap_or(0)
    }
}

/// In-memory store.
///
/// Intended for tests/dev. Transactions buffer their writes and apply them atomically on
/// commit. Concurrency control is optimistic: a read-write transaction fails to commit with
/// [`StoreError::Conflict`] if any row it read or wrote was committed by someone else since
/// it first looked at it (first committer wins).
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a committed row.
    pub fn with_user(self, user: User) -> Self {
        self.lock().users.insert(user.id_typed(), user);
        self
    }

    /// Committed row for `id`, if any.
    pub fn user(&self, id: UserId) -> Option<User> {
        self.lock().users.get(&id).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn stats(&self) -> StoreStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self, options: TxOptions) -> Result<InMemoryTransaction, StoreError> {
        self.lock().stats.begun += 1;
        debug!(access = ?options.access, "in-memory transaction started");

        Ok(InMemoryTransaction {
            store: self.clone(),
            read_only: options.is_read_only(),
            writes: HashMap::new(),
            seen: HashMap::new(),
            finished: false,
        })
    }
}

/// Pending writes of one transaction; `None` marks a delete.
#[derive(Debug)]
pub struct InMemoryTransaction {
    store: InMemoryStore,
    read_only: bool,
    writes: HashMap<UserId, Option<User>>,
    /// Committed row version at the first access to each row.
    seen: HashMap<UserId, u64>,
    finished: bool,
}

impl InMemoryTransaction {
    fn current(&mut self, id: UserId) -> Option<User> {
        if let Some(pending) = self.writes.get(&id) {
            return pending.clone();
        }

        let state = self.store.lock();
        self.seen.entry(id).or_insert_with(|| state.version(&id));
        state.users.get(&id).cloned()
    }

    /// First row whose committed version moved since this transaction read it.
    fn stale_row(&self, state: &State) -> Option<UserId> {
        self.seen
            .iter()
            .find(|(id, version)| state.version(id) != **version)
            .map(|(id, _)| *id)
    }

    fn ensure_writable(&self, operation: &str) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly(format!(
                "cannot execute {operation} in a read-only transaction"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRows for InMemoryTransaction {
    async fn select_user(&mut self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.current(id))
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        self.ensure_writable("insert_user")?;
        let id = user.id_typed();
        if self.current(id).is_some() {
            return Err(StoreError::Conflict(format!("user {id} already exists")));
        }

        self.store.lock().stats.inserts += 1;
        self.writes.insert(id, Some(user.clone()));
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> Result<u64, StoreError> {
        self.ensure_writable("update_user")?;
        self.store.lock().stats.updates += 1;

        let id = user.id_typed();
        if self.current(id).is_none() {
            return Ok(0);
        }
        self.writes.insert(id, Some(user.clone()));
        Ok(1)
    }

    async fn delete_user(&mut self, id: UserId) -> Result<u64, StoreError> {
        self.ensure_writable("delete_user")?;
        self.store.lock().stats.deletes += 1;

        if self.current(id).is_none() {
            return Ok(0);
        }
        self.writes.insert(id, None);
        Ok(1)
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn commit(mut self) -> Result<(), StoreError> {
        self.finished = true;
        let writes = std::mem::take(&mut self.writes);

        let mut state = self.store.lock();
        if !self.read_only {
            if let Some(id) = self.stale_row(&state) {
                state.stats.rollbacks += 1;
                debug!(%id, "in-memory transaction lost a write conflict");
                return Err(StoreError::Conflict(format!(
                    "user {id} was changed by a concurrent transaction"
                )));
            }
        }

        for (id, pending) in writes {
            match pending {
                Some(user) => state.users.insert(id, user),
                None => state.users.remove(&id),
            };
            *state.versions.entry(id).or_insert(0) += 1;
        }
        state.stats.commits += 1;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.store.lock().stats.rollbacks += 1;
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.store.lock().stats.rollbacks += 1;
            debug!("in-memory transaction dropped, rolled back");
        }
    }
}
