use std::mem;

use tracing::{debug, error, info, instrument};

use super::users::{UserReadRepository, UserRepository};
use super::{ChangeTracker, StorageError};
use crate::store::{Store, StoreError, StoreTransaction, TxOptions};

enum WorkState<T> {
    Active(T),
    Committed,
    RolledBack,
}

/// Transaction lifecycle shared by both kinds of unit of work.
///
/// `Active → Committed` or `Active → RolledBack`; once finished, further commits and
/// rollbacks are successful no-ops.
pub(super) struct Work<T: StoreTransaction> {
    state: WorkState<T>,
    name: &'static str,
}

impl<T: StoreTransaction> Work<T> {
    fn new(tx: T, name: &'static str) -> Self {
        Self {
            state: WorkState::Active(tx),
            name,
        }
    }

    pub(super) fn tx_mut(&mut self) -> Result<&mut T, StorageError> {
        match &mut self.state {
            WorkState::Active(tx) => Ok(tx),
            WorkState::Committed | WorkState::RolledBack => Err(StorageError::Finished),
        }
    }

    fn is_finished(&self) -> bool {
        !matches!(self.state, WorkState::Active(_))
    }

    fn take_active(&mut self, next: WorkState<T>) -> Option<T> {
        match mem::replace(&mut self.state, next) {
            WorkState::Active(tx) => Some(tx),
            finished => {
                self.state = finished;
                debug!(work = self.name, "work is already finished");
                None
            }
        }
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        let Some(tx) = self.take_active(WorkState::Committed) else {
            return Ok(());
        };

        if let Err(e) = tx.commit().await {
            self.state = WorkState::RolledBack;
            error!(work = self.name, error = %e, "could not save work");
            return Err(e.into());
        }

        info!(work = self.name, "saved work");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        let Some(tx) = self.take_active(WorkState::RolledBack) else {
            return Ok(());
        };

        if let Err(e) = tx.rollback().await {
            error!(work = self.name, error = %e, "could not cancel work");
            return Err(e.into());
        }

        info!(work = self.name, "cancelled work");
        Ok(())
    }
}

impl<T: StoreTransaction> Drop for Work<T> {
    fn drop(&mut self) {
        if let WorkState::Active(_) = self.state {
            // The transaction's own drop performs the rollback.
            debug!(work = self.name, "work dropped while active, rolling back");
        }
    }
}

/// One read-write transaction plus the change tracker of everything loaded through it.
pub struct UnitOfWork<T: StoreTransaction> {
    work: Work<T>,
    tracker: ChangeTracker,
}

impl<T: StoreTransaction> UnitOfWork<T> {
    pub fn new(tx: T) -> Self {
        Self {
            work: Work::new(tx, "unit of work"),
            tracker: ChangeTracker::new(),
        }
    }

    /// Users repository bound to this unit's transaction and tracker.
    pub fn users(&mut self) -> UserRepository<'_, T> {
        UserRepository::new(&mut self.work, self.tracker.users_mut())
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn is_finished(&self) -> bool {
        self.work.is_finished()
    }

    /// Write back every changed tracked entity, then commit.
    ///
    /// Stops at the first failed write without committing; the unit stays active so the
    /// caller can cancel it (or simply drop it).
    #[instrument(skip(self), err)]
    pub async fn save(&mut self) -> Result<(), StorageError> {
        if self.work.is_finished() {
            debug!("unit of work is already finished");
            return Ok(());
        }
        debug!("saving unit of work");

        let changed = self.tracker.users().changed();
        let mut users = UserRepository::new(&mut self.work, self.tracker.users_mut());
        for user in &changed {
            if let Err(e) = users.update(user).await {
                error!(error = %e, "could not save unit of work");
                return Err(e);
            }
        }

        self.work.commit().await?;
        self.tracker.clear();
        Ok(())
    }

    /// Roll back everything done in this unit, inserts and deletes included.
    #[instrument(skip(self), err)]
    pub async fn cancel(&mut self) -> Result<(), StorageError> {
        debug!("cancelling unit of work");
        self.work.rollback().await?;
        self.tracker.clear();
        Ok(())
    }
}

/// One read-only transaction. Nothing loaded through it is tracked.
pub struct UnitOfReadWork<T: StoreTransaction> {
    work: Work<T>,
}

impl<T: StoreTransaction> UnitOfReadWork<T> {
    pub fn new(tx: T) -> Self {
        Self {
            work: Work::new(tx, "unit of read work"),
        }
    }

    pub fn users(&mut self) -> UserReadRepository<'_, T> {
        UserReadRepository::new(&mut self.work)
    }

    pub fn is_finished(&self) -> bool {
        self.work.is_finished()
    }

    /// Commit the read-only transaction.
    #[instrument(skip(self), err)]
    pub async fn save(&mut self) -> Result<(), StorageError> {
        self.work.commit().await
    }

    #[instrument(skip(self), err)]
    pub async fn cancel(&mut self) -> Result<(), StorageError> {
        self.work.rollback().await
    }
}

/// Opens units of work against a [`Store`].
#[derive(Debug, Clone)]
pub struct UnitOfWorkFactory<S> {
    store: S,
}

impl<S: Store> UnitOfWorkFactory<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Serializable read-write transaction on the primary.
    #[instrument(skip(self), err)]
    pub async fn start_work(&self) -> Result<UnitOfWork<S::Tx>, StoreError> {
        debug!("starting new unit of work");
        let tx = self
            .store
            .begin(TxOptions::read_write())
            .await
            .inspect_err(|e| error!(error = %e, "could not start new unit of work"))?;

        info!("started new unit of work");
        Ok(UnitOfWork::new(tx))
    }

    /// Serializable read-only transaction, on the replica when one is configured.
    #[instrument(skip(self), err)]
    pub async fn start_read_work(&self) -> Result<UnitOfReadWork<S::Tx>, StoreError> {
        debug!("starting new unit of read work");
        let tx = self
            .store
            .begin(TxOptions::read_only())
            .await
            .inspect_err(|e| error!(error = %e, "could not start new unit of read work"))?;

        info!("started new unit of read work");
        Ok(UnitOfReadWork::new(tx))
    }
}
