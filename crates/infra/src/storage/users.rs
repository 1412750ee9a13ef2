use tracing::{debug, error, info, instrument};

use lure_core::{EntityCollection, Tracked, UserId};
use lure_users::User;

use super::StorageError;
use super::unit_of_work::Work;
use crate::store::StoreTransaction;

/// Read-write access to users inside a [`UnitOfWork`](super::UnitOfWork).
///
/// Every user this repository returns is tracked: mutate it through the handle and
/// `save` will write it back. Asking twice for the same id returns the same handle.
pub struct UserRepository<'w, T: StoreTransaction> {
    work: &'w mut Work<T>,
    users: &'w mut EntityCollection<User>,
}

impl<'w, T: StoreTransaction> UserRepository<'w, T> {
    pub(super) fn new(work: &'w mut Work<T>, users: &'w mut EntityCollection<User>) -> Self {
        Self { work, users }
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn get_by_id(&mut self, id: UserId) -> Result<Tracked<User>, StorageError> {
        let tx = self.work.tx_mut()?;

        if let Some(tracked) = self.users.get(&id) {
            debug!("user already tracked by this unit of work");
            return Ok(tracked);
        }

        let user = tx.select_user(id).await?.ok_or(StorageError::NotFound)?;
        let tracked = Tracked::new(user);
        self.users.add(&tracked);

        Ok(tracked)
    }

    /// Persist a new user and start tracking it.
    #[instrument(skip(self, user), fields(user_id = %user.id_typed()), err)]
    pub async fn insert(&mut self, user: User) -> Result<Tracked<User>, StorageError> {
        self.work.tx_mut()?.insert_user(&user).await?;

        let tracked = Tracked::new(user);
        self.users.add(&tracked);

        Ok(tracked)
    }

    /// Delete the user's row and stop tracking it.
    ///
    /// Returns `NotFound` if no row was deleted.
    pub async fn remove(&mut self, user: &Tracked<User>) -> Result<(), StorageError> {
        let id = user.lock().id_typed();

        let affected = self.work.tx_mut()?.delete_user(id).await?;
        self.users.remove(user);

        if affected == 0 {
            debug!(user_id = %id, "no users row to delete");
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    /// Write back one changed user. Only the unit of work calls this, during `save`.
    pub(super) async fn update(&mut self, user: &Tracked<User>) -> Result<(), StorageError> {
        let current = user.get();
        let id = current.id_typed();
        debug!(user_id = %id, "updating in users");

        let affected = match self.work.tx_mut()?.update_user(&current).await {
            Ok(affected) => affected,
            Err(e) => {
                error!(user_id = %id, error = %e, "could not update in users");
                return Err(e.into());
            }
        };

        if affected == 0 {
            error!(user_id = %id, "users row disappeared before update");
            return Err(StorageError::NotFound);
        }

        info!(user_id = %id, "updated in users");
        Ok(())
    }
}

/// Read-only access to users inside a [`UnitOfReadWork`](super::UnitOfReadWork).
///
/// Nothing is tracked; returned users are plain values.
pub struct UserReadRepository<'w, T: StoreTransaction> {
    work: &'w mut Work<T>,
}

impl<'w, T: StoreTransaction> UserReadRepository<'w, T> {
    pub(super) fn new(work: &'w mut Work<T>) -> Self {
        Self { work }
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn get_by_id(&mut self, id: UserId) -> Result<User, StorageError> {
        self.work
            .tx_mut()?
            .select_user(id)
            .await?
            .ok_or(StorageError::NotFound)
    }
}
