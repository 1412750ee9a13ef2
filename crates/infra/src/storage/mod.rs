//! Unit of work over the transactional store.
//!
//! ```text
//! UnitOfWorkFactory ──start_work──────► UnitOfWork ──users()──► UserRepository
//!        │                                  │  (tx + ChangeTracker)
//!        └──────start_read_work──► UnitOfReadWork ──users()──► UserReadRepository
//! ```
//!
//! Entities loaded or inserted through a [`UnitOfWork`] are tracked; [`UnitOfWork::save`]
//! writes back only those that changed and then commits.

mod change_tracker;
mod unit_of_work;
mod users;

use thiserror::Error;

use crate::store::StoreError;

pub use change_tracker::ChangeTracker;
pub use unit_of_work::{UnitOfReadWork, UnitOfWork, UnitOfWorkFactory};
pub use users::{UserReadRepository, UserRepository};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("user not found")]
    NotFound,

    /// The unit of work was already committed or rolled back.
    #[error("unit of work is already finished")]
    Finished,

    #[error(transparent)]
    Store(#[from] StoreError),
}
