use lure_core::EntityCollection;
use lure_users::User;

/// Per-unit-of-work registry of tracked entities, one collection per entity type.
///
/// Users are compared structurally: any field that differs from the snapshot marks the user
/// as changed.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    users: EntityCollection<User>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn users(&self) -> &EntityCollection<User> {
        &self.users
    }

    pub fn users_mut(&mut self) -> &mut EntityCollection<User> {
        &mut self.users
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Forget every tracked entity.
    pub fn clear(&mut self) {
        self.users.clear();
    }
}
