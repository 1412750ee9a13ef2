use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use lure_core::{DomainError, DomainResult, Entity, UserId};
use lure_events::{Event, EventVariant};

/// Entity: User.
///
/// `updated_at` is the user's version signal: every mutation moves it strictly forward.
/// Timestamps are kept at microsecond precision so they survive a round-trip through
/// the store unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    id: UserId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    name: String,
    email: String,
}

impl User {
    /// Create a brand-new user.
    pub fn create(name: impl Into<String>, email: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        let email = email.into();
        validate(&name, &email)?;

        let now = now();
        Ok(Self {
            id: UserId::new(),
            created_at: now,
            updated_at: now,
            name,
            email,
        })
    }

    /// Rebuild a user from stored state (no validation).
    pub fn restore(
        id: UserId,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        name: String,
        email: String,
    ) -> Self {
        Self {
            id,
            created_at,
            updated_at,
            name,
            email,
        }
    }

    pub fn id_typed(&self) -> UserId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Replace name and email, bumping `updated_at`.
    pub fn update(&mut self, name: impl Into<String>, email: impl Into<String>) -> DomainResult<()> {
        let name = name.into();
        let email = email.into();
        validate(&name, &email)?;

        self.name = name;
        self.email = email;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        let now = now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn validate(name: &str, email: &str) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name must not be empty"));
    }

    match email.split_once('@') {
        Some((local, domain)) if !local.trim().is_empty() && !domain.trim().is_empty() => Ok(()),
        _ => Err(DomainError::validation("email must look like local@domain")),
    }
}

/// Event: a user was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreated {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserCreated {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            created_at: user.created_at,
            updated_at: user.updated_at,
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

/// User domain events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserEvent {
    Created(UserCreated),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UserEventKind {
    Created,
}

impl Event for UserEvent {
    type Kind = UserEventKind;

    fn kind(&self) -> UserEventKind {
        match self {
            UserEvent::Created(_) => UserEventKind::Created,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Created(_) => "users.created",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::Created(e) => e.created_at,
        }
    }
}

impl EventVariant<UserEvent> for UserCreated {
    const KIND: UserEventKind = UserEventKind::Created;

    fn extract(event: UserEvent) -> Result<Self, UserEvent> {
        match event {
            UserEvent::Created(e) => Ok(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn create_sets_both_timestamps_to_the_same_instant() {
        let user = User::create("Ada", "ada@example.com").unwrap();

        assert_eq!(user.created_at(), user.updated_at());
        assert_eq!(user.name(), "Ada");
        assert_eq!(user.email(), "ada@example.com");
    }

    #[test]
    fn create_rejects_blank_name() {
        let err = User::create("   ", "ada@example.com").unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("name")));
    }

    #[test]
    fn create_rejects_email_without_at_sign() {
        let err = User::create("Ada", "ada.example.com").unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("email")));

        assert!(User::create("Ada", "@example.com").is_err());
        assert!(User::create("Ada", "ada@").is_err());
    }

    #[test]
    fn update_moves_updated_at_forward_even_within_the_same_microsecond() {
        let mut user = User::create("Ada", "ada@example.com").unwrap();
        let created = user.clone();

        user.update("Grace", "grace@example.com").unwrap();
        let first = user.updated_at();
        user.update("Grace", "grace@example.com").unwrap();

        assert!(first > created.updated_at());
        assert!(user.updated_at() > first);
        assert_eq!(user.created_at(), created.created_at());
        assert_eq!(user.id_typed(), created.id_typed());
    }

    #[test]
    fn failed_update_leaves_the_user_untouched() {
        let mut user = User::create("Ada", "ada@example.com").unwrap();
        let before = user.clone();

        assert!(user.update("", "grace@example.com").is_err());

        assert_eq!(user, before);
    }

    #[test]
    fn user_created_event_carries_the_user_state() {
        let user = User::create("Ada", "ada@example.com").unwrap();
        let event = UserEvent::Created(UserCreated::from(&user));

        assert_eq!(event.kind(), UserEventKind::Created);
        assert_eq!(event.event_type(), "users.created");
        assert_eq!(event.occurred_at(), user.created_at());

        let payload = UserCreated::extract(event).unwrap();
        assert_eq!(payload.id, user.id_typed());
        assert_eq!(payload.name, "Ada");
    }

    #[test]
    fn user_created_serializes_with_snake_case_fields() {
        let user = User::create("Ada", "ada@example.com").unwrap();
        let json = serde_json::to_value(UserCreated::from(&user)).unwrap();

        assert_eq!(json["id"], user.id_typed().to_string());
        assert_eq!(json["name"], "Ada");
        assert_eq!(json["email"], "ada@example.com");
        assert!(json.get("created_at").is_some());
        assert!(json.get("updated_at").is_some());
    }

    proptest! {
        /// Property: any sequence of valid updates strictly increases `updated_at`.
        #[test]
        fn updated_at_is_strictly_increasing(names in prop::collection::vec("[a-z]{1,8}", 1..16)) {
            let mut user = User::create("seed", "seed@example.com").unwrap();
            let mut previous = user.updated_at();

            for name in names {
                user.update(name.clone(), format!("{name}@example.com")).unwrap();
                prop_assert!(user.updated_at() > previous);
                previous = user.updated_at();
            }
        }
    }
}
