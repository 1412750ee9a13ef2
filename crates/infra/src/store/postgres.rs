//! Postgres-backed store.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (serialization failure) | `40001` | `Conflict` | Concurrent serializable transactions collided |
//! | Database (unique violation) | `23505` | `Conflict` | Insert of an id that already exists |
//! | Database (read-only transaction) | `25006` | `ReadOnly` | Write issued inside a read-only transaction |
//! | Database (other) | Any other | `Database` | Other database errors (code preserved) |
//! | PoolClosed | N/A | `PoolClosed` | Connection pool was closed |
//! | ColumnDecode / Decode | N/A | `Decode` | Row did not match the expected shape |
//! | Other | N/A | `Connection` | Network errors, timeouts, TLS failures, etc. |
//!
//! ## Replicas
//!
//! Read-only transactions go to the replica pool when one is configured and to the primary
//! otherwise. The replica is never written to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use lure_core::UserId;
use lure_users::User;

use super::{Store, StoreError, StoreTransaction, TxOptions, UserRows};

/// Postgres store over a primary pool and an optional read replica.
///
/// `PgPool` is reference counted, so cloning the store is cheap and every clone shares
/// the same connections.
#[derive(Debug, Clone)]
pub struct PgStore {
    primary: PgPool,
    replica: Option<PgPool>,
}

impl PgStore {
    pub fn new(primary: PgPool, replica: Option<PgPool>) -> Self {
        Self { primary, replica }
    }

    /// Open lazily-connecting pools for the primary and (optionally) the replica.
    pub fn connect_lazy(
        primary_url: &str,
        replica_url: Option<&str>,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let options = PgPoolOptions::new().max_connections(max_connections);

        let primary = options
            .clone()
            .connect_lazy(primary_url)
            .map_err(|e| map_sqlx_error("connect_primary", e))?;
        let replica = replica_url
            .map(|url| options.connect_lazy(url))
            .transpose()
            .map_err(|e| map_sqlx_error("connect_replica", e))?;

        Ok(Self::new(primary, replica))
    }

    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    /// Apply the embedded schema migrations to the primary.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.primary)
            .await
            .map_err(|e| StoreError::Database {
                operation: "migrate",
                message: e.to_string(),
                code: None,
            })
    }

    fn pool_for(&self, options: &TxOptions) -> &PgPool {
        match (&self.replica, options.is_read_only()) {
            (Some(replica), true) => replica,
            _ => &self.primary,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTransaction;

    #[instrument(skip(self), fields(access = ?options.access), err)]
    async fn begin(&self, options: TxOptions) -> Result<PgTransaction, StoreError> {
        let mut tx = self
            .pool_for(&options)
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // Must be the first statement of the transaction.
        let access = if options.is_read_only() {
            "READ ONLY"
        } else {
            "READ WRITE"
        };
        let statement = format!(
            "SET TRANSACTION ISOLATION LEVEL {}, {}",
            options.isolation.as_sql(),
            access
        );
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        debug!(%statement, "transaction started");
        Ok(PgTransaction { tx })
    }
}

/// An open Postgres transaction. Dropping it without commit rolls it back.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransaction").finish_non_exhaustive()
    }
}

#[async_trait]
impl UserRows for PgTransaction {
    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn select_user(&mut self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, created_at, updated_at, name, email
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("select_user", e))?;

        row.map(|row| {
            UserRow::from_row(&row)
                .map(User::from)
                .map_err(|e| StoreError::Decode(format!("failed to decode users row: {e}")))
        })
        .transpose()
    }

    #[instrument(skip(self, user), fields(user_id = %user.id_typed()), err)]
    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, created_at, updated_at, name, email)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id_typed().as_uuid())
        .bind(user.created_at())
        .bind(user.updated_at())
        .bind(user.name())
        .bind(user.email())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;

        Ok(())
    }

    #[instrument(skip(self, user), fields(user_id = %user.id_typed()), err)]
    async fn update_user(&mut self, user: &User) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET (created_at, updated_at, name, email) = ($1, $2, $3, $4)
            WHERE id = $5
            "#,
        )
        .bind(user.created_at())
        .bind(user.updated_at())
        .bind(user.name())
        .bind(user.email())
        .bind(user.id_typed().as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_user(&mut self, id: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Raw `users` row.
#[derive(Debug)]
struct UserRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    name: String,
    email: String,
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
        })
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User::restore(
            UserId::from_uuid(row.id),
            row.created_at,
            row.updated_at,
            row.name,
            row.email,
        )
    }
}

/// Map SQLx errors to `StoreError`, keeping the failing operation for context.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            let code = db_err.code().map(|c| c.into_owned());

            match code.as_deref() {
                Some("40001") | Some("23505") => StoreError::Conflict(msg),
                Some("25006") => StoreError::ReadOnly(msg),
                _ => StoreError::Database {
                    operation,
                    message: db_err.message().to_string(),
                    code,
                },
            }
        }
        sqlx::Error::PoolClosed => StoreError::PoolClosed,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("{} in {}", err, operation))
        }
        _ => StoreError::Connection(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_to_pool_closed() {
        assert!(matches!(
            map_sqlx_error("begin", sqlx::Error::PoolClosed),
            StoreError::PoolClosed
        ));
    }

    #[test]
    fn transport_errors_keep_the_operation() {
        let err = map_sqlx_error("select_user", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Connection(msg) if msg.contains("select_user")));
    }

    #[test]
    fn user_row_restores_without_validation() {
        let now = Utc::now();
        let row = UserRow {
            id: Uuid::now_v7(),
            created_at: now,
            updated_at: now,
            name: String::new(),
            email: "legacy".to_string(),
        };
        let id = row.id;

        let user = User::from(row);

        assert_eq!(*user.id_typed().as_uuid(), id);
        assert_eq!(user.email(), "legacy");
    }
}
