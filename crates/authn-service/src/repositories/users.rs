//! User store.
//!
//! Claim processors resolve a validated identity to a persisted user through
//! the [`UserStore`] trait. [`PgUserStore`] is the Postgres implementation;
//! [`mock::InMemoryUserStore`] backs unit and integration tests.
//!
//! # Security
//!
//! - All queries use parameterized statements (SQL injection safe)
//! - Identifiers and contact fields are not logged

use crate::errors::AuthError;
use crate::models::{NewUser, OrgData, User, UserUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

/// Persistent user store used by claim processors.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user by auxiliary identifier.
    async fn get_by_aux_id(&self, aux_id: &str) -> Result<Option<User>, AuthError>;

    /// Return the user with `aux_id`, creating it from `new_user` if absent.
    async fn get_or_create_by_aux_id(
        &self,
        aux_id: &str,
        new_user: NewUser,
    ) -> Result<User, AuthError>;

    /// Return the user with `starfleet_id`, creating it from `new_user` if absent.
    async fn get_or_create_by_starfleet_id(
        &self,
        starfleet_id: &str,
        new_user: NewUser,
    ) -> Result<User, AuthError>;

    /// Overwrite the fields set in `update`, bumping `updated_at`.
    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<User, AuthError>;
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    aux_id: Option<String>,
    starfleet_id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    org_data: Json<OrgData>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            aux_id: row.aux_id,
            starfleet_id: row.starfleet_id,
            email: row.email,
            name: row.name,
            org_data: row.org_data.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const USER_COLUMNS: &str =
    "id, aux_id, starfleet_id, email, name, org_data, created_at, updated_at";

/// Identifier column a lookup is keyed on.
#[derive(Clone, Copy)]
enum IdentityColumn {
    AuxId,
    StarfleetId,
}

impl IdentityColumn {
    fn name(self) -> &'static str {
        match self {
            IdentityColumn::AuxId => "aux_id",
            IdentityColumn::StarfleetId => "starfleet_id",
        }
    }
}

/// Postgres-backed user store.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn select_by(
        &self,
        column: IdentityColumn,
        value: &str,
    ) -> Result<Option<User>, AuthError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {} = $1",
            column.name()
        );
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Insert-if-absent followed by a select, so concurrent first logins
    /// converge on the same row.
    async fn get_or_create_by(
        &self,
        column: IdentityColumn,
        value: &str,
        new_user: NewUser,
    ) -> Result<User, AuthError> {
        if let Some(user) = self.select_by(column, value).await? {
            return Ok(user);
        }

        let sql = format!(
            r#"
            INSERT INTO users (id, {col}, email, name, org_data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT ({col}) DO NOTHING
            "#,
            col = column.name()
        );
        let inserted = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(value)
            .bind(new_user.email)
            .bind(new_user.name)
            .bind(Json(new_user.org_data))
            .execute(&self.pool)
            .await?
            .rows_affected();

        if inserted > 0 {
            tracing::info!(target: "authn.users", column = column.name(), "Created user on first login");
        }

        self.select_by(column, value).await?.ok_or_else(|| {
            AuthError::PersistenceFailure("user row missing after insert".to_string())
        })
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    #[instrument(skip_all)]
    async fn get_by_aux_id(&self, aux_id: &str) -> Result<Option<User>, AuthError> {
        self.select_by(IdentityColumn::AuxId, aux_id).await
    }

    #[instrument(skip_all)]
    async fn get_or_create_by_aux_id(
        &self,
        aux_id: &str,
        new_user: NewUser,
    ) -> Result<User, AuthError> {
        self.get_or_create_by(IdentityColumn::AuxId, aux_id, new_user)
            .await
    }

    #[instrument(skip_all)]
    async fn get_or_create_by_starfleet_id(
        &self,
        starfleet_id: &str,
        new_user: NewUser,
    ) -> Result<User, AuthError> {
        self.get_or_create_by(IdentityColumn::StarfleetId, starfleet_id, new_user)
            .await
    }

    #[instrument(skip_all, fields(user_id = %id))]
    async fn update(&self, id: Uuid, update: UserUpdate) -> Result<User, AuthError> {
        let sql = format!(
            r#"
            UPDATE users
            SET email = COALESCE($2, email),
                name = COALESCE($3, name),
                org_data = COALESCE($4, org_data),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(update.email)
            .bind(update.name)
            .bind(update.org_data.map(Json))
            .fetch_optional(&self.pool)
            .await?;

        row.map(User::from).ok_or_else(|| {
            AuthError::PersistenceFailure(format!("user {id} not found for update"))
        })
    }
}

/// In-memory store for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory [`UserStore`] that counts writes.
    #[derive(Default)]
    pub struct InMemoryUserStore {
        users: Mutex<Vec<User>>,
        creates: AtomicUsize,
        updates: AtomicUsize,
        fail_writes: bool,
    }

    impl InMemoryUserStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// A store whose creates and updates fail with `PersistenceFailure`.
        pub fn failing_writes() -> Self {
            Self {
                fail_writes: true,
                ..Self::default()
            }
        }

        /// Seed a user directly, bypassing write counters.
        pub fn insert(&self, user: User) {
            if let Ok(mut users) = self.users.lock() {
                users.retain(|u| u.id != user.id);
                users.push(user);
            }
        }

        /// Replace the organization data of the user with `aux_id`, creating
        /// the user if needed. Simulates an upstream profile sync.
        pub fn sync_org_data(&self, aux_id: &str, org_data: OrgData) {
            if let Ok(mut users) = self.users.lock() {
                let now = Utc::now();
                match users
                    .iter_mut()
                    .find(|u| u.aux_id.as_deref() == Some(aux_id))
                {
                    Some(user) => {
                        user.org_data = org_data;
                        user.updated_at = now;
                    }
                    None => users.push(User {
                        id: Uuid::new_v4(),
                        aux_id: Some(aux_id.to_string()),
                        starfleet_id: None,
                        email: None,
                        name: None,
                        org_data,
                        created_at: now,
                        updated_at: now,
                    }),
                }
            }
        }

        pub fn users(&self) -> Vec<User> {
            self.users.lock().map(|u| u.clone()).unwrap_or_default()
        }

        pub fn create_count(&self) -> usize {
            self.creates.load(Ordering::SeqCst)
        }

        pub fn update_count(&self) -> usize {
            self.updates.load(Ordering::SeqCst)
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<User>>, AuthError> {
            self.users
                .lock()
                .map_err(|_| AuthError::PersistenceFailure("store lock poisoned".to_string()))
        }

        fn get_or_create<F>(&self, matches: F, make: impl FnOnce() -> User) -> Result<User, AuthError>
        where
            F: Fn(&User) -> bool,
        {
            let mut users = self.lock()?;
            if let Some(user) = users.iter().find(|u| matches(u)) {
                return Ok(user.clone());
            }
            if self.fail_writes {
                return Err(AuthError::PersistenceFailure("insert failed".to_string()));
            }
            let user = make();
            users.push(user.clone());
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(user)
        }
    }

    fn new_record(
        aux_id: Option<&str>,
        starfleet_id: Option<&str>,
        new_user: NewUser,
    ) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            aux_id: aux_id.map(String::from),
            starfleet_id: starfleet_id.map(String::from),
            email: new_user.email,
            name: new_user.name,
            org_data: new_user.org_data,
            created_at: now,
            updated_at: now,
        }
    }

    #[async_trait]
    impl UserStore for InMemoryUserStore {
        async fn get_by_aux_id(&self, aux_id: &str) -> Result<Option<User>, AuthError> {
            let users = self.lock()?;
            Ok(users
                .iter()
                .find(|u| u.aux_id.as_deref() == Some(aux_id))
                .cloned())
        }

        async fn get_or_create_by_aux_id(
            &self,
            aux_id: &str,
            new_user: NewUser,
        ) -> Result<User, AuthError> {
            self.get_or_create(
                |u| u.aux_id.as_deref() == Some(aux_id),
                || new_record(Some(aux_id), None, new_user),
            )
        }

        async fn get_or_create_by_starfleet_id(
            &self,
            starfleet_id: &str,
            new_user: NewUser,
        ) -> Result<User, AuthError> {
            self.get_or_create(
                |u| u.starfleet_id.as_deref() == Some(starfleet_id),
                || new_record(None, Some(starfleet_id), new_user),
            )
        }

        async fn update(&self, id: Uuid, update: UserUpdate) -> Result<User, AuthError> {
            if self.fail_writes {
                return Err(AuthError::PersistenceFailure("update failed".to_string()));
            }
            let mut users = self.lock()?;
            let user = users
                .iter_mut()
                .find(|u| u.id == id)
                .ok_or_else(|| AuthError::PersistenceFailure(format!("user {id} not found")))?;
            update.apply_to(user);
            user.updated_at = Utc::now();
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(user.clone())
        }
    }
}
