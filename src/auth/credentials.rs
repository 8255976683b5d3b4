/// Credential Store
///
/// Read-only view of the principals owned by the user-management
/// collaborator: just enough to verify a login and re-check account status
/// when tokens are minted.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

/// Account status gate applied at login and on every token mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
        }
    }

    /// Unknown status strings deny: only an explicit "active" activates.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("active") {
            AccountStatus::Active
        } else {
            AccountStatus::Inactive
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

/// A stored principal as seen by the authentication flow
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub password_hash: String,
    pub status: AccountStatus,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredential>, AppError>;
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<StoredCredential>, AppError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type CredentialRow = (Uuid, String, String, String, String, String);

fn row_to_credential(row: CredentialRow) -> StoredCredential {
    let (id, email, name, role, password_hash, status) = row;
    StoredCredential {
        id,
        email,
        name,
        role,
        password_hash,
        status: AccountStatus::parse(&status),
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredential>, AppError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT id, email, name, role, password_hash, status
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_credential))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<StoredCredential>, AppError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT id, email, name, role, password_hash, status
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_credential))
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: Mutex<HashMap<Uuid, StoredCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = StoredCredential>) -> Self {
        let store = Self::new();
        for user in users {
            store.insert(user);
        }
        store
    }

    pub fn insert(&self, credential: StoredCredential) {
        let mut users = match self.users.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        users.insert(credential.id, credential);
    }

    /// Flip a stored account's status, mirroring what the user-management
    /// collaborator does on deactivation.
    pub fn set_status(&self, user_id: Uuid, status: AccountStatus) {
        let mut users = match self.users.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(credential) = users.get_mut(&user_id) {
            credential.status = status;
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<StoredCredential>, AppError> {
        let users = self
            .users
            .lock()
            .map_err(|_| AppError::Internal("credential store lock poisoned".to_string()))?;
        Ok(users.values().find(|c| c.email == email).cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<StoredCredential>, AppError> {
        let users = self
            .users
            .lock()
            .map_err(|_| AppError::Internal("credential store lock poisoned".to_string()))?;
        Ok(users.get(&user_id).cloned())
    }
}
