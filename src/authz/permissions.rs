/// Permission Resolver
///
/// Loads a user's effective permission set: grants derived from the user's
/// role plus grants assigned to the user directly. The tables are owned by
/// the identity/role collaborator and read-only here.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn permissions_for(&self, user_id: Uuid) -> Result<HashSet<String>, AppError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgPermissionResolver {
    pool: PgPool,
}

impl PgPermissionResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionResolver for PgPermissionResolver {
    async fn permissions_for(&self, user_id: Uuid) -> Result<HashSet<String>, AppError> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.name
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            JOIN users u ON u.role = rp.role
            WHERE u.id = $1
            UNION
            SELECT p.name
            FROM permissions p
            JOIN user_permissions up ON up.permission_id = p.id
            WHERE up.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(names.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Static implementation
// ---------------------------------------------------------------------------

/// Fixed per-user grant map. Serves embedded deployments and tests; an
/// unknown user resolves to the empty set (deny by default).
#[derive(Default)]
pub struct StaticPermissionResolver {
    grants: HashMap<Uuid, HashSet<String>>,
}

impl StaticPermissionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, user_id: Uuid, permissions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.grants
            .entry(user_id)
            .or_default()
            .extend(permissions.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl PermissionResolver for StaticPermissionResolver {
    async fn permissions_for(&self, user_id: Uuid) -> Result<HashSet<String>, AppError> {
        Ok(self.grants.get(&user_id).cloned().unwrap_or_default())
    }
}
