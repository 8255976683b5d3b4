/// Refresh Token Store
///
/// Refresh tokens are cryptographically random 64-character strings, hashed
/// with SHA-256 before storage (plaintext never touches the database) and
/// looked up by exact match on the hash.
///
/// Lifecycle per token: Active -> Rotated (successful refresh revokes the old
/// token and creates a replacement), Active -> Revoked (logout), or
/// Active -> Expired (checked lazily on use). All three terminal states are
/// absorbing: once a token leaves Active it can never again yield a token
/// pair. Rows are deleted only by the retention sweep, never by normal flows.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

/// Generate a new cryptographically secure refresh token.
///
/// The plaintext is what the client stores; the server keeps only the hash.
pub fn generate_refresh_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// Hash a refresh token with SHA-256 for at-rest storage and lookup.
pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A persisted refresh token record
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub created_by_ip: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    pub fn is_active(&self) -> bool {
        !self.is_revoked && !self.is_expired()
    }
}

/// Outcome of an atomic rotation claim on a token value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationClaim {
    /// This caller won the claim; the old token is now revoked and the
    /// caller must mint the replacement.
    Claimed { user_id: Uuid },
    /// No record for this token value.
    NotFound,
    /// Token was already revoked or rotated. Under concurrent use of one
    /// token value this is what the losing caller sees.
    AlreadyRevoked { user_id: Uuid },
    /// Token was past expiry; it has been revoked as a side effect.
    Expired { user_id: Uuid },
}

/// Persistence seam for refresh tokens.
///
/// `claim_for_rotation` must serialize concurrent claims on the same token
/// value: exactly one caller gets `Claimed`, every other sees a terminal
/// outcome. Claims on different tokens proceed independently.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Persist a newly issued token. Must complete before the plaintext is
    /// handed to the client.
    async fn save(
        &self,
        user_id: Uuid,
        token: &str,
        created_by_ip: Option<&str>,
        expiry_seconds: i64,
    ) -> Result<(), AppError>;

    async fn find(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AppError>;

    /// Atomically revoke the token iff it is currently active ("revoke iff
    /// active"); classify the failure otherwise.
    async fn claim_for_rotation(&self, token: &str) -> Result<RotationClaim, AppError>;

    /// Revoke a single token. Returns true when a live token was revoked,
    /// false when the token was unknown or already revoked (logout stays
    /// idempotent on top of this).
    async fn revoke(&self, token: &str) -> Result<bool, AppError>;

    /// Revoke every active token a user holds (logout everywhere).
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError>;

    /// Retention sweep: delete tokens that expired or were revoked longer
    /// than `retention` ago. The only operation that deletes rows.
    async fn delete_expired(&self, retention: Duration) -> Result<u64, AppError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn save(
        &self,
        user_id: Uuid,
        token: &str,
        created_by_ip: Option<&str>,
        expiry_seconds: i64,
    ) -> Result<(), AppError> {
        let token_hash = hash_token(token);
        let now = Utc::now();
        let expires_at = now + Duration::seconds(expiry_seconds);

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, created_by_ip, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token_hash)
        .bind(created_by_ip)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AppError> {
        let token_hash = hash_token(token);

        let row = sqlx::query_as::<
            _,
            (
                Uuid,
                Uuid,
                String,
                Option<String>,
                DateTime<Utc>,
                bool,
                Option<DateTime<Utc>>,
                DateTime<Utc>,
            ),
        >(
            r#"
            SELECT id, user_id, token_hash, created_by_ip, expires_at, is_revoked, revoked_at, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(id, user_id, token_hash, created_by_ip, expires_at, is_revoked, revoked_at, created_at)| {
                RefreshTokenRecord {
                    id,
                    user_id,
                    token_hash,
                    created_by_ip,
                    expires_at,
                    is_revoked,
                    revoked_at,
                    created_at,
                }
            },
        ))
    }

    async fn claim_for_rotation(&self, token: &str) -> Result<RotationClaim, AppError> {
        let token_hash = hash_token(token);
        let now = Utc::now();

        // Conditional update is the serialization point: of any number of
        // concurrent claims on one token value, the row transitions out of
        // Active exactly once.
        let claimed = sqlx::query_as::<_, (Uuid,)>(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = true, revoked_at = $1
            WHERE token_hash = $2 AND is_revoked = false AND expires_at > $1
            RETURNING user_id
            "#,
        )
        .bind(now)
        .bind(&token_hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((user_id,)) = claimed {
            return Ok(RotationClaim::Claimed { user_id });
        }

        let existing = sqlx::query_as::<_, (Uuid, DateTime<Utc>, bool)>(
            r#"
            SELECT user_id, expires_at, is_revoked
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            None => Ok(RotationClaim::NotFound),
            Some((user_id, _, true)) => Ok(RotationClaim::AlreadyRevoked { user_id }),
            Some((user_id, _, false)) => {
                // Not claimable and not revoked means it sat past expiry.
                // Lazy expiry: mark it revoked so it can never be claimed.
                sqlx::query(
                    r#"
                    UPDATE refresh_tokens
                    SET is_revoked = true, revoked_at = $1
                    WHERE token_hash = $2 AND is_revoked = false
                    "#,
                )
                .bind(now)
                .bind(&token_hash)
                .execute(&self.pool)
                .await?;

                Ok(RotationClaim::Expired { user_id })
            }
        }
    }

    async fn revoke(&self, token: &str) -> Result<bool, AppError> {
        let token_hash = hash_token(token);

        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = true, revoked_at = $1
            WHERE token_hash = $2 AND is_revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(&token_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = true, revoked_at = $1
            WHERE user_id = $2 AND is_revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, retention: Duration) -> Result<u64, AppError> {
        let cutoff = Utc::now() - retention;

        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE expires_at < $1
               OR (is_revoked = true AND revoked_at < $1)
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Mutex-guarded map keyed by token hash. Claim semantics match the Postgres
/// store: the check-then-revoke happens under one lock acquisition, so
/// concurrent claims on the same token value resolve to exactly one winner.
#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    records: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, RefreshTokenRecord>>, AppError> {
        self.records
            .lock()
            .map_err(|_| AppError::Internal("refresh token store lock poisoned".to_string()))
    }

    pub fn token_count(&self) -> usize {
        match self.records.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn save(
        &self,
        user_id: Uuid,
        token: &str,
        created_by_ip: Option<&str>,
        expiry_seconds: i64,
    ) -> Result<(), AppError> {
        let token_hash = hash_token(token);
        let now = Utc::now();
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.clone(),
            created_by_ip: created_by_ip.map(str::to_string),
            expires_at: now + Duration::seconds(expiry_seconds),
            is_revoked: false,
            revoked_at: None,
            created_at: now,
        };

        self.lock()?.insert(token_hash, record);
        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AppError> {
        let token_hash = hash_token(token);
        Ok(self.lock()?.get(&token_hash).cloned())
    }

    async fn claim_for_rotation(&self, token: &str) -> Result<RotationClaim, AppError> {
        let token_hash = hash_token(token);
        let now = Utc::now();
        let mut records = self.lock()?;

        let record = match records.get_mut(&token_hash) {
            Some(record) => record,
            None => return Ok(RotationClaim::NotFound),
        };

        if record.is_revoked {
            return Ok(RotationClaim::AlreadyRevoked {
                user_id: record.user_id,
            });
        }

        record.is_revoked = true;
        record.revoked_at = Some(now);

        if record.expires_at < now {
            return Ok(RotationClaim::Expired {
                user_id: record.user_id,
            });
        }

        Ok(RotationClaim::Claimed {
            user_id: record.user_id,
        })
    }

    async fn revoke(&self, token: &str) -> Result<bool, AppError> {
        let token_hash = hash_token(token);
        let mut records = self.lock()?;

        match records.get_mut(&token_hash) {
            Some(record) if !record.is_revoked => {
                record.is_revoked = true;
                record.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let now = Utc::now();
        let mut revoked = 0;

        for record in self.lock()?.values_mut() {
            if record.user_id == user_id && !record.is_revoked {
                record.is_revoked = true;
                record.revoked_at = Some(now);
                revoked += 1;
            }
        }

        Ok(revoked)
    }

    async fn delete_expired(&self, retention: Duration) -> Result<u64, AppError> {
        let cutoff = Utc::now() - retention;
        let mut records = self.lock()?;

        let before = records.len() as u64;
        records.retain(|_, record| {
            let expired_out = record.expires_at < cutoff;
            let revoked_out = record.revoked_at.map(|at| at < cutoff).unwrap_or(false);
            !expired_out && !revoked_out
        });

        Ok(before - records.len() as u64)
    }
}
