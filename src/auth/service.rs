/// Authentication Service
///
/// Orchestrates login, refresh, and logout against the credential store,
/// refresh token store, and audit log. Collaborators are trait-object
/// fields, so the service composes over any storage backing.

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::audit::{AuditEvent, AuditLog};
use crate::auth::credentials::CredentialStore;
use crate::auth::jwt::generate_access_token;
use crate::auth::password::verify_password;
use crate::auth::refresh_token::{generate_refresh_token, RefreshTokenStore, RotationClaim};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// Principal snapshot returned alongside freshly minted tokens.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
}

/// Successful login: both tokens plus the principal they belong to.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub user: SessionUser,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Successful refresh: the rotated pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    audit: Arc<dyn AuditLog>,
    jwt: JwtSettings,
}

impl AuthService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        audit: Arc<dyn AuditLog>,
        jwt: JwtSettings,
    ) -> Self {
        Self {
            credentials,
            refresh_tokens,
            audit,
            jwt,
        }
    }

    pub fn jwt_settings(&self) -> &JwtSettings {
        &self.jwt
    }

    /// Authenticate an email/password pair and open a session.
    ///
    /// Unknown email and wrong password fail identically so account
    /// existence cannot be probed. The refresh token is persisted before
    /// the plaintext leaves this function.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        ip: Option<&str>,
    ) -> Result<AuthenticatedSession, AppError> {
        let credential = match self.credentials.find_by_email(email).await? {
            Some(credential) => credential,
            None => {
                self.audit.record(AuditEvent::LoginFailed {
                    email: email.to_string(),
                    ip: ip.map(str::to_string),
                });
                return Err(AppError::Auth(AuthError::InvalidCredentials));
            }
        };

        if !verify_password(password, &credential.password_hash)? {
            self.audit.record(AuditEvent::LoginFailed {
                email: email.to_string(),
                ip: ip.map(str::to_string),
            });
            return Err(AppError::Auth(AuthError::InvalidCredentials));
        }

        // Status is checked after the password so that probing with wrong
        // passwords reveals nothing about the account.
        if !credential.status.is_active() {
            return Err(AppError::Auth(AuthError::AccountInactive));
        }

        let access_token =
            generate_access_token(&credential.id, &credential.email, &credential.role, &self.jwt)?;
        let refresh_token = generate_refresh_token();
        self.refresh_tokens
            .save(credential.id, &refresh_token, ip, self.jwt.refresh_token_expiry)
            .await?;

        self.audit.record(AuditEvent::LoginSucceeded {
            user_id: credential.id,
            ip: ip.map(str::to_string),
        });

        Ok(AuthenticatedSession {
            user: SessionUser {
                id: credential.id,
                name: credential.name,
                email: credential.email,
                role: credential.role,
            },
            access_token,
            refresh_token,
            expires_in: self.jwt.access_token_expiry,
        })
    }

    /// Exchange a refresh token for a rotated pair.
    ///
    /// The store's claim is the serialization point: of two concurrent calls
    /// with the same token value, exactly one mints a pair, the other fails
    /// with `TokenInvalid`. Expired tokens are revoked as a side effect, and
    /// a revoked/expired token can never produce a pair again.
    pub async fn refresh(&self, token: &str, ip: Option<&str>) -> Result<TokenPair, AppError> {
        match self.refresh_tokens.claim_for_rotation(token).await? {
            RotationClaim::Claimed { user_id } => {
                // Re-verify the principal: rotation must not outlive a
                // deactivated or deleted account.
                let credential = self
                    .credentials
                    .find_by_id(user_id)
                    .await?
                    .ok_or(AppError::Auth(AuthError::TokenInvalid))?;
                if !credential.status.is_active() {
                    return Err(AppError::Auth(AuthError::AccountInactive));
                }

                let access_token = generate_access_token(
                    &credential.id,
                    &credential.email,
                    &credential.role,
                    &self.jwt,
                )?;
                let new_refresh_token = generate_refresh_token();
                self.refresh_tokens
                    .save(user_id, &new_refresh_token, ip, self.jwt.refresh_token_expiry)
                    .await?;

                self.audit.record(AuditEvent::TokenRefreshed {
                    user_id,
                    ip: ip.map(str::to_string),
                });

                Ok(TokenPair {
                    access_token,
                    refresh_token: new_refresh_token,
                    expires_in: self.jwt.access_token_expiry,
                })
            }
            RotationClaim::NotFound => Err(AppError::Auth(AuthError::TokenInvalid)),
            RotationClaim::AlreadyRevoked { user_id } => {
                self.audit.record(AuditEvent::RefreshReplayDetected {
                    user_id,
                    ip: ip.map(str::to_string),
                });
                Err(AppError::Auth(AuthError::TokenInvalid))
            }
            RotationClaim::Expired { user_id } => {
                tracing::info!(user_id = %user_id, "Expired refresh token presented");
                Err(AppError::Auth(AuthError::TokenExpired))
            }
        }
    }

    /// Revoke a refresh token. Idempotent: logging out twice, or with a
    /// token that was never issued, is not an error.
    pub async fn logout(&self, token: &str) -> Result<(), AppError> {
        let record = self.refresh_tokens.find(token).await?;
        let revoked = self.refresh_tokens.revoke(token).await?;

        if revoked {
            self.audit.record(AuditEvent::LoggedOut {
                user_id: record.map(|r| r.user_id),
            });
        }

        Ok(())
    }

    /// Revoke every session a user holds. Used when an account is
    /// deactivated or its role assignment changes.
    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64, AppError> {
        let count = self.refresh_tokens.revoke_all_for_user(user_id).await?;
        if count > 0 {
            self.audit
                .record(AuditEvent::SessionsRevoked { user_id, count });
        }
        Ok(count)
    }

    /// Load the current principal's profile; used by `/auth/me`.
    pub async fn profile(&self, user_id: Uuid) -> Result<SessionUser, AppError> {
        let credential = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::Auth(AuthError::TokenInvalid))?;

        if !credential.status.is_active() {
            return Err(AppError::Auth(AuthError::AccountInactive));
        }

        Ok(SessionUser {
            id: credential.id,
            name: credential.name,
            email: credential.email,
            role: credential.role,
        })
    }
}
