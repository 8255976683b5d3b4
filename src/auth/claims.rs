/// JWT Claims structure
///
/// Payload of a signed access token: user identity plus the standard
/// JWT claims (RFC 7519). Never persisted; lives only inside the token.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Marker distinguishing access tokens from any other token the signer
/// might mint in the future. Verified on decode.
pub const TOKEN_TYPE_ACCESS: &str = "access";

/// Claims carried by an access token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// User email
    pub email: String,
    /// Role name used for role-based authorization
    pub role: String,
    /// Token type discriminator, always "access"
    pub token_type: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    pub fn new(
        user_id: Uuid,
        email: String,
        role: String,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            email,
            role,
            token_type: TOKEN_TYPE_ACCESS.to_string(),
            exp: now + expiry_seconds,
            iat: now,
            iss: issuer,
        }
    }

    /// Extract user ID from claims
    ///
    /// # Errors
    /// Returns error if user ID is not a valid UUID
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::Internal("Invalid user ID in token".to_string()))
    }

    pub fn is_access_token(&self) -> bool {
        self.token_type == TOKEN_TYPE_ACCESS
    }

    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp < now
    }
}
