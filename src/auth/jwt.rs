/// Access Token Generation and Verification
///
/// Short-lived HS256 tokens signed with a server-held secret. A claim is
/// never trusted until both the signature and the expiry have been checked;
/// verification failures surface as authentication errors, never as an
/// anonymous pass-through.

use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::Claims;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// Generate a new access token for a user
///
/// # Errors
/// Returns error if token encoding fails (signing-key misconfiguration)
pub fn generate_access_token(
    user_id: &Uuid,
    email: &str,
    role: &str,
    config: &JwtSettings,
) -> Result<String, AppError> {
    let claims = Claims::new(
        *user_id,
        email.to_string(),
        role.to_string(),
        config.access_token_expiry,
        config.issuer.clone(),
    );

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

/// Verify a token's signature and expiry and extract its claims.
///
/// `TokenExpired` and `TokenInvalid` are distinguished so clients can decide
/// whether a refresh is worth attempting; both are a 401 at the boundary.
pub fn validate_access_token(token: &str, config: &JwtSettings) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::Auth(AuthError::TokenExpired),
        _ => {
            tracing::warn!(error = %e, "Access token validation failed");
            AppError::Auth(AuthError::TokenInvalid)
        }
    })?;

    // A correctly signed token of the wrong type is still not an access token.
    if !claims.is_access_token() {
        tracing::warn!(token_type = %claims.token_type, "Rejected non-access token");
        return Err(AppError::Auth(AuthError::TokenInvalid));
    }

    Ok(claims)
}
