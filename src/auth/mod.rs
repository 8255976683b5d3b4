/// Authentication module
///
/// Access token issuance/verification, password verification, refresh token
/// storage and rotation, and the service that orchestrates login, refresh,
/// and logout.

mod audit;
mod claims;
mod cleanup;
mod credentials;
mod jwt;
mod password;
mod refresh_token;
mod service;

pub use audit::{AuditEvent, AuditLog, NoopAuditLog, TracingAuditLog};
pub use claims::{Claims, TOKEN_TYPE_ACCESS};
pub use cleanup::spawn_token_cleanup;
pub use credentials::{
    AccountStatus, CredentialStore, InMemoryCredentialStore, PgCredentialStore, StoredCredential,
};
pub use jwt::{generate_access_token, validate_access_token};
pub use password::{hash_password, verify_password};
pub use refresh_token::{
    generate_refresh_token, InMemoryRefreshTokenStore, PgRefreshTokenStore, RefreshTokenRecord,
    RefreshTokenStore, RotationClaim,
};
pub use service::{AuthService, AuthenticatedSession, SessionUser, TokenPair};
