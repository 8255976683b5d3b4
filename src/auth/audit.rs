/// Audit Log
///
/// Fire-and-forget recording of security-relevant authentication events.
/// Recording must never fail the auth flow, so the interface is infallible
/// and the default sink is the tracing pipeline.

use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum AuditEvent {
    LoginSucceeded {
        user_id: Uuid,
        ip: Option<String>,
    },
    LoginFailed {
        email: String,
        ip: Option<String>,
    },
    TokenRefreshed {
        user_id: Uuid,
        ip: Option<String>,
    },
    /// A revoked or rotated refresh token was presented again. Distinct from
    /// ordinary expiry because it can indicate a stolen token.
    RefreshReplayDetected {
        user_id: Uuid,
        ip: Option<String>,
    },
    LoggedOut {
        user_id: Option<Uuid>,
    },
    SessionsRevoked {
        user_id: Uuid,
        count: u64,
    },
}

pub trait AuditLog: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events as structured log lines.
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, event: AuditEvent) {
        match event {
            AuditEvent::LoginSucceeded { user_id, ip } => {
                tracing::info!(user_id = %user_id, ip = ?ip, "User logged in");
            }
            AuditEvent::LoginFailed { email, ip } => {
                tracing::warn!(email = %email, ip = ?ip, "Login failed");
            }
            AuditEvent::TokenRefreshed { user_id, ip } => {
                tracing::info!(user_id = %user_id, ip = ?ip, "Refresh token rotated");
            }
            AuditEvent::RefreshReplayDetected { user_id, ip } => {
                tracing::warn!(
                    user_id = %user_id,
                    ip = ?ip,
                    "Revoked refresh token presented again"
                );
            }
            AuditEvent::LoggedOut { user_id } => {
                tracing::info!(user_id = ?user_id, "User logged out");
            }
            AuditEvent::SessionsRevoked { user_id, count } => {
                tracing::info!(user_id = %user_id, count = count, "All sessions revoked for user");
            }
        }
    }
}

/// Discards events; used where no audit trail is wanted.
pub struct NoopAuditLog;

impl AuditLog for NoopAuditLog {
    fn record(&self, _event: AuditEvent) {}
}
