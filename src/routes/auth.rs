/// Authentication Routes
///
/// Login, token refresh, logout, current-user lookup, and the admin-only
/// session/permission management endpoints used when a user's account or
/// role assignment changes.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthService;
use crate::authz::{AuthenticatedUser, PermissionCache};
use crate::error::{AppError, ValidationError};
use crate::validators::{is_non_empty, is_valid_email};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTargetRequest {
    pub user_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: UserProfile,
}

#[derive(Serialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

fn client_ip(req: &HttpRequest) -> Option<String> {
    req.connection_info()
        .realip_remote_addr()
        .map(str::to_string)
}

fn parse_user_id(value: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value)
        .map_err(|_| AppError::Validation(ValidationError::InvalidFormat("userId".to_string())))
}

/// POST /auth/login
///
/// # Errors
/// - 400: Malformed email or empty password
/// - 401: Unknown email or wrong password (same message for both)
/// - 403: Account inactive
pub async fn login(
    form: web::Json<LoginRequest>,
    auth: web::Data<AuthService>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;
    is_non_empty(&form.password, "password")?;
    let ip = client_ip(&req);

    let session = auth.login(&email, &form.password, ip.as_deref()).await?;

    Ok(HttpResponse::Ok().json(LoginResponse {
        access_token: session.access_token,
        refresh_token: session.refresh_token,
        expires_in: session.expires_in,
        user: UserProfile {
            id: session.user.id.to_string(),
            name: session.user.name,
            email: session.user.email,
            role: session.user.role,
        },
    }))
}

/// POST /auth/refresh
///
/// Rotates the presented refresh token: the old token is revoked and a new
/// pair is issued. A rotated, revoked, or unknown token yields 401
/// "Invalid token"; an expired one yields 401 "Token expired".
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    auth: web::Data<AuthService>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    is_non_empty(&form.refresh_token, "refreshToken")?;
    let ip = client_ip(&req);

    let pair = auth.refresh(&form.refresh_token, ip.as_deref()).await?;

    Ok(HttpResponse::Ok().json(RefreshResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        expires_in: pair.expires_in,
    }))
}

/// POST /auth/logout
///
/// Idempotent: revoking an already-revoked or unknown token still returns
/// `{success: true}`.
pub async fn logout(
    form: web::Json<LogoutRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    is_non_empty(&form.refresh_token, "refreshToken")?;

    auth.logout(&form.refresh_token).await?;

    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}

/// GET /auth/me (requires authentication)
pub async fn me(
    user: web::ReqData<AuthenticatedUser>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let profile = auth.profile(user.id).await?;

    Ok(HttpResponse::Ok().json(UserProfile {
        id: profile.id.to_string(),
        name: profile.name,
        email: profile.email,
        role: profile.role,
    }))
}

/// POST /auth/permissions/invalidate (admin only)
///
/// Drops a user's cached permission decisions after their role or grants
/// changed; the next check re-queries the resolver.
pub async fn invalidate_permissions(
    form: web::Json<UserTargetRequest>,
    cache: web::Data<PermissionCache>,
) -> Result<HttpResponse, AppError> {
    let user_id = parse_user_id(&form.user_id)?;

    cache.invalidate_for_user(user_id);
    tracing::info!(user_id = %user_id, "Permission cache invalidated for user");

    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}

/// POST /auth/sessions/revoke (admin only)
///
/// Revokes every refresh token a user holds, e.g. on account deactivation.
pub async fn revoke_sessions(
    form: web::Json<UserTargetRequest>,
    auth: web::Data<AuthService>,
    cache: web::Data<PermissionCache>,
) -> Result<HttpResponse, AppError> {
    let user_id = parse_user_id(&form.user_id)?;

    auth.revoke_all_sessions(user_id).await?;
    // Revocation usually accompanies a role/status change, so stale
    // permission decisions go with it.
    cache.invalidate_for_user(user_id);

    Ok(HttpResponse::Ok().json(SuccessResponse { success: true }))
}
