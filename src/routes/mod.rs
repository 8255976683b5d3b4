mod auth;
mod health_check;

pub use auth::{
    invalidate_permissions, login, logout, me, refresh, revoke_sessions, LoginRequest,
    LoginResponse, LogoutRequest, RefreshRequest, RefreshResponse, SuccessResponse, UserProfile,
    UserTargetRequest,
};
pub use health_check::health_check;
