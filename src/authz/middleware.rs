/// Authorization Middleware
///
/// Three composable guards:
/// - `RequireAuth` verifies the bearer token and attaches the authenticated
///   principal to the request.
/// - `RequireRole` permits a set of roles (empty set = any authenticated
///   principal).
/// - `RequirePermissions` enforces that the principal holds every listed
///   permission, consulting the shared permission cache and falling back to
///   the resolver on a miss. The `admin` role bypasses permission checks.
///
/// actix executes the most recently registered `wrap` first, so on a scope
/// the guards are registered before `RequireAuth`:
/// `.wrap(RequirePermissions::new(..)).wrap(RequireAuth::new(..))`.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use uuid::Uuid;

use crate::auth::validate_access_token;
use crate::authz::cache::PermissionCache;
use crate::authz::permissions::PermissionResolver;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};

/// Role whose members bypass permission checks entirely.
pub const ADMIN_ROLE: &str = "admin";

/// Typed principal attached to the request by `RequireAuth`; downstream
/// handlers extract it with `web::ReqData<AuthenticatedUser>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub role: String,
    pub email: String,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// RequireAuth
// ---------------------------------------------------------------------------

/// Bearer-token authentication for protected routes.
pub struct RequireAuth {
    jwt_config: JwtSettings,
}

impl RequireAuth {
    pub fn new(jwt_config: JwtSettings) -> Self {
        Self { jwt_config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireAuthService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequireAuthService {
            service: Rc::new(service),
            jwt_config: self.jwt_config.clone(),
        }))
    }
}

pub struct RequireAuthService<S> {
    service: Rc<S>,
    jwt_config: JwtSettings,
}

impl<S, B> Service<ServiceRequest> for RequireAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = match bearer_token(&req) {
            Some(token) => token,
            None => {
                tracing::warn!("Missing or malformed Authorization header");
                return Box::pin(async move {
                    Err(AppError::Auth(AuthError::MissingToken).into())
                });
            }
        };

        match validate_access_token(&token, &self.jwt_config) {
            Ok(claims) => {
                let user_id = match claims.user_id() {
                    Ok(id) => id,
                    Err(_) => {
                        tracing::warn!("Access token carried a malformed subject");
                        return Box::pin(async move {
                            Err(AppError::Auth(AuthError::TokenInvalid).into())
                        });
                    }
                };

                let user = AuthenticatedUser {
                    id: user_id,
                    role: claims.role.clone(),
                    email: claims.email.clone(),
                };
                tracing::debug!(user_id = %user.id, role = %user.role, "Access token verified");
                req.extensions_mut().insert(user);

                let service = Rc::clone(&self.service);
                Box::pin(async move { service.call(req).await })
            }
            // Expired and invalid are distinguished for client retry logic;
            // both deny with a 401.
            Err(AppError::Auth(AuthError::TokenExpired)) => Box::pin(async move {
                Err(AppError::Auth(AuthError::TokenExpired).into())
            }),
            Err(_) => Box::pin(async move {
                Err(AppError::Auth(AuthError::TokenInvalid).into())
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RequireRole
// ---------------------------------------------------------------------------

/// Role-based guard. Must run after `RequireAuth` on the same scope.
pub struct RequireRole {
    allowed: HashSet<String>,
}

impl RequireRole {
    pub fn new<I, T>(roles: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            allowed: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Any authenticated principal passes.
    pub fn any_authenticated() -> Self {
        Self {
            allowed: HashSet::new(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireRole
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireRoleService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequireRoleService {
            service: Rc::new(service),
            allowed: self.allowed.clone(),
        }))
    }
}

pub struct RequireRoleService<S> {
    service: Rc<S>,
    allowed: HashSet<String>,
}

impl<S, B> Service<ServiceRequest> for RequireRoleService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let user = req.extensions().get::<AuthenticatedUser>().cloned();

        let user = match user {
            Some(user) => user,
            None => {
                return Box::pin(async move {
                    Err(AppError::Auth(AuthError::MissingToken).into())
                });
            }
        };

        if self.allowed.is_empty() || self.allowed.contains(&user.role) {
            let service = Rc::clone(&self.service);
            Box::pin(async move { service.call(req).await })
        } else {
            tracing::warn!(user_id = %user.id, role = %user.role, "Role not permitted for route");
            Box::pin(async move {
                Err(AppError::Auth(AuthError::RoleNotAllowed).into())
            })
        }
    }
}

// ---------------------------------------------------------------------------
// RequirePermissions
// ---------------------------------------------------------------------------

/// Permission-based guard. Every listed permission must hold (logical AND);
/// there is no "any of" mode. Deny by default: a resolver failure or an
/// absent grant denies. Must run after `RequireAuth` on the same scope.
pub struct RequirePermissions {
    required: Vec<String>,
    cache: Arc<PermissionCache>,
    resolver: Arc<dyn PermissionResolver>,
}

impl RequirePermissions {
    pub fn new<I, T>(
        required: I,
        cache: Arc<PermissionCache>,
        resolver: Arc<dyn PermissionResolver>,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            cache,
            resolver,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequirePermissions
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequirePermissionsService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequirePermissionsService {
            service: Rc::new(service),
            required: Rc::new(self.required.clone()),
            cache: Arc::clone(&self.cache),
            resolver: Arc::clone(&self.resolver),
        }))
    }
}

pub struct RequirePermissionsService<S> {
    service: Rc<S>,
    required: Rc<Vec<String>>,
    cache: Arc<PermissionCache>,
    resolver: Arc<dyn PermissionResolver>,
}

impl<S, B> Service<ServiceRequest> for RequirePermissionsService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let user = req.extensions().get::<AuthenticatedUser>().cloned();
        let service = Rc::clone(&self.service);
        let required = Rc::clone(&self.required);
        let cache = Arc::clone(&self.cache);
        let resolver = Arc::clone(&self.resolver);

        Box::pin(async move {
            let user = match user {
                Some(user) => user,
                None => return Err(AppError::Auth(AuthError::MissingToken).into()),
            };

            if user.is_admin() {
                tracing::debug!(user_id = %user.id, "Admin bypasses permission checks");
                return service.call(req).await;
            }

            // Resolve at most once per request, on the first cache miss.
            let mut resolved: Option<HashSet<String>> = None;

            for permission in required.iter() {
                let allowed = match cache.get(user.id, permission) {
                    Some(value) => value,
                    None => {
                        if resolved.is_none() {
                            resolved = Some(resolver.permissions_for(user.id).await?);
                        }
                        let value = resolved
                            .as_ref()
                            .map(|grants| grants.contains(permission.as_str()))
                            .unwrap_or(false);
                        cache.set(user.id, permission, value);
                        value
                    }
                };

                if !allowed {
                    tracing::warn!(
                        user_id = %user.id,
                        permission = %permission,
                        "Permission denied"
                    );
                    return Err(
                        AppError::Auth(AuthError::MissingPermission(permission.clone())).into(),
                    );
                }
            }

            service.call(req).await
        })
    }
}
