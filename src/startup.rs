use std::net::TcpListener;
use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};

use crate::auth::AuthService;
use crate::authz::{PermissionCache, PermissionResolver, RequireAuth, RequireRole};
use crate::configuration::JwtSettings;
use crate::routes::{
    health_check, invalidate_permissions, login, logout, me, refresh, revoke_sessions,
};

/// Shared components, constructed once in `main` and handed to every worker.
/// The permission cache in particular is an explicit handle, not a global.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub permission_cache: Arc<PermissionCache>,
    pub permission_resolver: Arc<dyn PermissionResolver>,
    pub jwt: JwtSettings,
}

pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let server = HttpServer::new(move || {
        App::new()
            // Shared state
            .app_data(web::Data::from(state.auth.clone()))
            .app_data(web::Data::from(state.permission_cache.clone()))

            // Public routes (no authentication required)
            .route("/health_check", web::get().to(health_check))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))

            // Protected routes (require a verified access token)
            .service(
                web::scope("/auth")
                    .route("/me", web::get().to(me))
                    .service(
                        web::scope("")
                            .wrap(RequireRole::new(["admin"]))
                            .route(
                                "/permissions/invalidate",
                                web::post().to(invalidate_permissions),
                            )
                            .route("/sessions/revoke", web::post().to(revoke_sessions)),
                    )
                    .wrap(RequireAuth::new(state.jwt.clone())),
            )

        // Business-entity routes (customers, projects, appointments,
        // invoices, notifications) are mounted by their own modules and
        // guard themselves with RequireAuth/RequireRole/RequirePermissions.
    })
    .listen(listener)?
    .run();

    Ok(server)
}
