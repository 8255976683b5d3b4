use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

use bms_server::auth::{
    spawn_token_cleanup, AuditLog, AuthService, CredentialStore, PgCredentialStore,
    PgRefreshTokenStore, RefreshTokenStore, TracingAuditLog,
};
use bms_server::authz::{PermissionCache, PermissionResolver, PgPermissionResolver};
use bms_server::configuration::get_configuration;
use bms_server::startup::{run, AppState};
use bms_server::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let connection_string = configuration.database.connection_string();
    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&connection_string)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    tracing::info!("Database connection pool created successfully");

    let credentials: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(pool.clone()));
    let refresh_tokens: Arc<dyn RefreshTokenStore> =
        Arc::new(PgRefreshTokenStore::new(pool.clone()));
    let audit: Arc<dyn AuditLog> = Arc::new(TracingAuditLog);
    let auth = Arc::new(AuthService::new(
        credentials,
        refresh_tokens.clone(),
        audit,
        configuration.jwt.clone(),
    ));

    let permission_cache = Arc::new(PermissionCache::new(Duration::from_secs(
        configuration.auth.permission_cache_ttl,
    )));
    let permission_resolver: Arc<dyn PermissionResolver> =
        Arc::new(PgPermissionResolver::new(pool));

    // Retention sweep runs off the request path.
    spawn_token_cleanup(
        refresh_tokens,
        Duration::from_secs(configuration.auth.cleanup_interval),
        chrono::Duration::days(configuration.auth.token_retention_days),
    );

    let address = format!("127.0.0.1:{}", configuration.application.port);
    tracing::info!("Binding server to address: {}", address);

    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let state = AppState {
        auth,
        permission_cache,
        permission_resolver,
        jwt: configuration.jwt.clone(),
    };

    let server = run(listener, state)?;
    tracing::info!("Server started successfully");

    server.await
}
