//! HTTP-level tests exercising the routes and guards against a real server
//! on a random port, wired exactly like the production app plus sample
//! permission-guarded business scopes.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpResponse, HttpServer};
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use bms_server::auth::{
    generate_access_token, validate_access_token, AccountStatus, AuthService,
    InMemoryCredentialStore, InMemoryRefreshTokenStore, NoopAuditLog, StoredCredential,
};
use bms_server::authz::{
    PermissionCache, PermissionResolver, RequireAuth, RequirePermissions, RequireRole,
    StaticPermissionResolver,
};
use bms_server::configuration::JwtSettings;
use bms_server::error::AppError;
use bms_server::routes::{invalidate_permissions, login, logout, me, refresh, revoke_sessions};

fn test_jwt() -> JwtSettings {
    JwtSettings {
        secret: "integration-test-secret-no-shorter-than-32".to_string(),
        access_token_expiry: 900,
        refresh_token_expiry: 604800,
        issuer: "bms-test".to_string(),
    }
}

fn credential(
    id: Uuid,
    email: &str,
    password: &str,
    role: &str,
    status: AccountStatus,
) -> StoredCredential {
    StoredCredential {
        id,
        email: email.to_string(),
        name: "Test User".to_string(),
        role: role.to_string(),
        password_hash: bcrypt::hash(password, 4).expect("bcrypt hash failed"),
        status,
    }
}

/// Counts resolver round trips so tests can observe cache hits.
struct CountingResolver {
    inner: StaticPermissionResolver,
    calls: AtomicUsize,
}

impl CountingResolver {
    fn new(inner: StaticPermissionResolver) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionResolver for CountingResolver {
    async fn permissions_for(&self, user_id: Uuid) -> Result<HashSet<String>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.permissions_for(user_id).await
    }
}

#[derive(Clone)]
struct TestContext {
    auth: Arc<AuthService>,
    cache: Arc<PermissionCache>,
    resolver: Arc<dyn PermissionResolver>,
    jwt: JwtSettings,
    alice_id: Uuid,
    bob_id: Uuid,
}

/// Fixture users: alice is a manager without `customer:view`, bob is a
/// manager with it, carol is an admin with no grants at all, dave is
/// deactivated.
fn context_with_resolver(
    build: impl FnOnce(Uuid, Uuid) -> Arc<dyn PermissionResolver>,
) -> TestContext {
    let alice_id = Uuid::new_v4();
    let bob_id = Uuid::new_v4();
    let carol_id = Uuid::new_v4();
    let dave_id = Uuid::new_v4();

    let credentials = Arc::new(InMemoryCredentialStore::with_users(vec![
        credential(
            alice_id,
            "alice@example.com",
            "CorrectHorse1",
            "manager",
            AccountStatus::Active,
        ),
        credential(
            bob_id,
            "bob@example.com",
            "CorrectHorse1",
            "manager",
            AccountStatus::Active,
        ),
        credential(
            carol_id,
            "carol@example.com",
            "CorrectHorse1",
            "admin",
            AccountStatus::Active,
        ),
        credential(
            dave_id,
            "dave@example.com",
            "CorrectHorse1",
            "user",
            AccountStatus::Inactive,
        ),
    ]));

    let jwt = test_jwt();
    let auth = Arc::new(AuthService::new(
        credentials,
        Arc::new(InMemoryRefreshTokenStore::new()),
        Arc::new(NoopAuditLog),
        jwt.clone(),
    ));

    TestContext {
        auth,
        cache: Arc::new(PermissionCache::new(Duration::from_secs(300))),
        resolver: build(alice_id, bob_id),
        jwt,
        alice_id,
        bob_id,
    }
}

fn context() -> TestContext {
    context_with_resolver(|alice_id, bob_id| {
        Arc::new(
            StaticPermissionResolver::new()
                .grant(alice_id, ["project:view"])
                .grant(bob_id, ["customer:view", "customer:edit"]),
        )
    })
}

async fn list_customers() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "customers": [] }))
}

async fn list_exports() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "exports": [] }))
}

/// Starts the app on a random port and returns its base address. Mirrors the
/// production wiring in `startup::run`, with two permission-guarded business
/// scopes added so the guards can be exercised end to end.
fn spawn_app(ctx: &TestContext) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let ctx = ctx.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(ctx.auth.clone()))
            .app_data(web::Data::from(ctx.cache.clone()))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))
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
                    .wrap(RequireAuth::new(ctx.jwt.clone())),
            )
            .service(
                web::scope("/customers")
                    .route("", web::get().to(list_customers))
                    .wrap(RequirePermissions::new(
                        ["customer:view"],
                        ctx.cache.clone(),
                        ctx.resolver.clone(),
                    ))
                    .wrap(RequireAuth::new(ctx.jwt.clone())),
            )
            .service(
                web::scope("/exports")
                    .route("", web::get().to(list_exports))
                    .wrap(RequirePermissions::new(
                        ["export:run"],
                        ctx.cache.clone(),
                        ctx.resolver.clone(),
                    ))
                    .wrap(RequireAuth::new(ctx.jwt.clone())),
            )
    })
    .listen(listener)
    .expect("Failed to start test server")
    .run();

    let _ = tokio::spawn(server);

    format!("http://127.0.0.1:{}", port)
}

async fn login_body(client: &reqwest::Client, address: &str, email: &str, password: &str) -> Value {
    let response = client
        .post(format!("{}/auth/login", address))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .expect("Failed to execute login request");
    assert_eq!(response.status().as_u16(), 200, "login should succeed");
    response.json().await.expect("login response should be JSON")
}

async fn access_token_for(client: &reqwest::Client, address: &str, email: &str) -> String {
    let body = login_body(client, address, email, "CorrectHorse1").await;
    body["accessToken"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn login_returns_tokens_and_camel_case_profile() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    let body = login_body(&client, &address, "alice@example.com", "CorrectHorse1").await;

    assert_eq!(body["expiresIn"], 900);
    assert_eq!(body["user"]["email"], "alice@example.com");
    assert_eq!(body["user"]["role"], "manager");
    assert_eq!(body["user"]["id"], ctx.alice_id.to_string());
    assert!(body["refreshToken"].as_str().unwrap().len() >= 64);

    let claims = validate_access_token(body["accessToken"].as_str().unwrap(), &ctx.jwt).unwrap();
    assert_eq!(claims.sub, ctx.alice_id.to_string());
    assert_eq!(claims.role, "manager");
}

#[tokio::test]
async fn unknown_email_and_wrong_password_are_indistinguishable() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    let mut messages = Vec::new();
    for (email, password) in [
        ("nobody@example.com", "CorrectHorse1"),
        ("alice@example.com", "WrongPassword9"),
    ] {
        let response = client
            .post(format!("{}/auth/login", address))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_CREDENTIALS");
        messages.push(body["message"].as_str().unwrap().to_string());
    }

    assert_eq!(messages[0], "Invalid email or password");
    assert_eq!(messages[0], messages[1]);
}

#[tokio::test]
async fn inactive_account_cannot_log_in() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/auth/login", address))
        .json(&json!({ "email": "dave@example.com", "password": "CorrectHorse1" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "ACCOUNT_INACTIVE");
}

#[tokio::test]
async fn malformed_email_is_rejected_before_lookup() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/auth/login", address))
        .json(&json!({ "email": "not-an-email", "password": "CorrectHorse1" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn me_distinguishes_missing_invalid_and_expired_tokens() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    // No Authorization header.
    let response = client
        .get(format!("{}/auth/me", address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");

    // Garbage token.
    let response = client
        .get(format!("{}/auth/me", address))
        .header("Authorization", "Bearer not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_INVALID");

    // Expired token, minted well past the validation leeway.
    let expired_config = JwtSettings {
        access_token_expiry: -3600,
        ..ctx.jwt.clone()
    };
    let expired = generate_access_token(
        &ctx.alice_id,
        "alice@example.com",
        "manager",
        &expired_config,
    )
    .unwrap();
    let response = client
        .get(format!("{}/auth/me", address))
        .header("Authorization", format!("Bearer {}", expired))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_EXPIRED");
}

#[tokio::test]
async fn me_returns_the_authenticated_profile() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    let token = access_token_for(&client, &address, "alice@example.com").await;
    let response = client
        .get(format!("{}/auth/me", address))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], ctx.alice_id.to_string());
    assert_eq!(body["email"], "alice@example.com");
}

#[tokio::test]
async fn missing_permission_is_denied_with_the_permission_named() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    let token = access_token_for(&client, &address, "alice@example.com").await;
    let response = client
        .get(format!("{}/customers", address))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "FORBIDDEN");
    assert!(body["message"].as_str().unwrap().contains("customer:view"));
}

#[tokio::test]
async fn granted_permission_passes_the_guard() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    let token = access_token_for(&client, &address, "bob@example.com").await;
    let response = client
        .get(format!("{}/customers", address))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn admin_bypasses_permission_checks_even_for_ungranted_permissions() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    // carol holds no grants at all; `export:run` is granted to nobody.
    let token = access_token_for(&client, &address, "carol@example.com").await;
    for path in ["/customers", "/exports"] {
        let response = client
            .get(format!("{}{}", address, path))
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200, "admin denied on {}", path);
    }

    // A manager with grants still cannot run exports.
    let token = access_token_for(&client, &address, "bob@example.com").await;
    let response = client
        .get(format!("{}/exports", address))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn non_admin_cannot_reach_admin_routes() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    let token = access_token_for(&client, &address, "alice@example.com").await;
    let response = client
        .post(format!("{}/auth/sessions/revoke", address))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({ "userId": ctx.bob_id.to_string() }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn refresh_rotates_over_http_and_rejects_replay() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    let body = login_body(&client, &address, "alice@example.com", "CorrectHorse1").await;
    let t1 = body["refreshToken"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/auth/refresh", address))
        .json(&json!({ "refreshToken": t1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let rotated: Value = response.json().await.unwrap();
    let t2 = rotated["refreshToken"].as_str().unwrap().to_string();
    assert_ne!(t1, t2);

    // Replaying the consumed token is rejected.
    let response = client
        .post(format!("{}/auth/refresh", address))
        .json(&json!({ "refreshToken": t1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "TOKEN_INVALID");
    assert_eq!(body["message"], "Invalid token");
}

#[tokio::test]
async fn logout_is_idempotent_over_http() {
    let ctx = context();
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    let body = login_body(&client, &address, "alice@example.com", "CorrectHorse1").await;
    let token = body["refreshToken"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let response = client
            .post(format!("{}/auth/logout", address))
            .json(&json!({ "refreshToken": token }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
    }
}

#[tokio::test]
async fn permission_cache_serves_repeat_checks_until_invalidated() {
    let mut counting: Option<Arc<CountingResolver>> = None;
    let ctx = context_with_resolver(|_, bob_id| {
        let resolver = Arc::new(CountingResolver::new(
            StaticPermissionResolver::new().grant(bob_id, ["customer:view"]),
        ));
        counting = Some(resolver.clone());
        resolver
    });
    let counting = counting.expect("resolver constructed");
    let address = spawn_app(&ctx);
    let client = reqwest::Client::new();

    let admin_token = access_token_for(&client, &address, "carol@example.com").await;
    let bob_token = access_token_for(&client, &address, "bob@example.com").await;

    // Two checks, one resolver round trip.
    for _ in 0..2 {
        let response = client
            .get(format!("{}/customers", address))
            .header("Authorization", format!("Bearer {}", bob_token))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }
    assert_eq!(counting.calls(), 1);

    // Invalidation forces the next check back to the resolver.
    let response = client
        .post(format!("{}/auth/permissions/invalidate", address))
        .header("Authorization", format!("Bearer {}", admin_token))
        .json(&json!({ "userId": ctx.bob_id.to_string() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let response = client
        .get(format!("{}/customers", address))
        .header("Authorization", format!("Bearer {}", bob_token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(counting.calls(), 2);
}
