//! API layer - HTTP handlers and routing
//!
//! - Admin auth endpoints under `/api/v1/admin`
//! - Health check at `/api/v1/health`
//!
//! Every route runs inside the session middleware, so any request carrying a
//! valid session cookie gets it rotated.

pub mod auth;
pub mod middleware;
pub mod responses;

use axum::{
    extract::State, http::StatusCode, middleware as axum_middleware, routing::get, Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::repositories::{SqlxAdminAccountRepository, SqlxSessionRepository};
use crate::db::DynDatabasePool;
use crate::services::{AdminAccountService, SessionManager};

pub use middleware::{ApiError, AppState, AuthenticatedAdmin, SessionCookie};
use responses::HealthResponse;

impl AppState {
    /// Wire repositories and services over `pool`
    pub fn new(pool: DynDatabasePool, config: &Config) -> Self {
        let admin_service = AdminAccountService::new(SqlxAdminAccountRepository::boxed(pool.clone()));
        let session_manager =
            SessionManager::from_config(SqlxSessionRepository::boxed(pool.clone()), &config.session);

        Self {
            pool,
            admin_service: Arc::new(admin_service),
            session_manager: Arc::new(session_manager),
            session_cookie: Arc::new(SessionCookie::from_config(&config.session)),
        }
    }
}

/// Build the main API router
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/admin", auth::router())
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", build_api_router())
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::session_layer,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /api/v1/health
async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.pool.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                database: "ok".to_string(),
            }),
        ),
        Err(e) => {
            tracing::error!("Health check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".to_string(),
                    database: "unreachable".to_string(),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::session::tests::StaleReadRepository;
    use crate::db::repositories::SessionRepository;
    use crate::db::{create_test_pool, migrations};
    use axum::body::Body;
    use axum::http::{header, Method, Request, Response};
    use tower::ServiceExt;

    async fn setup_test_app() -> (DynDatabasePool, Router) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let state = AppState::new(pool.clone(), &Config::default());
        (pool, build_router(state))
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn credentials(email: &str, password: &str) -> serde_json::Value {
        serde_json::json!({ "email": email, "password": password })
    }

    fn with_cookie(method: Method, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, format!("session_id={}", token))
            .body(Body::empty())
            .unwrap()
    }

    /// Session token set by the response, if any
    fn session_token(response: &Response<Body>) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| v.strip_prefix("session_id="))
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register_and_login(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/admin/register",
                credentials("admin@example.com", "password123"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/admin/login",
                credentials("admin@example.com", "password123"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        session_token(&response).expect("Login should set the session cookie")
    }

    #[tokio::test]
    async fn test_health() {
        let (_pool, app) = setup_test_app().await;

        let response = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["database"], "ok");
    }

    #[tokio::test]
    async fn test_register_does_not_log_in() {
        let (_pool, app) = setup_test_app().await;

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/admin/register",
                credentials("Admin@Example.com", "password123"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(session_token(&response).is_none());
        let body = body_json(response).await;
        assert_eq!(body["email"], "admin@example.com");
        assert!(body.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_register_errors() {
        let (_pool, app) = setup_test_app().await;
        register_and_login(&app).await;

        let duplicate = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/admin/register",
                credentials("admin@example.com", "other-password"),
            ))
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(duplicate).await["error"]["code"], "CONFLICT");

        let invalid = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/admin/register",
                credentials("not-an-email", "password123"),
            ))
            .await
            .unwrap();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_sets_session_cookie() {
        let (_pool, app) = setup_test_app().await;
        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/admin/register",
                credentials("admin@example.com", "password123"),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/admin/login",
                credentials("admin@example.com", "password123"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookies: Vec<_> = response.headers().get_all(header::SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 1);
        let cookie = cookies[0].to_str().unwrap();
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Path=/"));

        let body = body_json(response).await;
        assert_eq!(body["admin"]["email"], "admin@example.com");
    }

    #[tokio::test]
    async fn test_bad_credentials_are_uniform() {
        let (_pool, app) = setup_test_app().await;
        register_and_login(&app).await;

        let wrong_password = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/admin/login",
                credentials("admin@example.com", "wrong"),
            ))
            .await
            .unwrap();
        let unknown_email = app
            .oneshot(json_request(
                Method::POST,
                "/api/v1/admin/login",
                credentials("nobody@example.com", "password123"),
            ))
            .await
            .unwrap();

        assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);
        assert!(session_token(&wrong_password).is_none());
        assert_eq!(body_json(wrong_password).await, body_json(unknown_email).await);
    }

    #[tokio::test]
    async fn test_me_requires_session() {
        let (_pool, app) = setup_test_app().await;

        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/admin/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(with_cookie(Method::GET, "/api/v1/admin/me", "forged-token"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let cleared = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("Unknown cookie should be cleared")
            .to_str()
            .unwrap();
        assert!(cleared.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_every_request_rotates_the_cookie() {
        let (_pool, app) = setup_test_app().await;
        let t1 = register_and_login(&app).await;

        let response = app
            .clone()
            .oneshot(with_cookie(Method::GET, "/api/v1/admin/me", &t1))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let t2 = session_token(&response).expect("Response should carry rotated cookie");
        assert_ne!(t1, t2);
        assert_eq!(body_json(response).await["email"], "admin@example.com");

        // Public routes rotate too
        let response = app
            .clone()
            .oneshot(with_cookie(Method::GET, "/api/v1/health", &t2))
            .await
            .unwrap();
        let t3 = session_token(&response).expect("Response should carry rotated cookie");
        assert_ne!(t2, t3);

        // Consumed tokens no longer work
        for stale in [&t1, &t2] {
            let response = app
                .clone()
                .oneshot(with_cookie(Method::GET, "/api/v1/admin/me", stale))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_logout_clears_cookie_and_session() {
        let (_pool, app) = setup_test_app().await;
        let token = register_and_login(&app).await;

        let response = app
            .clone()
            .oneshot(with_cookie(Method::POST, "/api/v1/admin/logout", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with("session_id=;"));
        assert!(cookies[0].contains("Max-Age=0"));

        let response = app
            .oneshot(with_cookie(Method::GET, "/api/v1/admin/me", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_without_session_succeeds() {
        let (_pool, app) = setup_test_app().await;

        let response = app
            .clone()
            .oneshot(Request::post("/api/v1/admin/logout").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(with_cookie(Method::POST, "/api/v1/admin/logout", "unknown"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_request_that_lost_rotation_keeps_the_cookie() {
        let (pool, app) = setup_test_app().await;
        let t1 = register_and_login(&app).await;

        // A second router whose lookup of T1 was served before the
        // overlapping request below rotated it away
        let snapshot = SqlxSessionRepository::new(pool.clone())
            .get_by_token(&t1)
            .await
            .unwrap()
            .expect("Login should persist the session");
        let state = AppState::new(pool.clone(), &Config::default());
        let lagging = build_router(AppState {
            session_manager: Arc::new(SessionManager::new(Arc::new(StaleReadRepository {
                inner: SqlxSessionRepository::new(pool.clone()),
                snapshot,
            }))),
            ..state
        });

        let response = app
            .clone()
            .oneshot(with_cookie(Method::GET, "/api/v1/health", &t1))
            .await
            .unwrap();
        let t2 = session_token(&response).expect("Winner should receive the rotated cookie");

        let response = lagging
            .clone()
            .oneshot(with_cookie(Method::GET, "/api/v1/health", &t1))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());

        let response = lagging
            .oneshot(with_cookie(Method::GET, "/api/v1/admin/me", &t1))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());

        let response = app
            .oneshot(with_cookie(Method::GET, "/api/v1/admin/me", &t2))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_store_outage_is_a_server_error() {
        let (pool, app) = setup_test_app().await;
        let token = register_and_login(&app).await;

        pool.close().await;

        let response = app
            .oneshot(with_cookie(Method::GET, "/api/v1/admin/me", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(session_token(&response).is_none());
    }
}
