//! Admin authentication API endpoints
//!
//! - POST /api/v1/admin/register - Register an admin account (no auto-login)
//! - POST /api/v1/admin/login - Verify credentials and start a session
//! - POST /api/v1/admin/logout - End the session and clear the cookie
//! - GET /api/v1/admin/me - Current admin (requires a valid session)

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};

use crate::api::middleware::{require_admin, ApiError, AppState, AuthenticatedAdmin};
use crate::api::responses::{AdminResponse, LoginResponse, MessageResponse};
use crate::services::{AdminServiceError, Authentication, Credentials};

/// Build the admin auth router
pub fn router() -> Router<AppState> {
    let protected = Router::new()
        .route("/me", get(get_current_admin))
        .route_layer(axum_middleware::from_fn(require_admin));

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .merge(protected)
}

fn map_service_error(e: AdminServiceError) -> ApiError {
    match e {
        AdminServiceError::ValidationError(msg) => ApiError::validation_error(msg),
        AdminServiceError::EmailTaken(_) => ApiError::conflict(e.to_string()),
        AdminServiceError::InvalidCredentials => ApiError::unauthorized(e.to_string()),
        AdminServiceError::HashingError(_) | AdminServiceError::InternalError(_) => {
            tracing::error!("Admin account operation failed: {:#}", e);
            ApiError::internal_error("Internal server error")
        }
    }
}

/// POST /api/v1/admin/register
async fn register(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state
        .admin_service
        .register(body)
        .await
        .map_err(map_service_error)?;

    Ok((StatusCode::CREATED, Json(AdminResponse::from(account))))
}

/// POST /api/v1/admin/login
async fn login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    let admin_id = state
        .admin_service
        .verify_login(body)
        .await
        .map_err(map_service_error)?;

    let account = state
        .admin_service
        .get_by_id(admin_id)
        .await
        .map_err(map_service_error)?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    let session = state.session_manager.login(admin_id).await.map_err(|e| {
        tracing::error!("Login failed: {:#}", e);
        ApiError::internal_error("Failed to create session")
    })?;

    let mut headers = HeaderMap::new();
    let cookie = state
        .session_cookie
        .issue(&session)
        .ok_or_else(|| ApiError::internal_error("Failed to create session"))?;
    headers.insert(header::SET_COOKIE, cookie);

    Ok((
        headers,
        Json(LoginResponse {
            admin: account.into(),
            expires_at: session.expires_at.to_rfc3339(),
        }),
    ))
}

/// POST /api/v1/admin/logout
///
/// Always succeeds. The session middleware has already rotated a valid
/// cookie, so the renewed token is the one to delete.
async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<Authentication>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = match auth.session() {
        Some(session) => Some(session.token.clone()),
        None => state.session_cookie.extract(&headers),
    };

    state.session_manager.logout(token.as_deref()).await;

    let mut response_headers = HeaderMap::new();
    if let Some(cleared) = state.session_cookie.clear() {
        response_headers.insert(header::SET_COOKIE, cleared);
    }

    (response_headers, Json(MessageResponse::new("Logged out")))
}

/// GET /api/v1/admin/me
async fn get_current_admin(
    State(state): State<AppState>,
    admin: AuthenticatedAdmin,
) -> Result<Json<AdminResponse>, ApiError> {
    let account = state
        .admin_service
        .get_by_id(admin.admin_id())
        .await
        .map_err(map_service_error)?
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    Ok(Json(account.into()))
}
