//! API middleware
//!
//! Contains middleware for:
//! - Session handling (cookie validation and rotation on every request)
//! - Authorization (admin-only routes)
//!
//! Also defines the shared `AppState` and the JSON error type returned by
//! every handler.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::db::DynDatabasePool;
use crate::models::Session;
use crate::services::{AdminAccountService, Authentication, SessionManager};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub admin_service: Arc<AdminAccountService>,
    pub session_manager: Arc<SessionManager>,
    pub session_cookie: Arc<SessionCookie>,
}

/// Session of an admin whose cookie was valid for this request.
///
/// The contained session is the rotated one, not the one the client sent.
#[derive(Debug, Clone)]
pub struct AuthenticatedAdmin(pub Session);

impl AuthenticatedAdmin {
    pub fn admin_id(&self) -> i64 {
        self.0.admin_id
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

// ============================================================================
// Session cookie
// ============================================================================

/// Reads and writes the session cookie
#[derive(Debug, Clone)]
pub struct SessionCookie {
    name: String,
    secure: bool,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            secure,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.cookie_name.clone(), config.secure_cookie)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token carried by the request's `Cookie` header(s), if any
    pub fn extract(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .map(|(_, token)| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }

    /// `Set-Cookie` value handing `session` to the client
    pub fn issue(&self, session: &Session) -> Option<HeaderValue> {
        let max_age = (session.expires_at - Utc::now()).num_seconds().max(0);
        self.header(&session.token, max_age)
    }

    /// `Set-Cookie` value removing the cookie from the client
    pub fn clear(&self) -> Option<HeaderValue> {
        self.header("", 0)
    }

    fn header(&self, token: &str, max_age: i64) -> Option<HeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.name, token, max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }

        match HeaderValue::from_str(&cookie) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Refusing to emit malformed session cookie: {}", e);
                None
            }
        }
    }

    /// Whether the response already sets this cookie
    fn is_set_in(&self, headers: &HeaderMap) -> bool {
        let prefix = format!("{}=", self.name);
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.starts_with(&prefix))
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Session middleware, applied to every route.
///
/// Authenticates the session cookie (rotating it when valid), exposes the
/// resulting [`Authentication`] as a request extension and hands the rotated
/// cookie back on the response. A cookie naming an unknown or expired
/// session is cleared. A cookie superseded by an overlapping request is left
/// alone so a late response cannot wipe the replacement. Handlers that set
/// the session cookie themselves (login, logout) take precedence.
pub async fn session_layer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = state.session_cookie.extract(request.headers());
    let auth = state.session_manager.authenticate(token.as_deref()).await;

    request.extensions_mut().insert(auth.clone());
    if let Some(session) = auth.session() {
        request
            .extensions_mut()
            .insert(AuthenticatedAdmin(session.clone()));
    }

    let mut response = next.run(request).await;

    if state.session_cookie.is_set_in(response.headers()) {
        return response;
    }

    let cookie = match &auth {
        Authentication::Authenticated { session } => state.session_cookie.issue(session),
        Authentication::Rejected => state.session_cookie.clear(),
        Authentication::Anonymous
        | Authentication::Superseded
        | Authentication::Unavailable => None,
    };
    if let Some(cookie) = cookie {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }

    response
}

/// Admin authorization middleware
///
/// Must run inside `session_layer`. A store outage during authentication is
/// reported as a server error rather than as a missing login.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    match request.extensions().get::<Authentication>() {
        Some(Authentication::Authenticated { .. }) => Ok(next.run(request).await),
        Some(Authentication::Unavailable) => Err(ApiError::internal_error(
            "Session could not be verified",
        )),
        _ => Err(ApiError::unauthorized("Authentication required")),
    }
}

impl<S> FromRequestParts<S> for AuthenticatedAdmin
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedAdmin>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn headers_with_cookie(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn test_extract_session_token_from_cookie() {
        let cookie = SessionCookie::new("session_id", false);
        let headers = headers_with_cookie("theme=dark; session_id=abc-123; lang=en");
        assert_eq!(cookie.extract(&headers), Some("abc-123".to_string()));
    }

    #[test]
    fn test_extract_session_token_ignores_similar_names() {
        let cookie = SessionCookie::new("session_id", false);
        let headers = headers_with_cookie("old_session_id=nope; session_idx=nope");
        assert!(cookie.extract(&headers).is_none());
    }

    #[test]
    fn test_extract_session_token_none() {
        let cookie = SessionCookie::new("session_id", false);
        assert!(cookie.extract(&HeaderMap::new()).is_none());
        assert!(cookie.extract(&headers_with_cookie("session_id=")).is_none());
    }

    #[test]
    fn test_extract_across_multiple_cookie_headers() {
        let cookie = SessionCookie::new("session_id", false);
        let mut headers = headers_with_cookie("theme=dark");
        headers.append(header::COOKIE, HeaderValue::from_static("session_id=xyz"));
        assert_eq!(cookie.extract(&headers), Some("xyz".to_string()));
    }

    #[test]
    fn test_issue_cookie_attributes() {
        let cookie = SessionCookie::new("session_id", false);
        let session = Session::issue(1, Duration::minutes(30));

        let value = cookie.issue(&session).unwrap();
        let value = value.to_str().unwrap();

        assert!(value.starts_with(&format!("session_id={};", session.token)));
        assert!(value.contains("Path=/"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Max-Age=1799") || value.contains("Max-Age=1800"));
        assert!(!value.contains("Secure"));
    }

    #[test]
    fn test_secure_flag_and_clear() {
        let cookie = SessionCookie::new("sid", true);

        let cleared = cookie.clear().unwrap();
        let cleared = cleared.to_str().unwrap();

        assert!(cleared.starts_with("sid=;"));
        assert!(cleared.contains("Max-Age=0"));
        assert!(cleared.ends_with("; Secure"));
    }

    #[test]
    fn test_expired_session_gets_zero_max_age() {
        let cookie = SessionCookie::new("session_id", false);
        let session = Session::issue(1, Duration::minutes(-5));
        let value = cookie.issue(&session).unwrap();
        assert!(value.to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn test_is_set_in() {
        let cookie = SessionCookie::new("session_id", false);
        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, HeaderValue::from_static("theme=dark; Path=/"));
        assert!(!cookie.is_set_in(&headers));

        headers.append(header::SET_COOKIE, HeaderValue::from_static("session_id=; Max-Age=0"));
        assert!(cookie.is_set_in(&headers));
    }

    #[test]
    fn test_api_error_status_mapping() {
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::validation_error("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::internal_error("x").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::new("SOMETHING_ELSE", "x").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_body_shape() {
        let json = serde_json::to_value(ApiError::conflict("Email taken")).unwrap();
        assert_eq!(json["error"]["code"], "CONFLICT");
        assert_eq!(json["error"]["message"], "Email taken");
    }
}
