//! Authentication API endpoints
//!
//! Handles HTTP requests for the login/session control flow:
//! - GET /auth/csrftoken - Issue the session-bound anti-forgery token
//! - POST /auth/login - Establish an authenticated session
//! - POST /auth/logout - Invalidate the current session
//!
//! The csrftoken endpoint also ensures an anonymous session row exists, so
//! the token it hands out is bound to a session before any login happens.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{extract_session_id, ApiError, AppState, CurrentUser};

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response for the csrftoken endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct CsrfTokenResponse {
    #[serde(rename = "csrfToken")]
    pub csrf_token: String,
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/csrftoken", get(csrftoken))
        .route("/login", post(login))
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new().route("/logout", post(logout))
}

/// GET /auth/csrftoken - Issue the session's anti-forgery token
///
/// Reuses the caller's live session when the cookie presents one, otherwise
/// opens a fresh anonymous session. The token is generated once per session
/// and returned unchanged on subsequent calls.
async fn csrftoken(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let existing = match extract_session_id(&headers, &state.cookies) {
        Some(session_id) => state.sessions.find(&session_id).await?,
        None => None,
    };

    let session = match existing {
        Some(session) => session,
        None => state.sessions.open_anonymous().await?,
    };

    let token = state.sessions.issue_csrf_token(&session).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&state.cookies.set_cookie(&session.id)).unwrap(),
    );

    Ok((
        response_headers,
        Json(CsrfTokenResponse { csrf_token: token }),
    ))
}

/// POST /auth/login - Establish an authenticated session
///
/// The CSRF guard has already validated the token by the time this runs.
/// On success the identity is bound into the caller's session (the one the
/// token round-trip opened) and the refreshed cookie is set; the body is the
/// public identity. Bad credentials are answered uniformly, whatever the
/// cause.
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state
        .validator
        .validate(&body.email, &body.password)
        .await?
        .ok_or_else(ApiError::invalid_credentials)?;

    let current = extract_session_id(&headers, &state.cookies);
    let session = state
        .sessions
        .establish(current.as_deref(), &identity)
        .await?;

    tracing::info!(user_id = identity.id, "login");

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&state.cookies.set_cookie(&session.id)).unwrap(),
    );

    Ok((response_headers, Json(identity)))
}

/// POST /auth/logout - Invalidate the current session
///
/// Requires authentication. Deletes the server-side session row and clears
/// the cookie.
async fn logout(
    State(state): State<AppState>,
    _user: CurrentUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(session_id) = extract_session_id(&headers, &state.cookies) {
        state.sessions.invalidate(&session_id).await?;
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&state.cookies.clear_cookie()).unwrap(),
    );

    Ok((StatusCode::NO_CONTENT, response_headers))
}
