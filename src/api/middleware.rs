//! API middleware
//!
//! Contains the request-side halves of the auth core:
//! - Application state (explicit dependency injection, no globals)
//! - The error taxonomy and its HTTP status mapping
//! - The signed session-cookie codec
//! - The authorization guard (`require_auth`)
//! - The CSRF guard (`csrf_guard`)

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use data_encoding::BASE64URL_NOPAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

use crate::config::{Config, Environment};
use crate::db::repositories::{SqlxSessionRepository, SqlxUserRepository};
use crate::db::DynDatabasePool;
use crate::models::PublicUser;
use crate::services::auth::{AuthError, CredentialValidator};
use crate::services::session::{constant_time_eq, SessionError, SessionService};
use crate::services::user::{UserService, UserServiceError};

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session";

/// Request header carrying the CSRF token
pub const CSRF_HEADER: &str = "x-xsrf-token";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub users: Arc<UserService>,
    pub sessions: Arc<SessionService>,
    pub validator: Arc<CredentialValidator>,
    pub cookies: CookieCodec,
}

impl AppState {
    /// Compose the full service graph over a connected pool.
    ///
    /// This is the composition root: every store, service, guard dependency
    /// and the cookie codec is wired here and nowhere else.
    pub fn build(pool: DynDatabasePool, config: &Config) -> Self {
        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let session_repo = SqlxSessionRepository::boxed(pool.clone());

        let sessions = Arc::new(SessionService::new(
            session_repo,
            user_repo.clone(),
            config.session.ttl_days,
        ));
        let users = Arc::new(UserService::new(user_repo.clone()));
        let validator = Arc::new(CredentialValidator::new(user_repo));
        let cookies = CookieCodec::new(
            &config.security.secret_key,
            config.security.environment,
            config.session.ttl_days,
        );

        Self {
            pool,
            users,
            sessions,
            validator,
            cookies,
        }
    }
}

/// Authenticated identity attached to the request by the authorization guard
#[derive(Debug, Clone)]
pub struct CurrentUser(pub PublicUser);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthenticated("Authentication required"))
    }
}

// ============================================================================
// Error responses
// ============================================================================

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

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new("UNAUTHENTICATED", message)
    }

    pub fn invalid_credentials() -> Self {
        Self::new("INVALID_CREDENTIALS", "Invalid email or password")
    }

    /// Uniform CSRF rejection: the body never says whether the token was
    /// missing, mismatched, or whether a session existed at all.
    pub fn csrf_rejected() -> Self {
        Self::new("CSRF_REJECTED", "Invalid anti-forgery token")
    }

    pub fn duplicate_email() -> Self {
        Self::new("DUPLICATE_EMAIL", "The email address is already registered")
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    /// Log the cause and answer with a generic server error. The body never
    /// carries internal detail.
    pub fn internal_error(cause: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {}", cause);
        Self::new("INTERNAL_ERROR", "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "UNAUTHENTICATED" | "INVALID_CREDENTIALS" => StatusCode::UNAUTHORIZED,
            "CSRF_REJECTED" => StatusCode::FORBIDDEN,
            "DUPLICATE_EMAIL" | "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<UserServiceError> for ApiError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::DuplicateEmail => ApiError::duplicate_email(),
            UserServiceError::NotFound => ApiError::not_found("User not found"),
            UserServiceError::Validation(msg) => ApiError::validation_error(msg),
            UserServiceError::Store(e) => ApiError::internal_error(e),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Store(e) => ApiError::internal_error(e),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Store(e) => ApiError::internal_error(e),
        }
    }
}

// ============================================================================
// Signed session cookie
// ============================================================================

/// Seals session ids into signed cookie values and back.
///
/// The cookie value is `<session id>.<base64url HMAC-SHA256 signature>`. A
/// value whose signature does not verify is treated as if no cookie had been
/// sent at all.
#[derive(Clone)]
pub struct CookieCodec {
    secret: Arc<Vec<u8>>,
    secure: bool,
    same_site: &'static str,
    max_age_secs: i64,
}

impl CookieCodec {
    pub fn new(secret: &str, environment: Environment, ttl_days: i64) -> Self {
        Self {
            secret: Arc::new(secret.as_bytes().to_vec()),
            secure: environment.secure_cookies(),
            same_site: environment.cookie_same_site(),
            max_age_secs: ttl_days * 24 * 60 * 60,
        }
    }

    fn sign(&self, session_id: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(session_id.as_bytes());
        BASE64URL_NOPAD.encode(&mac.finalize().into_bytes())
    }

    /// Produce the signed cookie value for a session id.
    pub fn seal(&self, session_id: &str) -> String {
        format!("{}.{}", session_id, self.sign(session_id))
    }

    /// Recover the session id from a signed cookie value, or `None` when the
    /// signature does not verify.
    pub fn unseal(&self, value: &str) -> Option<String> {
        let (session_id, signature) = value.rsplit_once('.')?;
        let expected = self.sign(session_id);
        if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            Some(session_id.to_string())
        } else {
            None
        }
    }

    /// Full Set-Cookie value for a session.
    pub fn set_cookie(&self, session_id: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite={}; Max-Age={}",
            SESSION_COOKIE,
            self.seal(session_id),
            self.same_site,
            self.max_age_secs,
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Set-Cookie value that clears the session cookie.
    pub fn clear_cookie(&self) -> String {
        let mut cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite={}; Max-Age=0",
            SESSION_COOKIE, self.same_site,
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Extract and verify the session id from the request's Cookie header.
pub fn extract_session_id(headers: &HeaderMap, cookies: &CookieCodec) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;

    for cookie in cookie_header.split(';') {
        let cookie = cookie.trim();
        if let Some(value) = cookie
            .strip_prefix(SESSION_COOKIE)
            .and_then(|rest| rest.strip_prefix('='))
        {
            if let Some(session_id) = cookies.unseal(value) {
                return Some(session_id);
            }
        }
    }

    None
}

// ============================================================================
// Guards
// ============================================================================

/// Authorization guard.
///
/// Resolves the session cookie to an identity and attaches it to the request
/// as an immutable [`CurrentUser`] context value. Runs before any handler
/// that assumes an identity; requests without a valid, unexpired, bound
/// session are answered with 401 and never reach the handler.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let session_id = extract_session_id(request.headers(), &state.cookies)
        .ok_or_else(|| ApiError::unauthenticated("Authentication required"))?;

    let identity = state
        .sessions
        .resolve(&session_id)
        .await?
        .ok_or_else(|| ApiError::unauthenticated("Invalid or expired session"))?;

    request.extensions_mut().insert(CurrentUser(identity));
    Ok(next.run(request).await)
}

/// CSRF guard.
///
/// State-changing methods must carry the session's anti-forgery token in the
/// `x-xsrf-token` header. Read-only methods pass through. Every failure mode
/// gets the same uniform 403.
pub async fn csrf_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !is_state_changing(request.method()) {
        return Ok(next.run(request).await);
    }

    let presented = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let session_id = extract_session_id(request.headers(), &state.cookies);

    let (Some(presented), Some(session_id)) = (presented, session_id) else {
        return Err(ApiError::csrf_rejected());
    };

    if !state.sessions.verify_csrf(&session_id, &presented).await? {
        return Err(ApiError::csrf_rejected());
    }

    Ok(next.run(request).await)
}

fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> CookieCodec {
        CookieCodec::new("test-secret", Environment::Test, 7)
    }

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("{}={}", SESSION_COOKIE, value).parse().unwrap(),
        );
        headers
    }

    #[test]
    fn test_seal_unseal_round_trip() {
        let codec = codec();
        let sealed = codec.seal("session-id-123");
        assert_eq!(codec.unseal(&sealed), Some("session-id-123".to_string()));
    }

    #[test]
    fn test_unseal_rejects_tampered_id() {
        let codec = codec();
        let sealed = codec.seal("session-id-123");
        let (_, signature) = sealed.rsplit_once('.').unwrap();
        let forged = format!("other-session.{}", signature);

        assert!(codec.unseal(&forged).is_none());
    }

    #[test]
    fn test_unseal_rejects_unsigned_value() {
        let codec = codec();
        assert!(codec.unseal("session-id-123").is_none());
        assert!(codec.unseal("").is_none());
    }

    #[test]
    fn test_unseal_rejects_foreign_secret() {
        let ours = codec();
        let theirs = CookieCodec::new("другой-secret", Environment::Test, 7);

        let sealed = theirs.seal("session-id-123");
        assert!(ours.unseal(&sealed).is_none());
    }

    #[test]
    fn test_set_cookie_attributes_dev() {
        let codec = codec();
        let cookie = codec.set_cookie("abc");

        assert!(cookie.starts_with("session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains(&format!("Max-Age={}", 7 * 24 * 60 * 60)));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn test_set_cookie_attributes_production() {
        let codec = CookieCodec::new("prod-secret", Environment::Production, 7);
        let cookie = codec.set_cookie("abc");

        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=None"));
    }

    #[test]
    fn test_clear_cookie_expires_immediately() {
        let cookie = codec().clear_cookie();
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.starts_with("session=;"));
    }

    #[test]
    fn test_extract_session_id_valid() {
        let codec = codec();
        let headers = headers_with_cookie(&codec.seal("sid-1"));

        assert_eq!(extract_session_id(&headers, &codec), Some("sid-1".to_string()));
    }

    #[test]
    fn test_extract_session_id_among_other_cookies() {
        let codec = codec();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("theme=dark; session={}; lang=en", codec.seal("sid-2"))
                .parse()
                .unwrap(),
        );

        assert_eq!(extract_session_id(&headers, &codec), Some("sid-2".to_string()));
    }

    #[test]
    fn test_extract_session_id_ignores_forged_cookie() {
        let codec = codec();
        let headers = headers_with_cookie("sid-1.bogus-signature");

        assert!(extract_session_id(&headers, &codec).is_none());
    }

    #[test]
    fn test_extract_session_id_absent() {
        let codec = codec();
        assert!(extract_session_id(&HeaderMap::new(), &codec).is_none());
    }

    #[test]
    fn test_is_state_changing() {
        assert!(is_state_changing(&Method::POST));
        assert!(is_state_changing(&Method::PUT));
        assert!(is_state_changing(&Method::PATCH));
        assert!(is_state_changing(&Method::DELETE));
        assert!(!is_state_changing(&Method::GET));
        assert!(!is_state_changing(&Method::HEAD));
        assert!(!is_state_changing(&Method::OPTIONS));
    }

    #[test]
    fn test_api_error_status_mapping() {
        let cases = [
            (ApiError::unauthenticated("x"), StatusCode::UNAUTHORIZED),
            (ApiError::invalid_credentials(), StatusCode::UNAUTHORIZED),
            (ApiError::csrf_rejected(), StatusCode::FORBIDDEN),
            (ApiError::duplicate_email(), StatusCode::BAD_REQUEST),
            (ApiError::validation_error("x"), StatusCode::BAD_REQUEST),
            (ApiError::not_found("x"), StatusCode::NOT_FOUND),
            (ApiError::internal_error("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn test_internal_error_leaks_no_detail() {
        let error = ApiError::internal_error("connection refused (db=10.0.0.3)");
        assert_eq!(error.error.message, "Internal server error");
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// Every sealed id must unseal back to itself.
        #[test]
        fn property_seal_unseal_round_trip(sid in "[a-zA-Z0-9-]{1,64}") {
            let codec = CookieCodec::new("prop-secret", Environment::Test, 7);
            prop_assert_eq!(codec.unseal(&codec.seal(&sid)), Some(sid));
        }

        /// Flipping the signature tail must break verification.
        #[test]
        fn property_tampered_signature_rejected(sid in "[a-zA-Z0-9-]{1,64}") {
            let codec = CookieCodec::new("prop-secret", Environment::Test, 7);
            let mut tampered = codec.seal(&sid);
            let last = tampered.pop().unwrap();
            tampered.push(if last == 'A' { 'B' } else { 'A' });
            prop_assert!(codec.unseal(&tampered).is_none());
        }
    }
}
