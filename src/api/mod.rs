//! API layer - HTTP handlers and routing
//!
//! This module contains all HTTP endpoints for the Userhub service:
//! - Auth endpoints (csrftoken, login, logout)
//! - User endpoints (register, list, lookup, self-service)
//!
//! Middleware ordering matters: the CSRF guard wraps every route and runs
//! first on state-changing requests; the authorization guard wraps only the
//! routes that assume an identity.

pub mod auth;
pub mod common;
pub mod middleware;
pub mod users;


use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use middleware::{ApiError, AppState, CurrentUser, CSRF_HEADER, SESSION_COOKIE};

/// Build the main API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Routes that assume an authenticated identity
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/users", users::protected_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .nest("/auth", auth::public_router())
        .nest("/users", users::public_router())
        .merge(protected_routes)
        // CSRF enforcement covers every state-changing route, login included
        .layer(axum_middleware::from_fn_with_state(
            state,
            middleware::csrf_guard,
        ))
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    // CORS configured for cookie-credentialed requests from a single origin
    let cors = CorsLayer::new()
        .allow_origin(cors_origin.parse::<HeaderValue>().unwrap())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::COOKIE,
            HeaderName::from_static(CSRF_HEADER),
        ])
        .allow_credentials(true);

    Router::new()
        .merge(build_api_router(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
