//! User API endpoints
//!
//! Handles HTTP requests for account management:
//! - POST /users - Register an account
//! - GET /users - Public listing with pagination
//! - GET /users/{id} - Public identity of an account
//! - GET /users/me - Private identity of the caller
//! - PATCH /users/me - Update the caller's account
//! - DELETE /users/me - Delete the caller's account
//!
//! The "me" routes act exclusively on the id the authorization guard
//! resolved from the session. No mutating route accepts a target id from the
//! path or body.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, CurrentUser};
use crate::models::{CreateUserInput, UpdateUserInput};

/// Request body for account registration
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Request body for updating the caller's account
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Build public user routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/{id}", get(get_user))
}

/// Build protected user routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new().route("/me", get(me).patch(update_me).delete(delete_me))
}

/// POST /users - Register an account
///
/// Responds with the public identity only; neither the email nor anything
/// password-derived appears in the body.
async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .users
        .create(CreateUserInput {
            name: body.name,
            email: body.email,
            password: body.password,
        })
        .await?;

    tracing::info!(user_id = user.id, "account created");

    Ok((StatusCode::CREATED, Json(user.public())))
}

/// GET /users?page=&limit= - Public listing
///
/// Returns `{count, data}` with the newest accounts first.
async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state.users.paginate(query.page, query.limit).await?;
    Ok(Json(page))
}

/// GET /users/me - Private identity of the caller
///
/// The only route that discloses an email address, and only the caller's
/// own. The guard supplies the id; the private record is fetched fresh from
/// the store.
async fn me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let private = state.users.find_private(user.0.id).await?;
    Ok(Json(private))
}

/// GET /users/{id} - Public identity of an account
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let public = state.users.find_public(id).await?;
    Ok(Json(public))
}

/// PATCH /users/me - Update the caller's account
async fn update_me(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(body): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state
        .users
        .update_self(
            user.0.id,
            UpdateUserInput {
                name: body.name,
                email: body.email,
                password: body.password,
            },
        )
        .await?;

    Ok(Json(updated.private()))
}

/// DELETE /users/me - Delete the caller's account
///
/// Removes the account and every session it owns in one transaction, then
/// clears the cookie.
async fn delete_me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state.users.delete_self(user.0.id).await?;

    tracing::info!(user_id = user.0.id, "account deleted");

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&state.cookies.clear_cookie()).unwrap(),
    );

    Ok((StatusCode::NO_CONTENT, response_headers))
}
