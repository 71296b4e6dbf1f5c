use super::auth::{expired_session_cookie, issue_session_cookie, Principal};
use super::{error_response, AppState};
use crate::identity::{IdentityError, Role};
use crate::shared::sanitize::{sanitize_identifier, SanitizeMode};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Serialize)]
struct SanitizedInputResponse {
    ok: bool,
    error: String,
    sanitized: SanitizedFields,
}

#[derive(Debug, Serialize)]
struct SanitizedFields {
    username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProfileResponse {
    ok: bool,
    #[serde(rename = "userId")]
    user_id: String,
    username: String,
    email: String,
    roles: Vec<Role>,
    #[serde(rename = "createdAt")]
    created_at: i64,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON"),
    };

    let username = match required_field("Username", payload.username) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let email = match required_field("Email", payload.email) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let password = match required_field("Password", payload.password) {
        Ok(value) => value,
        Err(response) => return response,
    };
    if !looks_like_email(&email) {
        return error_response(StatusCode::BAD_REQUEST, "Email is not a valid e-mail address.");
    }

    let clean_username = sanitize_identifier(&username, SanitizeMode::Username);
    let clean_email = sanitize_identifier(&email, SanitizeMode::Email);
    if clean_username != username || clean_email != email {
        tracing::info!("registration rejected, submitted identifiers needed sanitizing");
        return sanitized_input_response(
            "Input was sanitized. Please confirm your submitted data.",
            SanitizedFields {
                username: clean_username,
                email: Some(clean_email),
            },
        );
    }

    let account = match state
        .accounts
        .create_account(&clean_username, &clean_email, &password, &[Role::User])
        .await
    {
        Ok(account) => account,
        Err(error @ IdentityError::DuplicateUsername(_)) => {
            return error_response(StatusCode::CONFLICT, error.to_string());
        }
        Err(error @ IdentityError::PasswordPolicy(_)) => {
            return error_response(StatusCode::BAD_REQUEST, error.to_string());
        }
        Err(error) => {
            tracing::error!(?error, "registration failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Registration failed");
        }
    };

    signed_in_redirect(&state, &account.id)
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON"),
    };

    let username = match required_field("Username", payload.username) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let password = match required_field("Password", payload.password) {
        Ok(value) => value,
        Err(response) => return response,
    };

    let clean_username = sanitize_identifier(&username, SanitizeMode::Username);
    if clean_username != username {
        return sanitized_input_response(
            "Input was sanitized. Please confirm your username.",
            SanitizedFields {
                username: clean_username,
                email: None,
            },
        );
    }

    match state
        .accounts
        .verify_credentials(&clean_username, &password)
        .await
    {
        Ok(Some(account)) => {
            tracing::info!(account_id = account.id, "signed in");
            signed_in_redirect(&state, &account.id)
        }
        Ok(None) => error_response(StatusCode::UNAUTHORIZED, "Invalid login attempt."),
        Err(error) => {
            tracing::error!(?error, "login failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Login failed")
        }
    }
}

pub async fn logout(State(state): State<Arc<AppState>>) -> Response {
    (
        [(SET_COOKIE, expired_session_cookie(state.sessions.cookie_secure))],
        Redirect::to("/"),
    )
        .into_response()
}

/// Stored identifiers are cleaned again before they are echoed back.
pub async fn profile(
    State(state): State<Arc<AppState>>,
    _principal: Principal,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(user_id) = params
        .get("userId")
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
    else {
        return error_response(StatusCode::BAD_REQUEST, "User ID is required.");
    };

    let account = match state.accounts.find_by_id(user_id).await {
        Ok(Some(account)) => account,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "User not found."),
        Err(error) => {
            tracing::error!(?error, "failed to load profile");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load profile");
        }
    };
    let roles = match state.accounts.roles_for(&account.id).await {
        Ok(roles) => roles,
        Err(error) => {
            tracing::error!(?error, account_id = account.id, "failed to load profile roles");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load profile");
        }
    };

    (
        StatusCode::OK,
        Json(ProfileResponse {
            ok: true,
            user_id: account.id,
            username: sanitize_identifier(&account.username, SanitizeMode::Username),
            email: sanitize_identifier(&account.email, SanitizeMode::Email),
            roles,
            created_at: account.created_at,
        }),
    )
        .into_response()
}

fn signed_in_redirect(state: &AppState, account_id: &str) -> Response {
    match issue_session_cookie(state, account_id) {
        Ok(cookie) => ([(SET_COOKIE, cookie)], Redirect::to("/")).into_response(),
        Err(error) => {
            tracing::error!(?error, "failed to issue session");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to start session")
        }
    }
}

fn sanitized_input_response(message: &str, sanitized: SanitizedFields) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(SanitizedInputResponse {
            ok: false,
            error: message.to_string(),
            sanitized,
        }),
    )
        .into_response()
}

fn required_field(name: &str, value: Option<String>) -> Result<String, Response> {
    value.filter(|value| !value.trim().is_empty()).ok_or_else(|| {
        error_response(StatusCode::BAD_REQUEST, format!("{name} is required."))
    })
}

/// One `@` with something on both sides; deliverability is not checked.
fn looks_like_email(value: &str) -> bool {
    let mut parts = value.split('@');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
    )
}
