use super::auth::{AdminOnly, Authorized, Principal, UsersOnly};
use super::{error_response, AppState};
use crate::identity::Role;
use crate::shared::sanitize::{sanitize_identifier, SanitizeMode};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct UserDashboardResponse {
    ok: bool,
    message: String,
}

#[derive(Debug, Serialize)]
struct AdminDashboardResponse {
    ok: bool,
    users: Vec<UserSummary>,
}

#[derive(Debug, Serialize)]
struct UserSummary {
    username: String,
    email: String,
}

/// Sends the principal to the dashboard for their highest role.
pub async fn home(principal: Principal) -> Response {
    if principal.has_role(Role::Admin) {
        Redirect::to("/admin/dashboard").into_response()
    } else if principal.has_role(Role::User) {
        Redirect::to("/user/dashboard").into_response()
    } else {
        error_response(StatusCode::UNAUTHORIZED, "No dashboard for this account")
    }
}

pub async fn user_dashboard(authorized: Authorized<UsersOnly>) -> Response {
    let username = sanitize_identifier(&authorized.principal.username, SanitizeMode::Username);
    let username = if username.is_empty() {
        "Unknown".to_string()
    } else {
        username
    };
    (
        StatusCode::OK,
        Json(UserDashboardResponse {
            ok: true,
            message: format!("Welcome to your dashboard, {username}!"),
        }),
    )
        .into_response()
}

pub async fn admin_dashboard(
    State(state): State<Arc<AppState>>,
    _authorized: Authorized<AdminOnly>,
) -> Response {
    let accounts = match state.accounts.list_accounts().await {
        Ok(accounts) => accounts,
        Err(error) => {
            tracing::error!(?error, "failed to list accounts");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load users");
        }
    };

    let users = accounts
        .into_iter()
        .map(|account| UserSummary {
            username: sanitize_identifier(&account.username, SanitizeMode::Username),
            email: sanitize_identifier(&account.email, SanitizeMode::Email),
        })
        .collect::<Vec<_>>();

    (
        StatusCode::OK,
        Json(AdminDashboardResponse { ok: true, users }),
    )
        .into_response()
}
