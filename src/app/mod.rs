pub mod account;
pub mod auth;
pub mod dashboard;


use crate::identity::AccountStore;
use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Debug, Clone)]
pub struct AppState {
    pub accounts: AccountStore,
    pub sessions: SessionSettings,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub secret: String,
    pub ttl_secs: i64,
    pub cookie_secure: bool,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) ok: bool,
    pub(crate) error: String,
}

pub(crate) fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: error.into(),
        }),
    )
        .into_response()
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(dashboard::home))
        .route("/api/health", get(health))
        .route("/account/register", post(account::register))
        .route("/account/login", post(account::login))
        .route("/account/logout", post(account::logout))
        .route("/account/profile", get(account::profile))
        .route("/user/dashboard", get(dashboard::user_dashboard))
        .route("/admin/dashboard", get(dashboard::admin_dashboard))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(OkResponse { ok: true })
}
