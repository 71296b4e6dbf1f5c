//! Session cookies and role authorization.
//!
//! Every role-gated handler takes an [`Authorized`] extractor instead of
//! checking roles inline. The principal is rebuilt from the store on each
//! request, so role changes apply without re-login.

use super::{error_response, AppState};
use crate::identity::Role;
use crate::shared::session_token::{sign_session_token, verify_session_token, SessionClaims};
use crate::shared::time::now_millis;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, header::COOKIE, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::marker::PhantomData;
use std::sync::Arc;

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub account_id: String,
    pub username: String,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    Unauthenticated,
    Forbidden,
    Unavailable,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            AuthRejection::Unauthenticated => {
                error_response(StatusCode::UNAUTHORIZED, "Authentication required")
            }
            AuthRejection::Forbidden => error_response(StatusCode::FORBIDDEN, "Forbidden"),
            AuthRejection::Unavailable => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load session",
            ),
        }
    }
}

/// Does the principal hold `role`?
pub fn authorize(principal: &Principal, role: Role) -> Result<(), AuthRejection> {
    if principal.has_role(role) {
        Ok(())
    } else {
        Err(AuthRejection::Forbidden)
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(AuthRejection::Unauthenticated)?;
        let claims = verify_session_token(token, &state.sessions.secret, now_millis()).map_err(
            |error| {
                tracing::debug!(?error, "rejected session token");
                AuthRejection::Unauthenticated
            },
        )?;

        let account = state
            .accounts
            .find_by_id(&claims.account_id)
            .await
            .map_err(|error| {
                tracing::error!(?error, "failed to load session account");
                AuthRejection::Unavailable
            })?
            .ok_or(AuthRejection::Unauthenticated)?;
        let roles = state.accounts.roles_for(&account.id).await.map_err(|error| {
            tracing::error!(?error, account_id = account.id, "failed to load roles");
            AuthRejection::Unavailable
        })?;

        Ok(Principal {
            account_id: account.id,
            username: account.username,
            roles,
        })
    }
}

pub trait RequiredRole {
    const ROLE: Role;
}

#[derive(Debug)]
pub struct AdminOnly;

impl RequiredRole for AdminOnly {
    const ROLE: Role = Role::Admin;
}

#[derive(Debug)]
pub struct UsersOnly;

impl RequiredRole for UsersOnly {
    const ROLE: Role = Role::User;
}

/// An authenticated principal holding `R::ROLE`.
#[derive(Debug)]
pub struct Authorized<R> {
    pub principal: Principal,
    _role: PhantomData<fn() -> R>,
}

#[axum::async_trait]
impl<R> FromRequestParts<Arc<AppState>> for Authorized<R>
where
    R: RequiredRole + Send + Sync + 'static,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_request_parts(parts, state).await?;
        let role = R::ROLE;
        if let Err(rejection) = authorize(&principal, role) {
            tracing::info!(account_id = principal.account_id, %role, "role check failed");
            return Err(rejection);
        }
        Ok(Self {
            principal,
            _role: PhantomData,
        })
    }
}

/// Signs a session for `account_id` and renders it as a `Set-Cookie` value.
pub fn issue_session_cookie(state: &AppState, account_id: &str) -> anyhow::Result<String> {
    let claims = SessionClaims::new(account_id, now_millis(), state.sessions.ttl_secs);
    let token = sign_session_token(&claims, &state.sessions.secret)?;
    Ok(session_cookie(&token, state.sessions.cookie_secure))
}

pub fn session_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn expired_session_cookie(secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Bearer header first, then the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers).or_else(|| cookie_value(headers, SESSION_COOKIE))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let authorization = headers.get(AUTHORIZATION)?;
    let value = authorization.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name && !value.is_empty()).then_some(value)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn principal(roles: &[Role]) -> Principal {
        Principal {
            account_id: "id-1".to_string(),
            username: "RegularUser".to_string(),
            roles: roles.to_vec(),
        }
    }

    #[test]
    fn authorize_requires_the_exact_role() {
        assert_eq!(authorize(&principal(&[Role::Admin]), Role::Admin), Ok(()));
        assert_eq!(authorize(&principal(&[Role::User]), Role::User), Ok(()));
        assert_eq!(
            authorize(&principal(&[Role::User]), Role::Admin),
            Err(AuthRejection::Forbidden)
        );
        // Admin does not imply user.
        assert_eq!(
            authorize(&principal(&[Role::Admin]), Role::User),
            Err(AuthRejection::Forbidden)
        );
        assert_eq!(
            authorize(&principal(&[]), Role::User),
            Err(AuthRejection::Forbidden)
        );
    }

    #[test]
    fn session_token_prefers_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; session=from-cookie"));
        assert_eq!(session_token(&headers), Some("from-cookie"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(session_token(&headers), Some("from-header"));
    }

    #[test]
    fn cookie_lookup_ignores_other_and_empty_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("sessionx=nope; session="));
        assert_eq!(session_token(&headers), None);

        headers.append(COOKIE, HeaderValue::from_static("session=abc.def"));
        assert_eq!(session_token(&headers), Some("abc.def"));
    }

    #[test]
    fn cookies_carry_expected_attributes() {
        assert_eq!(
            session_cookie("abc.def", false),
            "session=abc.def; Path=/; HttpOnly; SameSite=Lax"
        );
        assert!(session_cookie("abc.def", true).ends_with("; Secure"));
        assert!(expired_session_cookie(false).contains("Max-Age=0"));
    }
}
