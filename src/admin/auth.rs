//! API-key auth for the admin surface. Keys are configured once at startup
//! with a role attached; a request's key must carry a role at or above
//! whatever the route requires.

use std::collections::HashMap;

use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

#[derive(Clone, Default)]
pub struct AdminAuth {
    keys: HashMap<String, Role>,
}

impl AdminAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>, role: Role) -> Self {
        self.keys.insert(key.into(), role);
        self
    }

    fn role_for(&self, key: &str) -> Option<Role> {
        self.keys.get(key).copied()
    }
}

#[derive(Deserialize)]
struct ApiKeyQuery {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

/// Extracts the caller's role from `X-API-Key` or `?apiKey=`, stashing it
/// as a request extension so handlers can check it against the role their
/// route requires.
pub async fn authenticate(
    State(auth): State<AdminAuth>,
    Query(query): Query<ApiKeyQuery>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let header_key = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let key = header_key.or(query.api_key).ok_or(StatusCode::UNAUTHORIZED)?;
    let role = auth.role_for(&key).ok_or(StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(role);
    Ok(next.run(request).await)
}

pub fn require(role: Role, granted: Option<Role>) -> Result<(), StatusCode> {
    match granted {
        Some(granted) if granted >= role => Ok(()),
        Some(_) => Err(StatusCode::FORBIDDEN),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_treats_admin_as_a_superset() {
        assert!(Role::Admin > Role::Operator);
        assert!(Role::Operator > Role::Viewer);
    }

    #[test]
    fn require_accepts_an_equal_or_higher_role() {
        assert!(require(Role::Operator, Some(Role::Admin)).is_ok());
        assert!(require(Role::Operator, Some(Role::Viewer)).is_err());
        assert!(require(Role::Operator, None).is_err());
    }
}
