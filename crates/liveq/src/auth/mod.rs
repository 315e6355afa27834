//! Bearer-token session authentication.
//!
//! Sessions are opaque tokens held in a concurrent store; the same token
//! authenticates REST calls (Authorization header) and the WebSocket
//! stream (in-band `auth` frame).

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::api::ApiError;
use crate::api::state::AppState;

/// Viewer role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only; may run a query only when it is marked observer-can-run.
    #[default]
    Observer,
    /// May create and run ad-hoc queries.
    Maintainer,
    /// Full access.
    Admin,
}

impl Role {
    /// Whether this role may create a new ad-hoc query.
    pub fn can_run_new_query(&self) -> bool {
        !matches!(self, Role::Observer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Observer => write!(f, "observer"),
            Role::Maintainer => write!(f, "maintainer"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "observer" => Ok(Role::Observer),
            "maintainer" => Ok(Role::Maintainer),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// An authenticated operator.
#[derive(Debug, Clone, Serialize)]
pub struct Viewer {
    pub id: u64,
    pub username: String,
    pub role: Role,
    /// Team scoping, if any; threaded into every datastore call.
    pub team_id: Option<u64>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("malformed authorization header")]
    InvalidAuthHeader,

    #[error("invalid or expired session token")]
    InvalidToken,

    #[error("invalid credentials")]
    InvalidCredentials,
}

#[derive(Debug)]
struct AuthInner {
    /// Session token -> viewer.
    sessions: DashMap<String, Viewer>,
    /// Username -> (password, viewer template).
    users: DashMap<String, (String, Viewer)>,
}

/// Shared session store.
#[derive(Debug, Clone)]
pub struct AuthState {
    inner: Arc<AuthInner>,
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AuthInner {
                sessions: DashMap::new(),
                users: DashMap::new(),
            }),
        }
    }

    /// Register a login-capable user.
    pub fn add_user(&self, password: &str, viewer: Viewer) {
        self.inner
            .users
            .insert(viewer.username.clone(), (password.to_string(), viewer));
    }

    /// Exchange credentials for a session token.
    pub fn login(&self, username: &str, password: &str) -> Result<(String, Viewer), AuthError> {
        let entry = self
            .inner
            .users
            .get(username)
            .ok_or(AuthError::InvalidCredentials)?;
        let (expected, viewer) = entry.value();
        if expected != password {
            return Err(AuthError::InvalidCredentials);
        }
        let viewer = viewer.clone();
        Ok((self.issue_token(viewer.clone()), viewer))
    }

    /// Mint a session token directly (seeding, tests).
    pub fn issue_token(&self, viewer: Viewer) -> String {
        let token = Uuid::new_v4().to_string();
        self.inner.sessions.insert(token.clone(), viewer);
        token
    }

    /// Look up the viewer behind a session token.
    pub fn verify(&self, token: &str) -> Option<Viewer> {
        self.inner.sessions.get(token).map(|v| v.clone())
    }

    pub fn revoke(&self, token: &str) {
        self.inner.sessions.remove(token);
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Extractor yielding the viewer behind the request's bearer token.
#[derive(Debug, Clone)]
pub struct CurrentViewer(pub Viewer);

impl FromRequestParts<AppState> for CurrentViewer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidAuthHeader)?;

        let viewer = state.auth.verify(token).ok_or(AuthError::InvalidToken)?;
        Ok(CurrentViewer(viewer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewer(role: Role) -> Viewer {
        Viewer {
            id: 1,
            username: "op".to_string(),
            role,
            team_id: None,
        }
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Observer, Role::Maintainer, Role::Admin] {
            assert_eq!(role.to_string().parse::<Role>(), Ok(role));
        }
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_observer_cannot_run_new_query() {
        assert!(!Role::Observer.can_run_new_query());
        assert!(Role::Maintainer.can_run_new_query());
        assert!(Role::Admin.can_run_new_query());
    }

    #[test]
    fn test_login_and_verify() {
        let auth = AuthState::new();
        auth.add_user("secret", viewer(Role::Admin));

        assert!(matches!(
            auth.login("op", "wrong"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("nobody", "secret"),
            Err(AuthError::InvalidCredentials)
        ));

        let (token, logged_in) = auth.login("op", "secret").unwrap();
        assert_eq!(logged_in.username, "op");
        assert_eq!(auth.verify(&token).unwrap().id, 1);

        auth.revoke(&token);
        assert!(auth.verify(&token).is_none());
    }
}
