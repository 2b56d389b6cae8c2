//! Session state for the challenge-response flow, plus the logout and
//! session endpoints.
//!
//! A session is addressed by a random token carried in the
//! `ticketauth_session` cookie or a `Bearer` header. Stores only ever see the
//! SHA-256 of the token.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error};

use super::{
    error::AuthError,
    state::AuthState,
    types::{ErrorResponse, LogoutResponse, SessionIdentity, SessionResponse},
    utils::{generate_session_token, hash_session_token},
};

pub const SESSION_COOKIE_NAME: &str = "ticketauth_session";

/// What a session holds between requests.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    /// Pending challenge; single use.
    pub nonce: Option<String>,
    pub user: Option<SessionIdentity>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, token_hash: &[u8]) -> Result<Option<SessionState>>;
    async fn save(&self, token_hash: &[u8], state: &SessionState, ttl_seconds: i64) -> Result<()>;
    async fn delete(&self, token_hash: &[u8]) -> Result<()>;
    /// Drop expired sessions, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}

/// Periodically purge expired sessions so abandoned nonces do not accumulate.
pub fn spawn_sweeper(store: Arc<dyn SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!("Purged {purged} expired sessions"),
                Err(err) => error!("Failed to purge expired sessions: {err:#}"),
            }
        }
    })
}

/// A session opened for one request.
pub(crate) struct Session {
    token: String,
    persisted: bool,
    state: SessionState,
}

impl Session {
    pub(crate) fn state(&self) -> &SessionState {
        &self.state
    }
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ttl_seconds: i64,
    cookie_secure: bool,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, ttl_seconds: i64, cookie_secure: bool) -> Self {
        Self {
            store,
            ttl_seconds,
            cookie_secure,
        }
    }

    /// Load the caller's session, or start a fresh one.
    ///
    /// Unknown or expired tokens are replaced rather than adopted.
    pub(crate) async fn open(&self, headers: &HeaderMap) -> Result<Session> {
        if let Some(token) = extract_session_token(headers) {
            if let Some(state) = self.store.load(&hash_session_token(&token)).await? {
                return Ok(Session {
                    token,
                    persisted: true,
                    state,
                });
            }
            debug!("Session token not found, starting a new session");
        }

        Ok(Session {
            token: generate_session_token()?,
            persisted: false,
            state: SessionState::default(),
        })
    }

    /// Store a new pending nonce; any previous nonce or identity is dropped.
    pub(crate) async fn issue_nonce(&self, session: &mut Session, nonce: String) -> Result<()> {
        session.state.nonce = Some(nonce);
        session.state.user = None;
        self.persist(session).await
    }

    /// Burn the pending nonce after a failed login attempt.
    pub(crate) async fn reject_attempt(&self, session: &mut Session) -> Result<()> {
        if session.state.nonce.take().is_none() || !session.persisted {
            return Ok(());
        }
        self.persist(session).await
    }

    pub(crate) async fn complete_login(
        &self,
        session: &mut Session,
        identity: SessionIdentity,
    ) -> Result<()> {
        session.state.nonce = None;
        session.state.user = Some(identity);
        self.persist(session).await
    }

    /// Forget the caller's session. Safe to call without one.
    pub(crate) async fn logout(&self, headers: &HeaderMap) -> Result<()> {
        if let Some(token) = extract_session_token(headers) {
            self.store.delete(&hash_session_token(&token)).await?;
        }
        Ok(())
    }

    pub(crate) async fn current(&self, headers: &HeaderMap) -> Result<Option<SessionIdentity>> {
        let Some(token) = extract_session_token(headers) else {
            return Ok(None);
        };
        let state = self.store.load(&hash_session_token(&token)).await?;
        Ok(state.and_then(|state| state.user))
    }

    async fn persist(&self, session: &mut Session) -> Result<()> {
        self.store
            .save(
                &hash_session_token(&session.token),
                &session.state,
                self.ttl_seconds,
            )
            .await?;
        session.persisted = true;
        Ok(())
    }

    /// `HttpOnly` cookie carrying the session token.
    pub(crate) fn session_cookie(&self, session: &Session) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{SESSION_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            session.token, self.ttl_seconds
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    pub(crate) fn clear_session_cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

#[utoipa::path(
    delete,
    path = "/api/auth",
    responses(
        (status = 200, description = "Session cleared", body = LogoutResponse)
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let sessions = auth_state.sessions();
    if let Err(err) = sessions.logout(&headers).await {
        error!("Failed to delete session: {err:#}");
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = sessions.clear_session_cookie() {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::OK,
        response_headers,
        Json(LogoutResponse { success: true }),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Session is authenticated", body = SessionResponse),
        (status = 204, description = "No authenticated session"),
        (status = 500, description = "Session store failure", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    match auth_state.sessions().current(&headers).await {
        Ok(Some(user)) => (StatusCode::OK, Json(SessionResponse { user })).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => AuthError::Session(err).into_response(),
    }
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        (key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty())
            .then(|| val.trim().to_string())
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
