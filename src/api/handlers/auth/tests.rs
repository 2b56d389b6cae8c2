//! Auth module tests.

use super::claim::test_support::StaticVerifier;
use super::login::login;
use super::nonce::nonce;
use super::proof::test_support::envelope;
use super::session::{SESSION_COOKIE_NAME, logout, session};
use super::types::LoginRequest;
use super::{
    AuthConfig, AuthState, ClaimPolicy, MemorySessionStore, MemoryUserStore, NewUser,
    RenoncePolicy, SignerKey, StoreError, TicketIdentity, User, UserStore,
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use axum::{
    Json,
    body::to_bytes,
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode, header::COOKIE, header::SET_COOKIE},
    response::Response,
};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

struct Harness {
    state: Arc<AuthState>,
    users: Arc<MemoryUserStore>,
    sessions: Arc<MemorySessionStore>,
}

impl Harness {
    fn new(renonce_policy: RenoncePolicy, verified: Option<bool>) -> Self {
        let users = Arc::new(MemoryUserStore::new());
        Self::with_users(renonce_policy, verified, users.clone(), users)
    }

    fn with_users(
        renonce_policy: RenoncePolicy,
        verified: Option<bool>,
        users: Arc<MemoryUserStore>,
        user_store: Arc<dyn UserStore>,
    ) -> Self {
        let sessions = Arc::new(MemorySessionStore::new());
        let config = AuthConfig::new(ClaimPolicy::new(
            vec![SignerKey::new("aa", "bb")],
            ["evt1".to_string()].into_iter().collect(),
        ))
        .with_renonce_policy(renonce_policy);
        let state = Arc::new(AuthState::new(
            config,
            Arc::new(StaticVerifier(verified)),
            user_store,
            sessions.clone(),
        ));
        Self {
            state,
            users,
            sessions,
        }
    }

    async fn nonce(&self, headers: HeaderMap) -> Response {
        nonce(headers, Extension(self.state.clone())).await
    }

    async fn login(&self, headers: HeaderMap, pcd: Option<String>) -> Response {
        login(
            headers,
            Extension(self.state.clone()),
            Some(Json(LoginRequest { pcd })),
        )
        .await
    }
}

fn claim(watermark: &str) -> Value {
    json!({
        "signer": ["aa", "bb"],
        "watermark": watermark,
        "nullifierHash": "abc",
        "partialTicket": { "attendeeEmail": "a@x.com", "eventId": "evt1" }
    })
}

fn cookie_headers(response: &Response) -> Result<HeaderMap> {
    let set_cookie = response
        .headers()
        .get(SET_COOKIE)
        .context("missing Set-Cookie")?
        .to_str()?;
    let pair = set_cookie.split(';').next().context("empty cookie")?;
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_str(pair)?);
    Ok(headers)
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn nonce_then_login_creates_user() -> Result<()> {
    let harness = Harness::new(RenoncePolicy::Allow, Some(true));

    let response = harness.nonce(HeaderMap::new()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = cookie_headers(&response)?;
    assert!(
        headers
            .get(COOKIE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(SESSION_COOKIE_NAME))
    );
    let nonce = json_body(response).await?["nonce"]
        .as_str()
        .context("nonce")?
        .to_string();

    let response = harness
        .login(headers.clone(), Some(envelope(&claim(&nonce))))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["user"]["attendeeEmail"], "a@x.com");

    let user = harness
        .users
        .find_by_ticket_id("abc")
        .await?
        .context("user not stored")?;
    assert_eq!(body["user"]["id"], user.id.to_string());

    let response = session(headers, Extension(harness.state.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["user"]["id"], user.id.to_string());
    Ok(())
}

#[tokio::test]
async fn missing_pcd_is_bad_request() -> Result<()> {
    let harness = Harness::new(RenoncePolicy::Allow, Some(true));
    for pcd in [None, Some(String::new()), Some("  ".to_string())] {
        let response = harness.login(HeaderMap::new(), pcd).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await?["error"], "No PCD specified");
    }

    let response = login(HeaderMap::new(), Extension(harness.state.clone()), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn verifier_outage_leaves_session_intact() -> Result<()> {
    let harness = Harness::new(RenoncePolicy::Allow, None);
    let response = harness.nonce(HeaderMap::new()).await;
    let headers = cookie_headers(&response)?;
    let nonce = json_body(response).await?["nonce"]
        .as_str()
        .context("nonce")?
        .to_string();

    let response = harness
        .login(headers.clone(), Some(envelope(&claim(&nonce))))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(harness.users.is_empty().await);

    let state = harness.state.sessions().open(&headers).await?;
    assert_eq!(state.state().nonce.as_deref(), Some(nonce.as_str()));
    Ok(())
}

struct UnavailableStore;

#[async_trait]
impl UserStore for UnavailableStore {
    async fn find_by_ticket_id(&self, _ticket_id: &str) -> Result<Option<User>, StoreError> {
        Err(StoreError::Backend(anyhow!("connection refused")))
    }

    async fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
        Err(StoreError::Backend(anyhow!("connection refused")))
    }

    async fn record_login(
        &self,
        id: Uuid,
        _last_login: DateTime<Utc>,
        _metadata: &Value,
    ) -> Result<User, StoreError> {
        Err(StoreError::Missing(id))
    }

    async fn bind_ticket(
        &self,
        id: Uuid,
        _identity: &TicketIdentity,
        _last_login: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        Err(StoreError::Missing(id))
    }

    async fn insert(&self, _user: &NewUser) -> Result<User, StoreError> {
        Err(StoreError::Backend(anyhow!("connection refused")))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Backend(anyhow!("connection refused")))
    }
}

#[tokio::test]
async fn store_failure_leaves_session_intact() -> Result<()> {
    let harness = Harness::with_users(
        RenoncePolicy::Allow,
        Some(true),
        Arc::new(MemoryUserStore::new()),
        Arc::new(UnavailableStore),
    );
    let response = harness.nonce(HeaderMap::new()).await;
    let headers = cookie_headers(&response)?;
    let nonce = json_body(response).await?["nonce"]
        .as_str()
        .context("nonce")?
        .to_string();

    let response = harness
        .login(headers.clone(), Some(envelope(&claim(&nonce))))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await?;
    assert!(!body["error"].as_str().unwrap_or_default().contains("connection refused"));

    let session = harness.state.sessions().open(&headers).await?;
    assert_eq!(session.state().nonce.as_deref(), Some(nonce.as_str()));
    assert_eq!(session.state().user, None);
    Ok(())
}

#[tokio::test]
async fn rejected_login_burns_nonce() -> Result<()> {
    let harness = Harness::new(RenoncePolicy::Allow, Some(false));
    let response = harness.nonce(HeaderMap::new()).await;
    let headers = cookie_headers(&response)?;
    let nonce = json_body(response).await?["nonce"]
        .as_str()
        .context("nonce")?
        .to_string();

    let response = harness
        .login(headers.clone(), Some(envelope(&claim(&nonce))))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await?["error"], "ZK ticket PCD is not valid");

    let state = harness.state.sessions().open(&headers).await?;
    assert_eq!(state.state().nonce, None);
    Ok(())
}

#[tokio::test]
async fn reject_policy_refuses_new_nonce_while_logged_in() -> Result<()> {
    let harness = Harness::new(RenoncePolicy::Reject, Some(true));
    let response = harness.nonce(HeaderMap::new()).await;
    let headers = cookie_headers(&response)?;
    let nonce = json_body(response).await?["nonce"]
        .as_str()
        .context("nonce")?
        .to_string();
    let response = harness
        .login(headers.clone(), Some(envelope(&claim(&nonce))))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness.nonce(headers.clone()).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = logout(headers.clone(), Extension(harness.state.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(harness.sessions.is_empty().await);

    let response = harness.nonce(headers).await;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn allow_policy_drops_identity_on_new_nonce() -> Result<()> {
    let harness = Harness::new(RenoncePolicy::Allow, Some(true));
    let response = harness.nonce(HeaderMap::new()).await;
    let headers = cookie_headers(&response)?;
    let nonce = json_body(response).await?["nonce"]
        .as_str()
        .context("nonce")?
        .to_string();
    harness
        .login(headers.clone(), Some(envelope(&claim(&nonce))))
        .await;

    let response = harness.nonce(headers.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = session(headers, Extension(harness.state.clone())).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    Ok(())
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

#[test]
fn schema_declares_unique_ticket_and_email() {
    let statements = split_sql_statements(SCHEMA_SQL);
    assert!(
        statements
            .iter()
            .any(|s| s.contains("CREATE TABLE IF NOT EXISTS users")
                && s.contains("ticket_id TEXT UNIQUE"))
    );
    assert!(
        statements
            .iter()
            .any(|s| s.starts_with("CREATE UNIQUE INDEX") && s.contains("(lower(email))"))
    );
    assert!(
        statements
            .iter()
            .any(|s| s.contains("CREATE TABLE IF NOT EXISTS auth_sessions"))
    );
}
