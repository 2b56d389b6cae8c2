//! In-process user and session stores.
//!
//! They enforce the same uniqueness rules as the Postgres schema, which makes
//! them suitable for tests and single-node development.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    resolver::{NewUser, StoreError, TicketIdentity, User, UserStore},
    session::{SessionState, SessionStore},
};

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.lock().await.is_empty()
    }

    pub async fn get(&self, id: Uuid) -> Option<User> {
        self.users.lock().await.get(&id).cloned()
    }
}

fn same_email(stored: Option<&str>, email: &str) -> bool {
    stored.is_some_and(|stored| stored.to_lowercase() == email.to_lowercase())
}

fn conflicts(
    users: &HashMap<Uuid, User>,
    id: Option<Uuid>,
    ticket_id: Option<&str>,
    email: Option<&str>,
) -> bool {
    users.values().filter(|user| Some(user.id) != id).any(|user| {
        (ticket_id.is_some() && user.ticket_id.as_deref() == ticket_id)
            || email.is_some_and(|email| same_email(user.email.as_deref(), email))
    })
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_ticket_id(&self, ticket_id: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|user| user.ticket_id.as_deref() == Some(ticket_id))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|user| same_email(user.email.as_deref(), email))
            .cloned())
    }

    async fn record_login(
        &self,
        id: Uuid,
        last_login: DateTime<Utc>,
        metadata: &Value,
    ) -> Result<User, StoreError> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(StoreError::Missing(id))?;
        user.last_login = Some(last_login);
        user.metadata = metadata.clone();
        Ok(user.clone())
    }

    async fn bind_ticket(
        &self,
        id: Uuid,
        identity: &TicketIdentity,
        last_login: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let mut users = self.users.lock().await;
        if conflicts(&users, Some(id), Some(&identity.ticket_id), None) {
            return Err(StoreError::Conflict);
        }
        let user = users.get_mut(&id).ok_or(StoreError::Missing(id))?;
        user.ticket_id = Some(identity.ticket_id.clone());
        user.event_id.clone_from(&identity.event_id);
        user.last_login = Some(last_login);
        user.metadata = identity.metadata.clone();
        Ok(user.clone())
    }

    async fn insert(&self, new_user: &NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().await;
        if conflicts(
            &users,
            None,
            new_user.ticket_id.as_deref(),
            new_user.email.as_deref(),
        ) {
            return Err(StoreError::Conflict);
        }
        let user = User {
            id: Uuid::new_v4(),
            ticket_id: new_user.ticket_id.clone(),
            email: new_user.email.clone(),
            event_id: new_user.event_id.clone(),
            last_login: new_user.last_login,
            metadata: new_user.metadata.clone(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Vec<u8>, (SessionState, Instant)>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of stored sessions, expired or not.
    pub async fn stored(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, token_hash: &[u8]) -> Result<Option<SessionState>> {
        let now = Instant::now();
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(token_hash)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(state, _)| state.clone()))
    }

    async fn save(&self, token_hash: &[u8], state: &SessionState, ttl_seconds: i64) -> Result<()> {
        let now = Instant::now();
        let ttl = Duration::from_secs(u64::try_from(ttl_seconds).unwrap_or(0));
        let mut sessions = self.sessions.lock().await;
        sessions.insert(token_hash.to_vec(), (state.clone(), now + ttl));
        Ok(())
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<()> {
        self.sessions.lock().await.remove(token_hash);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(u64::try_from(before - sessions.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_user(ticket_id: Option<&str>, email: Option<&str>) -> NewUser {
        NewUser {
            ticket_id: ticket_id.map(str::to_string),
            email: email.map(str::to_string),
            event_id: None,
            last_login: None,
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn insert_enforces_unique_ticket_and_email() -> Result<()> {
        let store = MemoryUserStore::new();
        store.insert(&new_user(Some("abc"), Some("a@x.com"))).await?;

        assert!(matches!(
            store.insert(&new_user(Some("abc"), None)).await,
            Err(StoreError::Conflict)
        ));
        assert!(matches!(
            store.insert(&new_user(Some("def"), Some("a@x.com"))).await,
            Err(StoreError::Conflict)
        ));
        store.insert(&new_user(Some("def"), None)).await?;
        store.insert(&new_user(None, None)).await?;
        assert_eq!(store.len().await, 3);
        Ok(())
    }

    #[tokio::test]
    async fn email_lookup_and_uniqueness_ignore_case() -> Result<()> {
        let store = MemoryUserStore::new();
        let stored = store.insert(&new_user(None, Some("A@X.com"))).await?;

        let found = store.find_by_email("a@x.com").await?;
        assert_eq!(found.map(|user| user.id), Some(stored.id));
        assert!(matches!(
            store.insert(&new_user(Some("abc"), Some("a@X.COM"))).await,
            Err(StoreError::Conflict)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn bind_ticket_rejects_ticket_owned_elsewhere() -> Result<()> {
        let store = MemoryUserStore::new();
        store.insert(&new_user(Some("abc"), None)).await?;
        let other = store.insert(&new_user(None, Some("b@x.com"))).await?;

        let identity = TicketIdentity {
            ticket_id: "abc".to_string(),
            email: Some("b@x.com".to_string()),
            event_id: None,
            metadata: json!({}),
        };
        assert!(matches!(
            store.bind_ticket(other.id, &identity, Utc::now()).await,
            Err(StoreError::Conflict)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn record_login_on_unknown_user() {
        let store = MemoryUserStore::new();
        let id = Uuid::new_v4();
        let result = store.record_login(id, Utc::now(), &json!({})).await;
        assert!(matches!(result, Err(StoreError::Missing(missing)) if missing == id));
    }

    #[tokio::test]
    async fn session_store_expires_entries() -> Result<()> {
        let store = MemorySessionStore::new();
        let state = SessionState {
            nonce: Some("1".to_string()),
            user: None,
        };
        store.save(b"live", &state, 60).await?;
        store.save(b"dead", &state, 0).await?;

        assert_eq!(store.load(b"live").await?, Some(state));
        assert_eq!(store.load(b"dead").await?, None);
        assert_eq!(store.len().await, 1);

        assert_eq!(store.purge_expired().await?, 1);
        assert_eq!(store.stored().await, 1);

        store.delete(b"live").await?;
        assert!(store.is_empty().await);
        Ok(())
    }
}
