//! Maps a proven ticket onto a persistent user record.
//!
//! Lookup order:
//!
//! 1. by `ticket_id` (the nullifier hash): refresh `last_login` and `metadata`;
//! 2. by email, when revealed: bind the ticket to the existing record;
//! 3. otherwise insert a new record.
//!
//! The store carries unique constraints on `ticket_id` and `email`. When a
//! concurrent request wins the race, the lookup chain is re-run once.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub ticket_id: Option<String>,
    pub email: Option<String>,
    pub event_id: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub metadata: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewUser {
    pub ticket_id: Option<String>,
    pub email: Option<String>,
    pub event_id: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub metadata: Value,
}

/// Identity facts a validated claim contributes to a user record.
#[derive(Clone, Debug, PartialEq)]
pub struct TicketIdentity {
    pub ticket_id: String,
    /// Trimmed and lowercased.
    pub email: Option<String>,
    pub event_id: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated")]
    Conflict,
    #[error("user {0} not found")]
    Missing(Uuid),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_ticket_id(&self, ticket_id: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Refresh `last_login` and `metadata` of an existing record.
    async fn record_login(
        &self,
        id: Uuid,
        last_login: DateTime<Utc>,
        metadata: &Value,
    ) -> Result<User, StoreError>;

    /// Attach a ticket to a record first known by email.
    async fn bind_ticket(
        &self,
        id: Uuid,
        identity: &TicketIdentity,
        last_login: DateTime<Utc>,
    ) -> Result<User, StoreError>;

    async fn insert(&self, user: &NewUser) -> Result<User, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn UserStore>,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    /// Find or create the user for a ticket and record the login.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the store fails, or keeps conflicting after
    /// one re-read.
    pub async fn resolve(&self, identity: &TicketIdentity) -> Result<User, StoreError> {
        match self.resolve_once(identity).await {
            Err(StoreError::Conflict) => {
                warn!("Concurrent update for ticket identity, retrying lookup");
                self.resolve_once(identity).await
            }
            result => result,
        }
    }

    async fn resolve_once(&self, identity: &TicketIdentity) -> Result<User, StoreError> {
        let now = Utc::now();

        if let Some(user) = self.store.find_by_ticket_id(&identity.ticket_id).await? {
            debug!("Known ticket for user {}", user.id);
            return self
                .store
                .record_login(user.id, next_login(user.last_login, now), &identity.metadata)
                .await;
        }

        if let Some(email) = identity.email.as_deref() {
            if let Some(user) = self.store.find_by_email(email).await? {
                debug!("Binding ticket to existing user {}", user.id);
                return self
                    .store
                    .bind_ticket(user.id, identity, next_login(user.last_login, now))
                    .await;
            }
        }

        debug!("Creating user for new ticket");
        self.store
            .insert(&NewUser {
                ticket_id: Some(identity.ticket_id.clone()),
                email: identity.email.clone(),
                event_id: identity.event_id.clone(),
                last_login: Some(next_login(None, now)),
                metadata: identity.metadata.clone(),
            })
            .await
    }
}

/// Login timestamp at microsecond precision, strictly after `previous`.
#[must_use]
pub fn next_login(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now);
    match previous {
        Some(previous) if previous >= now => previous + TimeDelta::microseconds(1),
        _ => now,
    }
}
