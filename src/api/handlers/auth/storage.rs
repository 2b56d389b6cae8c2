//! Postgres-backed user and session stores.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::{
    resolver::{NewUser, StoreError, TicketIdentity, User, UserStore},
    session::{SessionState, SessionStore},
    types::SessionIdentity,
    utils::is_unique_violation,
};

const USER_COLUMNS: &str = "id, ticket_id, email, event_id, last_login, metadata::text AS metadata";

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(
        &self,
        query: &str,
        value: &str,
        context: &'static str,
    ) -> Result<Option<User>, StoreError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| store_error(err, context))?;
        row.as_ref().map(user_from_row).transpose()
    }
}

fn store_error(err: sqlx::Error, context: &'static str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict
    } else {
        StoreError::Backend(anyhow::Error::new(err).context(context))
    }
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let metadata: Option<String> = row.try_get("metadata").context("failed to read metadata")?;
    let metadata: Value = match metadata {
        Some(text) => serde_json::from_str(&text).context("failed to decode user metadata")?,
        None => Value::Object(serde_json::Map::new()),
    };
    Ok(User {
        id: row.try_get("id").context("failed to read user id")?,
        ticket_id: row.try_get("ticket_id").context("failed to read ticket_id")?,
        email: row.try_get("email").context("failed to read email")?,
        event_id: row.try_get("event_id").context("failed to read event_id")?,
        last_login: row
            .try_get::<Option<DateTime<Utc>>, _>("last_login")
            .context("failed to read last_login")?,
        metadata,
    })
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_ticket_id(&self, ticket_id: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE ticket_id = $1");
        self.fetch_optional(&query, ticket_id, "failed to lookup user by ticket")
            .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");
        self.fetch_optional(&query, email, "failed to lookup user by email")
            .await
    }

    async fn record_login(
        &self,
        id: Uuid,
        last_login: DateTime<Utc>,
        metadata: &Value,
    ) -> Result<User, StoreError> {
        let query = format!(
            r"
            UPDATE users
            SET last_login = $2, metadata = $3::jsonb, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(last_login)
            .bind(metadata.to_string())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| store_error(err, "failed to record login"))?;
        row.as_ref()
            .map_or(Err(StoreError::Missing(id)), user_from_row)
    }

    async fn bind_ticket(
        &self,
        id: Uuid,
        identity: &TicketIdentity,
        last_login: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let query = format!(
            r"
            UPDATE users
            SET ticket_id = $2, event_id = $3, last_login = $4, metadata = $5::jsonb,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(identity.ticket_id.as_str())
            .bind(identity.event_id.as_deref())
            .bind(last_login)
            .bind(identity.metadata.to_string())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| store_error(err, "failed to bind ticket to user"))?;
        row.as_ref()
            .map_or(Err(StoreError::Missing(id)), user_from_row)
    }

    async fn insert(&self, user: &NewUser) -> Result<User, StoreError> {
        let query = format!(
            r"
            INSERT INTO users
                (ticket_id, email, event_id, last_login, metadata)
            VALUES ($1, $2, $3, $4, $5::jsonb)
            RETURNING {USER_COLUMNS}
            "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(user.ticket_id.as_deref())
            .bind(user.email.as_deref())
            .bind(user.event_id.as_deref())
            .bind(user.last_login)
            .bind(user.metadata.to_string())
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| store_error(err, "failed to insert user"))?;
        user_from_row(&row)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let query = "SELECT 1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| store_error(err, "failed to ping database"))?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, token_hash: &[u8]) -> Result<Option<SessionState>> {
        let query = r"
            SELECT nonce, identity::text AS identity
            FROM auth_sessions
            WHERE token_hash = $1 AND expires_at > NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load session")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let nonce: Option<String> = row.try_get("nonce")?;
        let identity: Option<String> = row.try_get("identity")?;
        let user = identity
            .map(|text| serde_json::from_str::<SessionIdentity>(&text))
            .transpose()
            .context("failed to decode session identity")?;
        Ok(Some(SessionState { nonce, user }))
    }

    async fn save(&self, token_hash: &[u8], state: &SessionState, ttl_seconds: i64) -> Result<()> {
        let identity = state
            .user
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to encode session identity")?;

        let query = r"
            INSERT INTO auth_sessions
                (token_hash, nonce, identity, expires_at)
            VALUES ($1, $2, $3::jsonb, NOW() + ($4 * INTERVAL '1 second'))
            ON CONFLICT (token_hash) DO UPDATE
            SET nonce = EXCLUDED.nonce,
                identity = EXCLUDED.identity,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .bind(state.nonce.as_deref())
            .bind(identity)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save session")?;
        Ok(())
    }

    async fn delete(&self, token_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM auth_sessions WHERE token_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let query = "DELETE FROM auth_sessions WHERE expires_at <= NOW()";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired sessions")?;
        Ok(result.rows_affected())
    }
}
