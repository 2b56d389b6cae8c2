//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NonceResponse {
    pub nonce: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct LoginRequest {
    /// Serialized ticket proof, as produced by the ticket issuer.
    #[serde(default)]
    pub pcd: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub user: SessionIdentity,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user: SessionIdentity,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LogoutResponse {
    pub success: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

/// Identity attached to an authenticated session.
///
/// Serialized flat: the revealed ticket fields plus the resolved user `id`.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionIdentity {
    pub id: Uuid,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub ticket: Map<String, Value>,
}

impl SessionIdentity {
    /// Build from the revealed ticket fields; a revealed `id` never shadows the user id.
    #[must_use]
    pub fn new(id: Uuid, revealed: &Value) -> Self {
        let mut ticket = match revealed {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        ticket.remove("id");
        Self { id, ticket }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use serde_json::json;

    #[test]
    fn session_identity_serializes_flat() -> Result<()> {
        let id = Uuid::new_v4();
        let identity = SessionIdentity::new(
            id,
            &json!({ "attendeeEmail": "a@x.com", "eventId": "evt1" }),
        );
        let value = serde_json::to_value(&identity)?;
        assert_eq!(value["attendeeEmail"], "a@x.com");
        assert_eq!(value["eventId"], "evt1");
        let serialized_id = value
            .get("id")
            .and_then(Value::as_str)
            .context("missing id")?;
        assert_eq!(serialized_id, id.to_string());

        let decoded: SessionIdentity = serde_json::from_value(value)?;
        assert_eq!(decoded, identity);
        Ok(())
    }

    #[test]
    fn session_identity_ignores_revealed_id() -> Result<()> {
        let id = Uuid::new_v4();
        let identity = SessionIdentity::new(id, &json!({ "id": "spoofed", "eventId": "e" }));
        assert!(!identity.ticket.contains_key("id"));
        let value = serde_json::to_value(&identity)?;
        assert_eq!(value["id"], id.to_string());
        Ok(())
    }

    #[test]
    fn login_request_tolerates_missing_pcd() -> Result<()> {
        let request: LoginRequest = serde_json::from_value(json!({}))?;
        assert!(request.pcd.is_none());
        Ok(())
    }
}
