//! Ticket proof envelope, claim model, and the verifier boundary.
//!
//! Proofs arrive as a serialized envelope:
//!
//! ```json
//! {"type": "zk-eddsa-event-ticket-pcd", "pcd": "{\"id\": ..., \"claim\": ..., \"proof\": ...}"}
//! ```
//!
//! Parsing the envelope is local. Checking the proof itself is delegated to a
//! [`ProofVerifier`]; the production one calls an external verifier service.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, debug, info_span};

use crate::APP_USER_AGENT;

pub const TICKET_PCD_TYPE: &str = "zk-eddsa-event-ticket-pcd";

#[derive(Debug, Error)]
pub enum MalformedProof {
    #[error("invalid proof envelope: {0}")]
    Envelope(serde_json::Error),
    #[error("unsupported proof type: {0}")]
    UnsupportedType(String),
    #[error("invalid proof payload: {0}")]
    Payload(serde_json::Error),
}

#[derive(Deserialize, Serialize, Debug)]
pub struct SerializedProof {
    #[serde(rename = "type")]
    pub kind: String,
    pub pcd: String,
}

/// EdDSA public key of a ticket signer, as two hex coordinates.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SignerKey(pub [String; 2]);

impl SignerKey {
    #[must_use]
    pub fn new(x: &str, y: &str) -> Self {
        Self([x.to_string(), y.to_string()])
    }

    /// Hex coordinates compare without regard to case.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.0[0].eq_ignore_ascii_case(&other.0[0]) && self.0[1].eq_ignore_ascii_case(&other.0[1])
    }
}

impl std::fmt::Display for SignerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.0[0], self.0[1])
    }
}

/// Ticket fields the holder chose to reveal.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartialTicket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendee_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendee_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub attendee_semaphore_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_consumed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_revoked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_category: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_consumed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_signed: Option<u64>,
    /// Fields this service does not know about, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PartialTicket {
    /// JSON object of the revealed fields.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub signer: SignerKey,
    #[serde(deserialize_with = "string_or_number")]
    pub watermark: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub nullifier_hash: Option<String>,
    #[serde(default)]
    pub valid_event_ids: Option<Vec<String>>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub external_nullifier: Option<String>,
    #[serde(default)]
    pub partial_ticket: PartialTicket,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct TicketProof {
    pub id: String,
    pub claim: Claim,
    pub proof: Value,
    /// The envelope as received, forwarded to remote verifiers.
    #[serde(skip)]
    pub raw: String,
}

/// Parse a serialized ticket proof envelope.
///
/// # Errors
/// Returns [`MalformedProof`] for invalid JSON, a foreign proof type, or a claim
/// missing its signer or watermark.
pub fn parse_serialized_proof(raw: &str) -> Result<TicketProof, MalformedProof> {
    let envelope: SerializedProof = serde_json::from_str(raw).map_err(MalformedProof::Envelope)?;
    if envelope.kind != TICKET_PCD_TYPE {
        return Err(MalformedProof::UnsupportedType(envelope.kind));
    }
    let mut proof: TicketProof =
        serde_json::from_str(&envelope.pcd).map_err(MalformedProof::Payload)?;
    proof.raw = raw.to_string();
    Ok(proof)
}

#[async_trait]
pub trait ProofVerifier: Send + Sync {
    fn deserialize(&self, raw: &str) -> Result<TicketProof, MalformedProof> {
        parse_serialized_proof(raw)
    }

    /// Whether the proof is cryptographically valid.
    ///
    /// `Err` means the check could not be performed at all.
    async fn verify(&self, proof: &TicketProof) -> Result<bool>;
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    pcd: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    verified: bool,
}

/// Verifier backed by an HTTP service: `POST {"pcd": ...}` -> `{"verified": bool}`.
#[derive(Clone, Debug)]
pub struct HttpProofVerifier {
    client: Client,
    url: String,
}

impl HttpProofVerifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build verifier client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ProofVerifier for HttpProofVerifier {
    async fn verify(&self, proof: &TicketProof) -> Result<bool> {
        let span = info_span!("pcd.verify", pcd.id = %proof.id, http.url = %self.url);
        let response = self
            .client
            .post(&self.url)
            .json(&VerifyRequest { pcd: &proof.raw })
            .send()
            .instrument(span)
            .await
            .context("failed to reach proof verifier")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("proof verifier responded with {status}"));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .context("failed to decode proof verifier response")?;
        debug!("Proof {} verified: {}", proof.id, body.verified);
        Ok(body.verified)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(value) => Ok(Some(value)),
        Value::Number(value) => Ok(Some(value.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::TICKET_PCD_TYPE;
    use serde_json::{Value, json};

    /// Serialized envelope around the given claim.
    pub(crate) fn envelope(claim: &Value) -> String {
        let inner = json!({
            "id": "pcd-1",
            "claim": claim,
            "proof": { "pi_a": ["1", "2"] },
        });
        json!({ "type": TICKET_PCD_TYPE, "pcd": inner.to_string() }).to_string()
    }
}
