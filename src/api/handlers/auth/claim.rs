//! Domain checks applied to a ticket claim before it can log anyone in.

use axum::http::StatusCode;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

use super::{
    proof::{ProofVerifier, SignerKey, TicketProof},
    resolver::TicketIdentity,
    utils::normalize_email,
};

/// Which event field failed the allow-list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventScope {
    /// The revealed `eventId`.
    Revealed,
    /// The `validEventIds` restriction.
    Restricted,
}

impl std::fmt::Display for EventScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Revealed => "PCD ticket is not for a supported event",
            Self::Restricted => "PCD ticket is not restricted to supported events",
        })
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("ZK ticket PCD is not valid")]
    InvalidProof,
    #[error("PCD is not signed by Zupass")]
    UntrustedSigner,
    #[error("PCD watermark doesn't match")]
    NonceMismatch,
    #[error("PCD ticket nullifer has not been defined")]
    MissingNullifier,
    #[error("{0}")]
    UnsupportedEvent(EventScope),
}

impl Rejection {
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::UnsupportedEvent(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("proof verification failed: {0:#}")]
    Verifier(anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct ClaimPolicy {
    trusted_signers: Vec<SignerKey>,
    allowed_event_ids: HashSet<String>,
}

impl ClaimPolicy {
    #[must_use]
    pub fn new(trusted_signers: Vec<SignerKey>, allowed_event_ids: HashSet<String>) -> Self {
        Self {
            trusted_signers,
            allowed_event_ids,
        }
    }

    #[must_use]
    pub fn trusted_signers(&self) -> &[SignerKey] {
        &self.trusted_signers
    }

    #[must_use]
    pub fn allowed_event_ids(&self) -> &HashSet<String> {
        &self.allowed_event_ids
    }

    fn is_trusted(&self, signer: &SignerKey) -> bool {
        self.trusted_signers.iter().any(|key| key.matches(signer))
    }

    fn is_allowed(&self, event_id: &str) -> bool {
        self.allowed_event_ids.contains(event_id)
    }

    /// Run every check in order, stopping at the first failure.
    ///
    /// A missing `expected_nonce` never matches a watermark.
    ///
    /// # Errors
    /// Returns the first [`Rejection`], or [`ClaimError::Verifier`] when the
    /// verifier could not be reached.
    pub async fn validate(
        &self,
        verifier: &dyn ProofVerifier,
        proof: &TicketProof,
        expected_nonce: Option<&str>,
    ) -> Result<ValidatedClaim, ClaimError> {
        if !verifier.verify(proof).await.map_err(ClaimError::Verifier)? {
            return Err(Rejection::InvalidProof.into());
        }

        let claim = &proof.claim;
        if !self.is_trusted(&claim.signer) {
            debug!("Untrusted signer: {}", claim.signer);
            return Err(Rejection::UntrustedSigner.into());
        }

        if expected_nonce != Some(claim.watermark.as_str()) {
            return Err(Rejection::NonceMismatch.into());
        }

        let Some(nullifier) = claim.nullifier_hash.as_deref().filter(|n| !n.is_empty()) else {
            return Err(Rejection::MissingNullifier.into());
        };

        if let Some(event_id) = claim.partial_ticket.event_id.as_deref() {
            if !self.is_allowed(event_id) {
                return Err(Rejection::UnsupportedEvent(EventScope::Revealed).into());
            }
        } else if let Some(valid_event_ids) = &claim.valid_event_ids {
            if !valid_event_ids.iter().all(|id| self.is_allowed(id)) {
                return Err(Rejection::UnsupportedEvent(EventScope::Restricted).into());
            }
        }

        Ok(ValidatedClaim {
            ticket_id: nullifier.to_string(),
            email: claim
                .partial_ticket
                .attendee_email
                .as_deref()
                .and_then(normalize_email),
            event_id: claim.partial_ticket.event_id.clone(),
            revealed: claim.partial_ticket.to_value(),
        })
    }
}

/// A claim that passed every check.
#[derive(Clone, Debug)]
pub struct ValidatedClaim {
    ticket_id: String,
    email: Option<String>,
    event_id: Option<String>,
    revealed: Value,
}

impl ValidatedClaim {
    #[must_use]
    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    #[must_use]
    pub fn revealed(&self) -> &Value {
        &self.revealed
    }

    #[must_use]
    pub fn identity(&self) -> TicketIdentity {
        TicketIdentity {
            ticket_id: self.ticket_id.clone(),
            email: self.email.clone(),
            event_id: self.event_id.clone(),
            metadata: self.revealed.clone(),
        }
    }
}
