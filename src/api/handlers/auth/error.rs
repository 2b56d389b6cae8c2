//! Error type shared by the auth handlers.
//!
//! Every failure becomes `{"error": "<message>"}`. Server-side failures get a
//! fixed message; their details only reach the logs.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, info};

use super::{
    claim::{ClaimError, Rejection},
    proof::MalformedProof,
    resolver::StoreError,
    types::ErrorResponse,
};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No PCD specified")]
    MissingProof,
    #[error("PCD could not be parsed")]
    MalformedProof(#[source] MalformedProof),
    #[error(transparent)]
    Rejected(Rejection),
    #[error("Session is already authenticated; log out first")]
    AlreadyAuthenticated,
    #[error("randomness failure: {0:#}")]
    Randomness(anyhow::Error),
    #[error("user store failure: {0}")]
    Store(#[source] StoreError),
    #[error("proof verifier failure: {0:#}")]
    Verifier(anyhow::Error),
    #[error("session failure: {0:#}")]
    Session(anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingProof | Self::MalformedProof(_) => StatusCode::BAD_REQUEST,
            Self::Rejected(rejection) => rejection.status(),
            Self::AlreadyAuthenticated => StatusCode::CONFLICT,
            Self::Randomness(_) | Self::Store(_) | Self::Verifier(_) | Self::Session(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Randomness(_) => "Failed to generate nonce".to_string(),
            Self::Store(_) => "Failed to load user".to_string(),
            Self::Verifier(_) => "Failed to verify PCD".to_string(),
            Self::Session(_) => "Failed to update session".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<ClaimError> for AuthError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::Rejected(rejection) => Self::Rejected(rejection),
            ClaimError::Verifier(err) => Self::Verifier(err),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<MalformedProof> for AuthError {
    fn from(err: MalformedProof) -> Self {
        Self::MalformedProof(err)
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{self}");
        } else if let Self::MalformedProof(err) = &self {
            info!("Rejected login: {err}");
        } else {
            info!("Rejected auth request: {self}");
        }

        let body = ErrorResponse {
            error: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::claim::EventScope;
    use anyhow::{Result, anyhow};
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body(err: AuthError) -> Result<(StatusCode, Value)> {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, serde_json::from_slice(&bytes)?))
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() -> Result<()> {
        let (status, json) = body(AuthError::MissingProof).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No PCD specified");

        let (status, json) = body(AuthError::Rejected(Rejection::NonceMismatch)).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "PCD watermark doesn't match");

        let (status, _) = body(AuthError::Rejected(Rejection::UnsupportedEvent(
            EventScope::Revealed,
        )))
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = body(AuthError::AlreadyAuthenticated).await?;
        assert_eq!(status, StatusCode::CONFLICT);
        Ok(())
    }

    #[tokio::test]
    async fn server_errors_hide_details() -> Result<()> {
        let (status, json) = body(AuthError::Store(StoreError::Backend(anyhow!(
            "password authentication failed for user ticketauth"
        ))))
        .await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Failed to load user");

        let (status, json) = body(AuthError::Verifier(anyhow!("connection refused"))).await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Failed to verify PCD");
        Ok(())
    }

    #[test]
    fn claim_errors_convert() {
        let err: AuthError = ClaimError::Rejected(Rejection::InvalidProof).into();
        assert!(matches!(err, AuthError::Rejected(Rejection::InvalidProof)));
        let err: AuthError = ClaimError::Verifier(anyhow!("down")).into();
        assert!(matches!(err, AuthError::Verifier(_)));
    }
}
