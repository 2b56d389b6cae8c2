//! Nonce issuance for `GET /api/auth`.

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Json, Response},
};
use rand::{RngCore, rngs::OsRng};
use std::sync::Arc;
use tracing::debug;

use super::{
    error::AuthError,
    state::{AuthState, RenoncePolicy},
    types::{ErrorResponse, NonceResponse},
};

const NONCE_BYTES: usize = 30;
const LIMB_BASE: u64 = 1_000_000_000;

/// Draw a fresh nonce from the OS RNG, rendered as a base-10 integer.
pub(crate) fn generate_nonce() -> Result<String> {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate nonce")?;
    Ok(decimal_from_be_bytes(&bytes))
}

/// Decimal rendering of a big-endian unsigned integer of any width.
fn decimal_from_be_bytes(bytes: &[u8]) -> String {
    // Little-endian limbs of nine decimal digits each.
    let mut limbs: Vec<u64> = Vec::new();
    for byte in bytes {
        let mut carry = u64::from(*byte);
        for limb in &mut limbs {
            let value = *limb * 256 + carry;
            *limb = value % LIMB_BASE;
            carry = value / LIMB_BASE;
        }
        while carry > 0 {
            limbs.push(carry % LIMB_BASE);
            carry /= LIMB_BASE;
        }
    }

    let mut iter = limbs.iter().rev();
    let Some(most_significant) = iter.next() else {
        return "0".to_string();
    };
    let mut out = most_significant.to_string();
    for limb in iter {
        out.push_str(&format!("{limb:09}"));
    }
    out
}

#[utoipa::path(
    get,
    path = "/api/auth",
    responses(
        (status = 200, description = "Nonce issued and stored in the session", body = NonceResponse),
        (status = 409, description = "Session is already authenticated", body = ErrorResponse),
        (status = 500, description = "Nonce or session could not be created", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn nonce(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    match issue(&headers, &auth_state).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn issue(headers: &HeaderMap, auth_state: &AuthState) -> Result<Response, AuthError> {
    let sessions = auth_state.sessions();
    let mut session = sessions.open(headers).await.map_err(AuthError::Session)?;

    if session.state().user.is_some() {
        match auth_state.config().renonce_policy() {
            RenoncePolicy::Reject => return Err(AuthError::AlreadyAuthenticated),
            RenoncePolicy::Allow => debug!("Dropping session identity for a new nonce"),
        }
    }

    let nonce = generate_nonce().map_err(AuthError::Randomness)?;
    sessions
        .issue_nonce(&mut session, nonce.clone())
        .await
        .map_err(AuthError::Session)?;

    let cookie = sessions
        .session_cookie(&session)
        .map_err(|err| AuthError::Session(err.into()))?;
    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);

    Ok((StatusCode::OK, response_headers, Json(NonceResponse { nonce })).into_response())
}
