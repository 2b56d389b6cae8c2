//! `POST /api/auth`: complete a login with a watermarked ticket proof.
//!
//! Only a claim rejection (401, or 400 for an unsupported event) consumes the
//! pending nonce. A missing or malformed proof is refused before the session
//! is read, and verifier, store or session failures return 500; in both cases
//! the nonce stays usable.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info};

use super::{
    error::AuthError,
    state::AuthState,
    types::{ErrorResponse, LoginRequest, LoginResponse, SessionIdentity},
};

#[utoipa::path(
    post,
    path = "/api/auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Missing or malformed PCD, or unsupported event", body = ErrorResponse),
        (status = 401, description = "Proof, signer, watermark or nullifier rejected", body = ErrorResponse),
        (status = 500, description = "Verifier, store or session failure", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let raw = payload
        .and_then(|Json(request)| request.pcd)
        .filter(|pcd| !pcd.trim().is_empty());
    let Some(raw) = raw else {
        return AuthError::MissingProof.into_response();
    };

    match complete(&headers, &auth_state, &raw).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn complete(headers: &HeaderMap, auth_state: &AuthState, raw: &str) -> Result<Response, AuthError> {
    let proof = auth_state.verifier().deserialize(raw)?;

    let sessions = auth_state.sessions();
    let mut session = sessions.open(headers).await.map_err(AuthError::Session)?;

    let validated = match auth_state
        .config()
        .policy()
        .validate(
            auth_state.verifier().as_ref(),
            &proof,
            session.state().nonce.as_deref(),
        )
        .await
    {
        Ok(validated) => validated,
        Err(err) => {
            let err = AuthError::from(err);
            if matches!(err, AuthError::Rejected(_)) {
                // A failed attempt consumes the challenge.
                if let Err(session_err) = sessions.reject_attempt(&mut session).await {
                    error!("Failed to clear session nonce: {session_err:#}");
                }
            }
            return Err(err);
        }
    };

    let user = auth_state.resolver().resolve(&validated.identity()).await?;
    info!("Ticket login for user {}", user.id);

    let identity = SessionIdentity::new(user.id, validated.revealed());
    sessions
        .complete_login(&mut session, identity.clone())
        .await
        .map_err(AuthError::Session)?;

    let cookie = sessions
        .session_cookie(&session)
        .map_err(|err| AuthError::Session(err.into()))?;
    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);

    Ok((
        StatusCode::OK,
        response_headers,
        Json(LoginResponse { user: identity }),
    )
        .into_response())
}
