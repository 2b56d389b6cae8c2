//! Ticket login handlers and supporting modules.
//!
//! `/api/auth` exposes one handler per verb:
//!
//! - `GET` issues a nonce and stores it in the session ([`nonce`]).
//! - `POST` accepts a proof watermarked with that nonce ([`login`]).
//! - `DELETE` clears the session ([`session::logout`]).
//!
//! ## Proof Checks
//!
//! A submitted proof must be cryptographically valid, signed by a trusted
//! ticket issuer, watermarked with the session's pending nonce, carry a
//! nullifier, and belong to an allowed event. Any rejection burns the nonce.
//!
//! ## Users
//!
//! The nullifier hash identifies the ticket. Logins with a known nullifier
//! reuse the same user; a new ticket revealing a known email is merged into
//! that user instead of creating another one.

mod claim;
mod error;
pub(crate) mod login;
mod memory;
pub(crate) mod nonce;
mod proof;
mod resolver;
pub(crate) mod session;
mod state;
mod storage;
pub(crate) mod types;
mod utils;

pub use claim::{ClaimPolicy, EventScope, Rejection, ValidatedClaim};
pub use error::AuthError;
pub use memory::{MemorySessionStore, MemoryUserStore};
pub use proof::{
    Claim, HttpProofVerifier, MalformedProof, PartialTicket, ProofVerifier, SerializedProof,
    SignerKey, TICKET_PCD_TYPE, TicketProof, parse_serialized_proof,
};
pub use resolver::{IdentityResolver, NewUser, StoreError, TicketIdentity, User, UserStore};
pub use session::{SESSION_COOKIE_NAME, SessionManager, SessionState, SessionStore, spawn_sweeper};
pub use state::{AuthConfig, AuthState, RenoncePolicy};
pub use storage::{PgSessionStore, PgUserStore};
pub use types::SessionIdentity;
pub use utils::hash_session_token;

#[cfg(test)]
mod tests;
