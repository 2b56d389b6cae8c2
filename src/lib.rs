//! # Ticketauth (Zero-Knowledge Ticket Login)
//!
//! `ticketauth` logs users in with a zero-knowledge proof of an event ticket
//! (a `PCD`) and binds the proven ticket to a persistent user record.
//!
//! ## Challenge-Response
//!
//! 1. `GET /api/auth` issues a random decimal nonce and stores it in the
//!    caller's session.
//! 2. The client obtains a proof watermarked with that nonce from the ticket
//!    issuer and submits it with `POST /api/auth`.
//! 3. The proof is verified, its claim is checked against the trusted signers,
//!    the session nonce, the nullifier and the event allow-list, and the
//!    ticket identity is merged into the `users` table.
//! 4. `DELETE /api/auth` clears the session.
//!
//! ## Ticket Identity
//!
//! The proof's nullifier hash is the durable ticket key (`users.ticket_id`).
//! A user first known only by email is merged with the ticket that reveals
//! the same email instead of being duplicated.

pub mod api;
pub mod cli;
pub mod vault;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
