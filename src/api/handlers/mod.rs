//! API handlers for ticketauth.

pub mod auth;
pub mod health;
pub mod root;
