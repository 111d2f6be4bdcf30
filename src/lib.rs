//! # Gatehouse (access-control gateway)
//!
//! `gatehouse` decides, on every inbound request, whether it may proceed. Three
//! gates run in front of the protected handlers:
//!
//! 1. **Token lifecycle:** signed session tokens are verified against a shared
//!    blacklist, rotated when they get close to expiry, and (optionally) limited
//!    to one live session per principal ("multipoint" enforcement).
//! 2. **Admission limits:** time-windowed atomic counters keyed by client
//!    address bound the request rate.
//! 3. **Role policy:** `(authority, path, method)` triples are evaluated
//!    against a cached rule set; no matching rule means deny.
//!
//! ## Shared state
//!
//! The blacklist, the active-session records and the admission counters live in
//! an external store (`PostgreSQL`) so every gateway instance sees the same
//! decisions. Atomic "check then act" sequences are pushed into single store
//! operations; no application-level locks are taken across requests.
//!
//! ## Failure posture
//!
//! - A counter store that is down or slow **admits** the request (degrade-open).
//! - A blacklist lookup that fails or times out **rejects** the request
//!   (degrade-closed).

pub mod api;
pub mod cli;
pub mod gate;
pub mod store;
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
