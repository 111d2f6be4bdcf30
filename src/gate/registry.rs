//! Session registry: revoked tokens and the live session per principal.
//!
//! Logical key layout shared by every backend:
//! - `blacklist:<token>` -> expiry (unix seconds)
//! - `active-session:<username>` -> token (+ its expiry)

use crate::store::StoreFuture;

pub const BLACKLIST_PREFIX: &str = "blacklist:";
pub const ACTIVE_SESSION_PREFIX: &str = "active-session:";

#[must_use]
pub fn blacklist_key(token: &str) -> String {
    format!("{BLACKLIST_PREFIX}{token}")
}

#[must_use]
pub fn active_session_key(username: &str) -> String {
    format!("{ACTIVE_SESSION_PREFIX}{username}")
}

/// The token currently considered live for a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub token: String,
    /// Token expiry, unix seconds. The record is gone once this passes.
    pub expires_at: i64,
}

pub trait SessionRegistry: Send + Sync {
    /// Whether `token` has an unexpired blacklist entry.
    fn is_blacklisted<'a>(&'a self, token: &'a str) -> StoreFuture<'a, bool>;

    /// Record `token` as revoked until `expires_at`.
    ///
    /// An existing entry is never shortened: the stored expiry becomes the
    /// later of the two.
    fn blacklist<'a>(&'a self, token: &'a str, expires_at: i64) -> StoreFuture<'a, ()>;

    /// The live session recorded for `username`, if any and not yet expired.
    fn active_session<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<ActiveSession>>;

    /// Overwrite the live session recorded for `username`.
    fn set_active_session<'a>(
        &'a self,
        username: &'a str,
        session: &'a ActiveSession,
    ) -> StoreFuture<'a, ()>;
}
