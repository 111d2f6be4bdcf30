//! Session claims carried inside a token.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Who a session belongs to. Supplied by the login collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub principal_id: Uuid,
    pub username: String,
    pub authority_id: u64,
}

/// Decoded session payload.
///
/// Claims are immutable once signed: rotation builds a new value through
/// [`Claims::rotated`] and signs it into a new token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Claims {
    /// Unique token identifier.
    pub jti: String,
    pub iss: String,
    /// Principal identifier.
    pub sub: Uuid,
    pub username: String,
    /// Role identifier used as the policy subject.
    pub authority_id: u64,
    /// Seconds before `exp` at which the token gets rotated.
    pub buffer_time: i64,
    pub iat: i64,
    /// Absolute expiry, unix seconds.
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn new(
        identity: &Identity,
        issuer: &str,
        now: i64,
        lifetime_seconds: i64,
        buffer_seconds: i64,
    ) -> Self {
        Self {
            jti: Uuid::new_v4().to_string(),
            iss: issuer.to_string(),
            sub: identity.principal_id,
            username: identity.username.clone(),
            authority_id: identity.authority_id,
            buffer_time: buffer_seconds,
            iat: now,
            exp: now.saturating_add(lifetime_seconds),
        }
    }

    /// Same identity, fresh `jti`, new validity window starting at `now`.
    #[must_use]
    pub fn rotated(&self, now: i64, lifetime_seconds: i64) -> Self {
        Self {
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now.saturating_add(lifetime_seconds),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn remaining(&self, now: i64) -> i64 {
        self.exp.saturating_sub(now)
    }

    #[must_use]
    pub fn needs_rotation(&self, now: i64) -> bool {
        self.remaining(now) < self.buffer_time
    }

    /// Policy subject for this session.
    #[must_use]
    pub fn subject(&self) -> String {
        self.authority_id.to_string()
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity {
            principal_id: self.sub,
            username: self.username.clone(),
            authority_id: self.authority_id,
        }
    }
}
