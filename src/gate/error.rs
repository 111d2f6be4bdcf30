use std::time::Duration;
use thiserror::Error;

/// Token verification failures.
///
/// `Expired` is kept apart from the rest so callers can pick a different
/// message and never try to rotate a token that is merely malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed token: {0}")]
    Malformed(&'static str),
    #[error("token expired")]
    Expired,
    #[error("invalid signature")]
    SignatureInvalid,
    #[error("invalid issuer")]
    InvalidIssuer,
}

/// Signing misconfiguration. Fatal at startup, never per request.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signing key is {len} bytes, at least {min} required")]
    KeyTooShort { len: usize, min: usize },
    #[error("failed to encode token: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why the token gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("not logged in")]
    NoToken,
    #[error("session invalidated elsewhere")]
    Blacklisted,
    #[error("authorization expired")]
    Expired,
    #[error("{0}")]
    Invalid(String),
    /// The blacklist could not be consulted; fails closed.
    #[error("session state unavailable")]
    RegistryUnavailable,
}

impl AuthFailure {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoToken => "not_logged_in",
            Self::Blacklisted => "session_invalidated",
            Self::Expired => "token_expired",
            Self::Invalid(_) => "token_invalid",
            Self::RegistryUnavailable => "session_unavailable",
        }
    }
}

impl From<CodecError> for AuthFailure {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Expired => Self::Expired,
            other => Self::Invalid(other.to_string()),
        }
    }
}

/// Gate outcome that short-circuits the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("{0}")]
    Unauthenticated(#[from] AuthFailure),
    #[error("insufficient permissions")]
    Unauthorized,
    #[error("too many requests, retry in {}s", retry_after_seconds(.retry_after.to_owned()))]
    RateLimited { retry_after: Duration },
}

/// Whole seconds, rounded up, never zero.
#[must_use]
pub fn retry_after_seconds(retry_after: Duration) -> u64 {
    let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    seconds.max(1)
}

impl Rejection {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(failure) => failure.code(),
            Self::Unauthorized => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
        }
    }

    /// Token rejections tell the client to drop its local session state.
    #[must_use]
    pub const fn requires_reload(&self) -> bool {
        matches!(self, Self::Unauthenticated(_))
    }
}
