//! Request admission gates and the state they share.
//!
//! Flow Overview (per request):
//! 1) [`lifecycle::TokenLifecycle`] establishes the caller's identity from the
//!    session token, rotating it when close to expiry.
//! 2) [`limiter::RateLimiter`] charges the request against an admission counter.
//! 3) [`policy::PolicyEnforcer`] checks `(authority, path, method)` against the
//!    loaded rule set.
//!
//! Any gate rejection short-circuits the request with a [`error::Rejection`].

pub mod claims;
pub mod codec;
pub mod config;
pub mod counter;
pub mod error;
pub mod lifecycle;
pub mod limiter;
pub mod policy;
pub mod registry;

pub use claims::{Claims, Identity};
pub use codec::TokenCodec;
pub use config::GateConfig;
pub use counter::{CounterHit, CounterStore};
pub use error::{AuthFailure, CodecError, Rejection, SigningError};
pub use lifecycle::{Authenticated, IssuedSession, Rotation, TokenLifecycle};
pub use limiter::{
    AdmissionPolicy, AdmissionRequest, ClientAddressPolicy, RateLimiter, Throttled,
};
pub use policy::{Decision, Effect, PolicyEnforcer, PolicyError, PolicyRule, RuleSet};
pub use registry::{ActiveSession, SessionRegistry};
