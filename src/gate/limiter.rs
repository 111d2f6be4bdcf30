//! Admission gate: charges each request against a time-windowed counter.
//!
//! Key generation, window and limit come from an [`AdmissionPolicy`]. The
//! default [`ClientAddressPolicy`] keys by client address (`rate:<ip>`) and
//! takes window and limit from [`GateConfig`].
//!
//! Counter backend failures degrade open: the request is admitted and the
//! failure logged.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

use super::{
    claims::Claims,
    config::GateConfig,
    counter::{CounterHit, CounterStore, rate_key},
    error::{Rejection, retry_after_seconds},
};
use crate::store::bounded;

/// What the admission gate sees of a request.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub client_addr: &'a str,
    /// Present once the token gate has run.
    pub claims: Option<&'a Claims>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("too many requests, retry in {}s", retry_after_seconds(.retry_after.to_owned()))]
pub struct Throttled {
    pub retry_after: Duration,
}

pub type AdmissionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Throttled>> + Send + 'a>>;

/// Builds the counter key for a request.
pub type KeyFn = fn(&AdmissionRequest<'_>) -> String;

pub trait AdmissionPolicy: Send + Sync {
    fn key(&self, request: &AdmissionRequest<'_>) -> String;

    fn window(&self) -> Duration;

    fn limit(&self) -> u64;

    /// Charge one hit against `key`; `Err` carries the cooldown.
    fn check_and_mark<'a>(&'a self, key: &'a str, window: Duration, limit: u64)
        -> AdmissionFuture<'a>;
}

/// Default key: the client address.
#[must_use]
pub fn client_address_key(request: &AdmissionRequest<'_>) -> String {
    rate_key(request.client_addr)
}

/// Keys authenticated callers by username, anonymous ones by address.
#[must_use]
pub fn principal_key(request: &AdmissionRequest<'_>) -> String {
    match request.claims {
        Some(claims) => rate_key(&format!("user:{}", claims.username)),
        None => client_address_key(request),
    }
}

/// Counter-backed policy. Without a store every request is admitted.
pub struct ClientAddressPolicy {
    store: Option<Arc<dyn CounterStore>>,
    window: Duration,
    limit: u64,
    timeout: Duration,
    key_fn: KeyFn,
}

impl std::fmt::Debug for ClientAddressPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAddressPolicy")
            .field("store", &self.store.is_some())
            .field("window", &self.window)
            .field("limit", &self.limit)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ClientAddressPolicy {
    #[must_use]
    pub fn new(store: Option<Arc<dyn CounterStore>>, config: &GateConfig) -> Self {
        Self {
            store,
            window: config.rate_limit_window(),
            limit: config.rate_limit_count(),
            timeout: config.store_timeout(),
            key_fn: client_address_key,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    async fn charge(&self, key: &str, window: Duration, limit: u64) -> Result<(), Throttled> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        match bounded(self.timeout, store.hit(key, window, limit)).await {
            Ok(CounterHit::Admitted { count }) => {
                debug!(key, count, limit, "admitted");
                Ok(())
            }
            Ok(CounterHit::Exhausted { retry_after }) => {
                debug!(key, limit, ?retry_after, "throttled");
                Err(Throttled { retry_after })
            }
            Err(err) => {
                warn!("Admission counter unavailable, admitting request: {err}");
                Ok(())
            }
        }
    }
}

impl AdmissionPolicy for ClientAddressPolicy {
    fn key(&self, request: &AdmissionRequest<'_>) -> String {
        (self.key_fn)(request)
    }

    fn window(&self) -> Duration {
        self.window
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn check_and_mark<'a>(
        &'a self,
        key: &'a str,
        window: Duration,
        limit: u64,
    ) -> AdmissionFuture<'a> {
        Box::pin(self.charge(key, window, limit))
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    policy: Arc<dyn AdmissionPolicy>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window", &self.policy.window())
            .field("limit", &self.policy.limit())
            .finish()
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(policy: Arc<dyn AdmissionPolicy>) -> Self {
        Self { policy }
    }

    /// Admit every request.
    #[must_use]
    pub fn disabled(config: &GateConfig) -> Self {
        Self::new(Arc::new(ClientAddressPolicy::new(None, config)))
    }

    /// Charge `request` against its counter.
    ///
    /// # Errors
    /// Returns `Rejection::RateLimited` once the caller's window is full.
    pub async fn admit(&self, request: &AdmissionRequest<'_>) -> Result<(), Rejection> {
        let key = self.policy.key(request);
        self.policy
            .check_and_mark(&key, self.policy.window(), self.policy.limit())
            .await
            .map_err(|throttled| Rejection::RateLimited {
                retry_after: throttled.retry_after,
            })
    }
}
