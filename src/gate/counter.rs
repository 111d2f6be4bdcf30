//! Admission counters: time-windowed atomic counters keyed by client identity.
//!
//! Logical key layout: `rate:<client-key>` -> (count, ttl).

use std::time::Duration;

use crate::store::StoreFuture;

pub const RATE_PREFIX: &str = "rate:";

#[must_use]
pub fn rate_key(client: &str) -> String {
    format!("{RATE_PREFIX}{client}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterHit {
    /// The request was counted; `count` is the value after this hit.
    Admitted { count: u64 },
    /// The window is full; the counter resets after `retry_after`.
    Exhausted { retry_after: Duration },
}

pub trait CounterStore: Send + Sync {
    /// Charge one hit against `key` as a single atomic operation:
    ///
    /// - no counter, or its window elapsed: create it with count = 1 and a
    ///   time-to-live of `window`, admit;
    /// - count already `>= limit`: leave it untouched, report its remaining ttl;
    /// - otherwise: increment, admit.
    ///
    /// Concurrent callers sharing a key must never reinitialize a live
    /// counter or admit more than `limit` hits per window.
    fn hit<'a>(&'a self, key: &'a str, window: Duration, limit: u64) -> StoreFuture<'a, CounterHit>;
}
