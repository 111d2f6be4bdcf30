//! Shared-state backends for the session registry and admission counters.
//!
//! - [`postgres::PgStore`]: the distributed store, shared by every instance.
//! - [`memory::MemoryStore`]: single-process store for one-node deployments and tests.
//!
//! Both implement [`crate::gate::SessionRegistry`] and [`crate::gate::CounterStore`],
//! and both can be swept of elapsed entries by [`sweep::spawn_sweeper`].

pub mod memory;
pub mod postgres;
pub mod sweep;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::{future::Future, pin::Pin, time::Duration};
use thiserror::Error;

/// Backend failure. Logged by the gates and mapped to their degrade policy,
/// never shown to callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Run a store call with an upper bound on its latency.
///
/// # Errors
/// Returns `StoreError::Timeout` if `call` does not finish within `limit`,
/// otherwise whatever `call` returns.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}
