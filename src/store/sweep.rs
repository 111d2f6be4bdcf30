use rand::{Rng, SeedableRng, rngs::StdRng};
use std::{future::Future, pin::Pin, sync::Arc};
use tokio::{
    task::JoinHandle,
    time::{Duration, sleep},
};
use tracing::{debug, error, info};

use super::{MemoryStore, PgStore, StoreError};

/// A store that can drop its elapsed entries.
pub trait ExpirySweep: Send + Sync {
    fn sweep_expired(&self) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>>;
}

impl ExpirySweep for MemoryStore {
    fn sweep_expired(&self) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>> {
        Box::pin(async move { Ok::<_, StoreError>(self.sweep().await) })
    }
}

impl ExpirySweep for PgStore {
    fn sweep_expired(&self) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>> {
        Box::pin(self.sweep())
    }
}

/// Wait between 80% and 120% of `every` so instances sharing a store spread out.
fn jittered(every: Duration, rng: &mut StdRng) -> Duration {
    every.mul_f64(rng.gen_range(0.8..1.2))
}

/// Sweep `store` forever on a jittered interval.
///
/// Only entries whose own expiry has passed are removed; a failed sweep is
/// logged and retried on the next tick.
pub fn spawn_sweeper(store: Arc<dyn ExpirySweep>, every: Duration) -> JoinHandle<()> {
    let mut rng = StdRng::from_entropy();

    info!("Sweeping expired gate state every ~{} seconds", every.as_secs());

    tokio::spawn(async move {
        loop {
            sleep(jittered(every, &mut rng)).await;

            match store.sweep_expired().await {
                Ok(removed) => debug!(removed, "swept expired gate state"),
                Err(err) => error!("Error sweeping expired gate state: {err}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::SessionRegistry;
    use chrono::Utc;

    #[test]
    fn jitter_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let wait = jittered(Duration::from_secs(100), &mut rng);
            assert!(wait >= Duration::from_secs(80) && wait < Duration::from_secs(120));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_elapsed_entries() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now().timestamp();
        store.blacklist("dead", now - 1).await?;
        store.blacklist("live", now + 3600).await?;

        let handle = spawn_sweeper(store.clone(), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(13)).await;
        handle.abort();

        assert_eq!(store.sweep().await, 0);
        assert!(store.is_blacklisted("live").await?);
        Ok(())
    }
}
