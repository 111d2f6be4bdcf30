//! In-process store.
//!
//! Every operation runs inside one critical section of a single mutex, which
//! gives the same atomicity the shared store gets from single SQL statements.
//! State is lost on restart and not shared between instances.

use chrono::Utc;
use std::{collections::HashMap, time::Duration};
use tokio::{sync::Mutex, time::Instant};

use super::{StoreError, StoreFuture};
use crate::gate::{
    counter::{CounterHit, CounterStore},
    registry::{ActiveSession, SessionRegistry, active_session_key, blacklist_key},
};

#[derive(Debug)]
struct Counter {
    count: u64,
    resets_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    blacklist: HashMap<String, i64>,
    sessions: HashMap<String, ActiveSession>,
    counters: HashMap<String, Counter>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop blacklist entries, sessions and counters whose expiry has passed.
    /// Returns how many entries were removed.
    pub async fn sweep(&self) -> u64 {
        let now_unix = Utc::now().timestamp();
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let before = state.blacklist.len() + state.sessions.len() + state.counters.len();
        state.blacklist.retain(|_, expires_at| *expires_at > now_unix);
        state
            .sessions
            .retain(|_, session| session.expires_at > now_unix);
        state.counters.retain(|_, counter| counter.resets_at > now);
        let after = state.blacklist.len() + state.sessions.len() + state.counters.len();

        u64::try_from(before - after).unwrap_or(0)
    }
}

impl MemoryStore {
    async fn lookup_blacklist(&self, token: &str) -> Result<bool, StoreError> {
        let now = Utc::now().timestamp();
        let state = self.state.lock().await;
        Ok(state
            .blacklist
            .get(&blacklist_key(token))
            .is_some_and(|expires_at| *expires_at > now))
    }

    async fn insert_blacklist(&self, token: &str, expires_at: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let entry = state
            .blacklist
            .entry(blacklist_key(token))
            .or_insert(expires_at);
        *entry = (*entry).max(expires_at);
        Ok(())
    }

    async fn lookup_session(&self, username: &str) -> Result<Option<ActiveSession>, StoreError> {
        let now = Utc::now().timestamp();
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .get(&active_session_key(username))
            .filter(|session| session.expires_at > now)
            .cloned())
    }

    async fn store_session(&self, username: &str, session: &ActiveSession) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .sessions
            .insert(active_session_key(username), session.clone());
        Ok(())
    }

    async fn charge(&self, key: &str, window: Duration, limit: u64) -> Result<CounterHit, StoreError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if let Some(counter) = state.counters.get_mut(key) {
            if counter.resets_at > now {
                if counter.count >= limit {
                    return Ok(CounterHit::Exhausted {
                        retry_after: counter.resets_at - now,
                    });
                }
                counter.count += 1;
                return Ok(CounterHit::Admitted {
                    count: counter.count,
                });
            }
        }

        state.counters.insert(
            key.to_string(),
            Counter {
                count: 1,
                resets_at: now + window,
            },
        );
        Ok(CounterHit::Admitted { count: 1 })
    }
}

impl SessionRegistry for MemoryStore {
    fn is_blacklisted<'a>(&'a self, token: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(self.lookup_blacklist(token))
    }

    fn blacklist<'a>(&'a self, token: &'a str, expires_at: i64) -> StoreFuture<'a, ()> {
        Box::pin(self.insert_blacklist(token, expires_at))
    }

    fn active_session<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<ActiveSession>> {
        Box::pin(self.lookup_session(username))
    }

    fn set_active_session<'a>(
        &'a self,
        username: &'a str,
        session: &'a ActiveSession,
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.store_session(username, session))
    }
}

impl CounterStore for MemoryStore {
    fn hit<'a>(&'a self, key: &'a str, window: Duration, limit: u64) -> StoreFuture<'a, CounterHit> {
        Box::pin(self.charge(key, window, limit))
    }
}
