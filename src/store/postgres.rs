//! Postgres-backed store shared by every gateway instance.
//!
//! Flow Overview:
//! 1) Each operation is a single SQL statement, so concurrent instances never
//!    interleave a read and a write on the same key.
//! 2) Expiry lives in `expires_at`; reads ignore elapsed rows and
//!    [`PgStore::sweep`] deletes them later.

use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{Instrument, instrument};

use super::{StoreError, StoreFuture};
use crate::gate::{
    counter::{CounterHit, CounterStore},
    registry::{ActiveSession, SessionRegistry, active_session_key, blacklist_key},
};

const SCHEMA: &str = include_str!("../../db/sql/gatehouse.sql");

fn db_span(operation: &'static str) -> tracing::Span {
    tracing::info_span!("db.query", db.system = "postgresql", db.operation = operation)
}

fn interval(window: Duration) -> String {
    format!("{} milliseconds", window.as_millis())
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the gate tables if missing.
    ///
    /// # Errors
    /// Returns an error if any schema statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|statement| !statement.is_empty())
        {
            sqlx::query(statement)
                .execute(&self.pool)
                .instrument(db_span("CREATE"))
                .await?;
        }
        Ok(())
    }

    /// Delete elapsed rows from every gate table. Returns the number removed.
    ///
    /// # Errors
    /// Returns an error if a delete fails.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<u64, StoreError> {
        let mut removed = 0;
        for query in [
            "DELETE FROM gate_blacklist WHERE expires_at <= NOW()",
            "DELETE FROM gate_active_sessions WHERE expires_at <= NOW()",
            "DELETE FROM gate_counters WHERE expires_at <= NOW()",
        ] {
            removed += sqlx::query(query)
                .execute(&self.pool)
                .instrument(db_span("DELETE"))
                .await?
                .rows_affected();
        }
        Ok(removed)
    }

    async fn lookup_blacklist(&self, token: &str) -> Result<bool, StoreError> {
        let query = "SELECT 1 FROM gate_blacklist WHERE key = $1 AND expires_at > NOW()";
        let row = sqlx::query(query)
            .bind(blacklist_key(token))
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT"))
            .await?;
        Ok(row.is_some())
    }

    async fn insert_blacklist(&self, token: &str, expires_at: i64) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO gate_blacklist (key, expires_at)
            VALUES ($1, to_timestamp($2))
            ON CONFLICT (key) DO UPDATE
            SET expires_at = GREATEST(gate_blacklist.expires_at, EXCLUDED.expires_at)
        ";
        sqlx::query(query)
            .bind(blacklist_key(token))
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT"))
            .await?;
        Ok(())
    }

    async fn lookup_session(&self, username: &str) -> Result<Option<ActiveSession>, StoreError> {
        let query = r"
            SELECT token, EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at
            FROM gate_active_sessions
            WHERE key = $1 AND expires_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(active_session_key(username))
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT"))
            .await?;

        Ok(row.map(|row| ActiveSession {
            token: row.get("token"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn store_session(&self, username: &str, session: &ActiveSession) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO gate_active_sessions (key, token, expires_at)
            VALUES ($1, $2, to_timestamp($3))
            ON CONFLICT (key) DO UPDATE
            SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at
        ";
        sqlx::query(query)
            .bind(active_session_key(username))
            .bind(&session.token)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(db_span("UPSERT"))
            .await?;
        Ok(())
    }

    async fn charge(&self, key: &str, window: Duration, limit: u64) -> Result<CounterHit, StoreError> {
        // Reset, refuse or increment in one statement; row locking on the
        // conflicting key serializes concurrent callers.
        let query = r"
            INSERT INTO gate_counters AS c (key, count, exhausted, expires_at)
            VALUES ($1, 1, FALSE, NOW() + $2::interval)
            ON CONFLICT (key) DO UPDATE SET
                count = CASE
                    WHEN c.expires_at <= NOW() THEN 1
                    WHEN c.count >= $3 THEN c.count
                    ELSE c.count + 1
                END,
                exhausted = (c.expires_at > NOW() AND c.count >= $3),
                expires_at = CASE
                    WHEN c.expires_at <= NOW() THEN NOW() + $2::interval
                    ELSE c.expires_at
                END
            RETURNING
                count,
                exhausted,
                CEIL(EXTRACT(EPOCH FROM (expires_at - NOW())) * 1000)::BIGINT AS ttl_millis
        ";
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let row = sqlx::query(query)
            .bind(key)
            .bind(interval(window))
            .bind(limit)
            .fetch_one(&self.pool)
            .instrument(db_span("UPSERT"))
            .await?;

        let count: i64 = row.get("count");
        let exhausted: bool = row.get("exhausted");
        if exhausted {
            let ttl_millis: i64 = row.get("ttl_millis");
            return Ok(CounterHit::Exhausted {
                retry_after: Duration::from_millis(u64::try_from(ttl_millis).unwrap_or(0)),
            });
        }

        Ok(CounterHit::Admitted {
            count: u64::try_from(count).unwrap_or(0),
        })
    }
}

impl SessionRegistry for PgStore {
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

impl CounterStore for PgStore {
    fn hit<'a>(&'a self, key: &'a str, window: Duration, limit: u64) -> StoreFuture<'a, CounterHit> {
        Box::pin(self.charge(key, window, limit))
    }
}
