//! Token lifecycle: verification, near-expiry rotation and revocation.
//!
//! Flow Overview (`authenticate`):
//! 1) No token: reject ("not logged in").
//! 2) Blacklisted token: reject before any signature work. A registry that
//!    cannot answer rejects too.
//! 3) Verify; expired and invalid tokens get distinct failures.
//! 4) Enough time left: proceed with the token as is.
//! 5) Inside the rotation buffer: mint a replacement and hand it back as a
//!    [`Rotation`]. With multipoint enforcement the principal's previous live
//!    token is blacklisted (best-effort) and the new one recorded.
//!
//! Two near-expiry requests for one principal racing through step 5 each mint
//! a token and each may blacklist the other's predecessor; both new tokens stay
//! valid until a later rotation or login supersedes them. No lock is taken to
//! prevent this.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use super::{
    claims::{Claims, Identity},
    codec::TokenCodec,
    config::GateConfig,
    error::{AuthFailure, SigningError},
    registry::{ActiveSession, SessionRegistry},
};
use crate::store::{StoreError, bounded};

/// A replacement token the caller must adopt for its next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    pub token: String,
    pub expires_at: i64,
}

/// Successful token gate outcome.
#[derive(Debug, Clone)]
pub struct Authenticated {
    /// Claims of the token that was presented; the request runs under them.
    pub claims: Claims,
    pub rotation: Option<Rotation>,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub claims: Claims,
}

pub struct TokenLifecycle {
    codec: Arc<TokenCodec>,
    registry: Arc<dyn SessionRegistry>,
    config: Arc<GateConfig>,
}

impl std::fmt::Debug for TokenLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLifecycle")
            .field("codec", &self.codec)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenLifecycle {
    #[must_use]
    pub fn new(
        codec: Arc<TokenCodec>,
        registry: Arc<dyn SessionRegistry>,
        config: Arc<GateConfig>,
    ) -> Self {
        Self {
            codec,
            registry,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Run the token gate for a request carrying `token`.
    ///
    /// # Errors
    /// Returns the [`AuthFailure`] that rejects the request.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Authenticated, AuthFailure> {
        self.authenticate_at(token, Utc::now().timestamp()).await
    }

    /// [`Self::authenticate`] with an explicit clock (unix seconds).
    ///
    /// # Errors
    /// Returns the [`AuthFailure`] that rejects the request.
    #[instrument(skip(self, token))]
    pub async fn authenticate_at(
        &self,
        token: Option<&str>,
        now: i64,
    ) -> Result<Authenticated, AuthFailure> {
        let token = token
            .filter(|token| !token.is_empty())
            .ok_or(AuthFailure::NoToken)?;

        match bounded(self.config.store_timeout(), self.registry.is_blacklisted(token)).await {
            Ok(false) => {}
            Ok(true) => {
                debug!("rejecting blacklisted token");
                return Err(AuthFailure::Blacklisted);
            }
            Err(err) => {
                error!("Failed to check token blacklist, rejecting: {err}");
                return Err(AuthFailure::RegistryUnavailable);
            }
        }

        let claims = self.codec.verify(token, now)?;

        if !claims.needs_rotation(now) {
            return Ok(Authenticated {
                claims,
                rotation: None,
            });
        }

        let rotation = self.rotate(&claims, now).await;
        Ok(Authenticated { claims, rotation })
    }

    /// Mint a session for `identity` at login.
    ///
    /// With multipoint enforcement the principal's previous live token is
    /// blacklisted (best-effort) and the new one recorded.
    ///
    /// # Errors
    /// Returns an error if the token cannot be signed.
    #[instrument(skip(self), fields(username = %identity.username))]
    pub async fn login(&self, identity: &Identity) -> Result<IssuedSession, SigningError> {
        let now = Utc::now().timestamp();
        let claims = Claims::new(
            identity,
            self.codec.issuer(),
            now,
            self.config.token_lifetime_seconds(),
            self.config.buffer_seconds(),
        );
        let token = self.codec.issue(&claims)?;

        if self.config.multipoint() {
            self.supersede(&claims.username, &token, claims.exp).await;
        }

        Ok(IssuedSession { token, claims })
    }

    /// Blacklist `token` until its own expiry (`expires_at`) plus the
    /// configured grace. Used for logout and for superseded sessions.
    ///
    /// # Errors
    /// Returns an error if the registry write fails or times out.
    #[instrument(skip(self, token))]
    pub async fn logout(&self, token: &str, expires_at: i64) -> Result<(), StoreError> {
        let until = expires_at.saturating_add(self.config.blacklist_grace_seconds());
        bounded(
            self.config.store_timeout(),
            self.registry.blacklist(token, until),
        )
        .await
    }

    async fn rotate(&self, claims: &Claims, now: i64) -> Option<Rotation> {
        let lifetime = self.config.token_lifetime_seconds();
        let (token, rotated) = match self.codec.issue_rotated(claims, now, lifetime) {
            Ok(issued) => issued,
            Err(err) => {
                // The presented token is still valid; the caller simply keeps it.
                error!("Failed to sign rotated token: {err}");
                return None;
            }
        };

        debug!(username = %rotated.username, expires_at = rotated.exp, "rotated session token");

        if self.config.multipoint() {
            self.supersede(&rotated.username, &token, rotated.exp).await;
        }

        Some(Rotation {
            token,
            expires_at: rotated.exp,
        })
    }

    /// Record `token` as the principal's live session, blacklisting the one it replaces.
    async fn supersede(&self, username: &str, token: &str, expires_at: i64) {
        let timeout = self.config.store_timeout();

        match bounded(timeout, self.registry.active_session(username)).await {
            Ok(Some(previous)) if previous.token != token => {
                // Best-effort: the superseded token also expires on its own.
                let revoked: Result<(), StoreError> =
                    self.logout(&previous.token, previous.expires_at).await;
                if let Err(err) = revoked {
                    error!("Failed to blacklist superseded token for {username}: {err}");
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!("Failed to read active session for {username}: {err}");
            }
        }

        let session = ActiveSession {
            token: token.to_string(),
            expires_at,
        };
        if let Err(err) = bounded(timeout, self.registry.set_active_session(username, &session)).await
        {
            error!("Failed to record active session for {username}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gate::error::CodecError,
        store::{MemoryStore, StoreFuture},
    };
    use std::time::Duration;
    use uuid::Uuid;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn unavailable<'a, T: Send + 'a>() -> StoreFuture<'a, T> {
        Box::pin(async { Err::<T, _>(StoreError::Timeout(Duration::from_millis(1))) })
    }

    /// Registry whose every call fails.
    struct DownRegistry;

    impl SessionRegistry for DownRegistry {
        fn is_blacklisted<'a>(&'a self, _token: &'a str) -> StoreFuture<'a, bool> {
            unavailable()
        }

        fn blacklist<'a>(&'a self, _token: &'a str, _expires_at: i64) -> StoreFuture<'a, ()> {
            unavailable()
        }

        fn active_session<'a>(
            &'a self,
            _username: &'a str,
        ) -> StoreFuture<'a, Option<ActiveSession>> {
            unavailable()
        }

        fn set_active_session<'a>(
            &'a self,
            _username: &'a str,
            _session: &'a ActiveSession,
        ) -> StoreFuture<'a, ()> {
            unavailable()
        }
    }

    fn identity(username: &str) -> Identity {
        Identity {
            principal_id: Uuid::new_v4(),
            username: username.to_string(),
            authority_id: 888,
        }
    }

    fn config(multipoint: bool) -> GateConfig {
        GateConfig::new()
            .with_token_lifetime_seconds(3600)
            .with_buffer_seconds(300)
            .with_multipoint(multipoint)
    }

    fn lifecycle(
        registry: Arc<dyn SessionRegistry>,
        config: GateConfig,
    ) -> anyhow::Result<(TokenLifecycle, Arc<TokenCodec>)> {
        let codec = Arc::new(TokenCodec::new(KEY, config.issuer().to_string())?);
        Ok((
            TokenLifecycle::new(Arc::clone(&codec), registry, Arc::new(config)),
            codec,
        ))
    }

    #[tokio::test]
    async fn missing_token_is_not_logged_in() -> anyhow::Result<()> {
        let (lifecycle, _) = lifecycle(Arc::new(MemoryStore::new()), config(false))?;
        assert_eq!(
            lifecycle.authenticate(None).await.err(),
            Some(AuthFailure::NoToken)
        );
        assert_eq!(
            lifecycle.authenticate(Some("")).await.err(),
            Some(AuthFailure::NoToken)
        );
        Ok(())
    }

    #[tokio::test]
    async fn fresh_token_proceeds_without_rotation() -> anyhow::Result<()> {
        let (lifecycle, _) = lifecycle(Arc::new(MemoryStore::new()), config(false))?;
        let session = lifecycle.login(&identity("alice")).await?;
        let authenticated = lifecycle.authenticate(Some(&session.token)).await?;
        assert_eq!(authenticated.claims, session.claims);
        assert_eq!(authenticated.rotation, None);
        Ok(())
    }

    #[tokio::test]
    async fn near_expiry_token_is_rotated() -> anyhow::Result<()> {
        let (lifecycle, codec) = lifecycle(Arc::new(MemoryStore::new()), config(false))?;
        let now = Utc::now().timestamp();
        // Issued an hour ago with 100 seconds left, inside the 300 second buffer.
        let claims = Claims::new(&identity("alice"), "gatehouse", now - 3500, 3600, 300);
        let token = codec.issue(&claims)?;

        let authenticated = lifecycle.authenticate_at(Some(&token), now).await?;
        assert_eq!(authenticated.claims, claims);

        let rotation = authenticated
            .rotation
            .ok_or_else(|| anyhow::anyhow!("expected a rotated token"))?;
        assert_eq!(rotation.expires_at, now + 3600);
        let rotated = codec.verify(&rotation.token, now)?;
        assert_eq!(rotated.exp, now + 3600);
        assert_eq!(rotated.identity(), claims.identity());
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_reported_as_expired() -> anyhow::Result<()> {
        let (lifecycle, codec) = lifecycle(Arc::new(MemoryStore::new()), config(false))?;
        let now = Utc::now().timestamp();
        let claims = Claims::new(&identity("alice"), "gatehouse", now - 7200, 3600, 300);
        let token = codec.issue(&claims)?;
        assert_eq!(
            lifecycle.authenticate(Some(&token)).await.err(),
            Some(AuthFailure::Expired)
        );
        Ok(())
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() -> anyhow::Result<()> {
        let (lifecycle, _) = lifecycle(Arc::new(MemoryStore::new()), config(false))?;
        assert_eq!(
            lifecycle.authenticate(Some("not-a-token")).await.err(),
            Some(AuthFailure::from(CodecError::Malformed("missing claims")))
        );
        Ok(())
    }

    #[tokio::test]
    async fn revoked_token_is_rejected_despite_valid_signature() -> anyhow::Result<()> {
        let (lifecycle, codec) = lifecycle(Arc::new(MemoryStore::new()), config(false))?;
        let session = lifecycle.login(&identity("alice")).await?;
        lifecycle
            .logout(&session.token, session.claims.exp)
            .await?;

        assert!(codec
            .verify(&session.token, Utc::now().timestamp())
            .is_ok());
        assert_eq!(
            lifecycle.authenticate(Some(&session.token)).await.err(),
            Some(AuthFailure::Blacklisted)
        );
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_registry_fails_closed() -> anyhow::Result<()> {
        let (lifecycle, codec) = lifecycle(Arc::new(DownRegistry), config(false))?;
        let now = Utc::now().timestamp();
        let token = codec.issue(&Claims::new(&identity("alice"), "gatehouse", now, 3600, 300))?;
        assert_eq!(
            lifecycle.authenticate(Some(&token)).await.err(),
            Some(AuthFailure::RegistryUnavailable)
        );
        Ok(())
    }

    #[tokio::test]
    async fn multipoint_login_revokes_previous_session() -> anyhow::Result<()> {
        let (lifecycle, _) = lifecycle(Arc::new(MemoryStore::new()), config(true))?;
        let first = lifecycle.login(&identity("alice")).await?;
        let second = lifecycle.login(&identity("alice")).await?;

        assert_eq!(
            lifecycle.authenticate(Some(&first.token)).await.err(),
            Some(AuthFailure::Blacklisted)
        );
        assert!(lifecycle.authenticate(Some(&second.token)).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn multipoint_disabled_keeps_sessions_independent() -> anyhow::Result<()> {
        let (lifecycle, _) = lifecycle(Arc::new(MemoryStore::new()), config(false))?;
        let first = lifecycle.login(&identity("alice")).await?;
        let second = lifecycle.login(&identity("alice")).await?;
        assert!(lifecycle.authenticate(Some(&first.token)).await.is_ok());
        assert!(lifecycle.authenticate(Some(&second.token)).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn multipoint_rotation_blacklists_the_replaced_token() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (lifecycle, codec) = lifecycle(store.clone(), config(true))?;
        let now = Utc::now().timestamp();
        let claims = Claims::new(&identity("alice"), "gatehouse", now - 3500, 3600, 300);
        let token = codec.issue(&claims)?;
        store
            .set_active_session(
                "alice",
                &ActiveSession {
                    token: token.clone(),
                    expires_at: claims.exp,
                },
            )
            .await?;

        let authenticated = lifecycle.authenticate_at(Some(&token), now).await?;
        let rotation = authenticated
            .rotation
            .ok_or_else(|| anyhow::anyhow!("expected a rotated token"))?;

        assert_eq!(
            store.active_session("alice").await?.map(|s| s.token),
            Some(rotation.token.clone())
        );
        assert!(store.is_blacklisted(&token).await?);
        assert!(lifecycle.authenticate(Some(&rotation.token)).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn rotation_survives_registry_write_failures() -> anyhow::Result<()> {
        // Blacklist reads must succeed for the request to get this far, so use
        // a registry that only fails writes.
        struct ReadOnlyRegistry(MemoryStore);

        impl SessionRegistry for ReadOnlyRegistry {
            fn is_blacklisted<'a>(&'a self, token: &'a str) -> StoreFuture<'a, bool> {
                self.0.is_blacklisted(token)
            }

            fn blacklist<'a>(&'a self, _token: &'a str, _expires_at: i64) -> StoreFuture<'a, ()> {
                unavailable()
            }

            fn active_session<'a>(
                &'a self,
                _username: &'a str,
            ) -> StoreFuture<'a, Option<ActiveSession>> {
                Box::pin(async {
                    Ok::<_, StoreError>(Some(ActiveSession {
                        token: "older".to_string(),
                        expires_at: i64::MAX,
                    }))
                })
            }

            fn set_active_session<'a>(
                &'a self,
                _username: &'a str,
                _session: &'a ActiveSession,
            ) -> StoreFuture<'a, ()> {
                unavailable()
            }
        }

        let (lifecycle, codec) =
            lifecycle(Arc::new(ReadOnlyRegistry(MemoryStore::new())), config(true))?;
        let now = Utc::now().timestamp();
        let claims = Claims::new(&identity("alice"), "gatehouse", now - 3500, 3600, 300);
        let token = codec.issue(&claims)?;

        let authenticated = lifecycle.authenticate_at(Some(&token), now).await?;
        assert!(authenticated.rotation.is_some());
        Ok(())
    }
}
