//! Startup steps shared by the server and `mint`: signing key, stores and the
//! token lifecycle.

use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use url::Url;

use crate::{
    cli::{commands::vault::Options as VaultOptions, globals::GlobalArgs},
    gate::{CounterStore, GateConfig, SessionRegistry, TokenCodec, TokenLifecycle},
    store::{MemoryStore, PgStore, sweep::ExpirySweep},
    vault,
};

/// Where the token signing key comes from.
#[derive(Debug)]
pub enum SigningKeySource {
    Inline(SecretString),
    Vault(VaultOptions),
}

/// Settings every action that touches tokens needs.
#[derive(Debug)]
pub struct GateArgs {
    pub config: GateConfig,
    pub dsn: Option<String>,
    pub signing_key: SigningKeySource,
}

impl SigningKeySource {
    /// Resolve the key, logging in to Vault when needed.
    ///
    /// # Errors
    /// Returns an error if any Vault step fails.
    pub async fn resolve(&self) -> Result<SecretString> {
        let options = match self {
            Self::Inline(key) => return Ok(key.clone()),
            Self::Vault(options) => options,
        };

        let mut globals = GlobalArgs::new(options.url.clone());

        // If vault wrapped token try to unwrap, otherwise use secret-id.
        let secret_id = if let Some(wrapped) = &options.wrapped_token {
            vault::unwrap(&globals.vault_url, wrapped).await?
        } else {
            options
                .secret_id
                .clone()
                .context("missing vault secret id")?
        };

        let (token, lease) =
            vault::approle_login(&globals.vault_url, &secret_id, &options.role_id).await?;
        debug!("vault token lease duration: {lease}s");
        globals.set_token(SecretString::from(token));

        vault::kv::read_signing_key(
            &globals.vault_url,
            &globals.vault_token,
            &options.kv_mount,
            &options.kv_path,
        )
        .await
        .context("Failed to load signing key from Vault")
    }
}

/// Store handles, all backed by the same store.
pub struct Stores {
    pub registry: Arc<dyn SessionRegistry>,
    pub counters: Arc<dyn CounterStore>,
    pub sweep: Arc<dyn ExpirySweep>,
}

/// Postgres when a DSN is given, otherwise an in-process store.
///
/// # Errors
/// Returns an error if the database is unreachable or the schema cannot be applied.
pub async fn open_stores(dsn: Option<&str>) -> Result<Stores> {
    let Some(dsn) = dsn else {
        info!("No DSN configured, keeping gate state in process");
        let store = Arc::new(MemoryStore::new());
        return Ok(Stores {
            registry: store.clone(),
            counters: store.clone(),
            sweep: store,
        });
    };

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(PgStore::new(pool));
    store
        .ensure_schema()
        .await
        .context("Failed to apply gate schema")?;

    Ok(Stores {
        registry: store.clone(),
        counters: store.clone(),
        sweep: store,
    })
}

/// Validate the config and wire the codec and lifecycle manager.
///
/// # Errors
/// Returns an error if the config is inconsistent or the key is rejected.
pub fn lifecycle(
    config: &Arc<GateConfig>,
    key: &SecretString,
    registry: Arc<dyn SessionRegistry>,
) -> Result<Arc<TokenLifecycle>> {
    config.validate().context("Invalid gate configuration")?;

    let codec = TokenCodec::new(key.expose_secret().as_bytes(), config.issuer())
        .context("Invalid signing key")?;

    Ok(Arc::new(TokenLifecycle::new(
        Arc::new(codec),
        registry,
        config.clone(),
    )))
}

/// DSN with the password masked, for logs.
#[must_use]
pub fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("****")).is_err() {
                return "<invalid dsn>".to_string();
            }
            url.to_string()
        }
        Err(_) => "<invalid dsn>".to_string(),
    }
}

/// # Errors
/// Returns an error if the signing key cannot be resolved.
pub async fn signing_key(args: &GateArgs) -> Result<SecretString> {
    let key = args.signing_key.resolve().await?;
    if key.expose_secret().is_empty() {
        return Err(anyhow!("signing key is empty"));
    }
    Ok(key)
}
