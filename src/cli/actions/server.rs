use anyhow::{Context, Result};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
    task::JoinHandle,
};
use tracing::{error, info, warn};

use super::bootstrap::{self, GateArgs};
use crate::{
    api::{self, GateState},
    gate::{ClientAddressPolicy, PolicyEnforcer, RateLimiter, RuleSet, limiter::principal_key},
    store::sweep::spawn_sweeper,
};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub policy: Option<PathBuf>,
    pub sweep_interval: Duration,
    pub rate_limit: bool,
    pub rate_limit_by_principal: bool,
    pub gate: GateArgs,
}

async fn load_policy(path: Option<&Path>) -> Result<RuleSet> {
    let Some(path) = path else {
        warn!("No policy file configured, protected routes deny every request");
        return Ok(RuleSet::default());
    };

    let rules = RuleSet::load(path)
        .await
        .with_context(|| format!("Failed to load policy file: {}", path.display()))?;
    info!("Loaded {} policy rules from {}", rules.len(), path.display());
    Ok(rules)
}

/// Swap in the rules from `path`. On failure the current rules stay active
/// and `false` is returned.
async fn reload_policy(enforcer: &PolicyEnforcer, path: &Path) -> bool {
    match RuleSet::load(path).await {
        Ok(rules) => {
            info!("Reloaded {} policy rules from {}", rules.len(), path.display());
            enforcer.reload(rules);
            true
        }
        Err(err) => {
            error!("Failed to reload policy, keeping previous rules: {err}");
            false
        }
    }
}

/// Re-read the policy file on every SIGHUP.
fn spawn_policy_reload(enforcer: Arc<PolicyEnforcer>, path: PathBuf) -> Result<JoinHandle<()>> {
    let mut hangup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;

    Ok(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            reload_policy(&enforcer, &path).await;
        }
    }))
}

/// Execute the server action.
/// # Errors
/// Returns an error if the signing key, the stores, the policy or the listener
/// cannot be set up.
pub async fn execute(args: Args) -> Result<()> {
    info!(
        port = args.port,
        dsn = %args
            .gate
            .dsn
            .as_deref()
            .map_or_else(|| "in-process".to_string(), bootstrap::redact_dsn),
        policy = ?args.policy,
        rate_limit = args.rate_limit,
        "Starting gatehouse"
    );

    let config = Arc::new(args.gate.config.clone());
    if config.development() {
        warn!("Development mode: policy enforcement is bypassed");
    }

    let key = bootstrap::signing_key(&args.gate).await?;
    let stores = bootstrap::open_stores(args.gate.dsn.as_deref()).await?;
    let lifecycle = bootstrap::lifecycle(&config, &key, stores.registry.clone())?;

    let enforcer = Arc::new(PolicyEnforcer::new(
        load_policy(args.policy.as_deref()).await?,
        config.development(),
    ));
    if let Some(path) = args.policy {
        spawn_policy_reload(enforcer.clone(), path)?;
    }

    let limiter = if args.rate_limit {
        let mut policy = ClientAddressPolicy::new(Some(stores.counters.clone()), &config);
        if args.rate_limit_by_principal {
            policy = policy.with_key(principal_key);
        }
        RateLimiter::new(Arc::new(policy))
    } else {
        warn!("Rate limiting disabled");
        RateLimiter::disabled(&config)
    };

    spawn_sweeper(stores.sweep.clone(), args.sweep_interval);

    let app = api::router(GateState {
        lifecycle,
        limiter,
        enforcer,
    });

    let listener = TcpListener::bind(format!("::0:{}", args.port)).await?;

    api::serve(listener, app).await
}
