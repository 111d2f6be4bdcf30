use anyhow::{Context, Result, bail};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::bootstrap::{self, GateArgs};
use crate::gate::{GateConfig, Identity};

#[derive(Debug)]
pub struct Args {
    pub gate: GateArgs,
    pub username: String,
    pub principal_id: Uuid,
    pub authority_id: u64,
}

// An in-process registry dies with this command, so a multipoint login would
// never supersede the principal's session held by the server.
fn check_session_store(config: &GateConfig, dsn: Option<&str>) -> Result<()> {
    if config.multipoint() && dsn.is_none() {
        bail!("Multipoint sessions need the shared store, pass --dsn to mint under multipoint");
    }
    Ok(())
}

/// Issue a session through the lifecycle manager and print it as JSON.
/// # Errors
/// Returns an error if the signing key or the stores cannot be set up, or signing fails.
pub async fn execute(args: Args) -> Result<()> {
    let config = Arc::new(args.gate.config.clone());
    check_session_store(&config, args.gate.dsn.as_deref())?;

    let key = bootstrap::signing_key(&args.gate).await?;
    let stores = bootstrap::open_stores(args.gate.dsn.as_deref()).await?;
    let lifecycle = bootstrap::lifecycle(&config, &key, stores.registry)?;

    let session = lifecycle
        .login(&Identity {
            principal_id: args.principal_id,
            username: args.username,
            authority_id: args.authority_id,
        })
        .await
        .context("Failed to sign session token")?;

    println!(
        "{}",
        json!({
            "token": session.token,
            "expires_at": session.claims.exp,
        })
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipoint_mint_requires_a_dsn() {
        let config = GateConfig::new().with_multipoint(true);
        assert!(
            check_session_store(&config, None)
                .err()
                .is_some_and(|err| err.to_string().contains("--dsn"))
        );
        assert!(check_session_store(&config, Some("postgres://localhost/gatehouse")).is_ok());
    }

    #[test]
    fn single_point_mint_runs_in_process() {
        assert!(check_session_store(&GateConfig::new(), None).is_ok());
    }
}
