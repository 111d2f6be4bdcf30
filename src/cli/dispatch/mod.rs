//! Map parsed arguments to an [`Action`].

use crate::cli::{
    actions::{
        Action,
        bootstrap::{GateArgs, SigningKeySource},
        mint, server,
    },
    commands::{self, gate, vault},
};
use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use std::{path::PathBuf, time::Duration};
use uuid::Uuid;

fn gate_args(matches: &ArgMatches) -> Result<GateArgs> {
    let config = gate::config(matches)?;

    let signing_key = match (gate::signing_key(matches), vault::Options::parse(matches)?) {
        (Some(key), _) => SigningKeySource::Inline(key),
        (None, Some(vault)) => SigningKeySource::Vault(vault),
        (None, None) => {
            return Err(anyhow!(
                "missing signing key: pass --{} or --{}",
                gate::ARG_SIGNING_KEY,
                vault::ARG_VAULT_URL
            ));
        }
    };

    Ok(GateArgs {
        config,
        dsn: matches.get_one::<String>(commands::ARG_DSN).cloned(),
        signing_key,
    })
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    if let Some(sub) = matches.subcommand_matches(commands::CMD_MINT) {
        let username = sub
            .get_one::<String>(commands::ARG_USERNAME)
            .cloned()
            .context("missing required argument: --username")?;
        let principal_id = sub
            .get_one::<Uuid>(commands::ARG_PRINCIPAL_ID)
            .copied()
            .context("missing required argument: --principal-id")?;
        let authority_id = sub
            .get_one::<u64>(commands::ARG_AUTHORITY)
            .copied()
            .context("missing required argument: --authority")?;

        return Ok(Action::Mint(mint::Args {
            gate: gate_args(sub)?,
            username,
            principal_id,
            authority_id,
        }));
    }

    Ok(Action::Server(server::Args {
        port: matches.get_one::<u16>(commands::ARG_PORT).copied().unwrap_or(8080),
        policy: matches.get_one::<String>(commands::ARG_POLICY).map(PathBuf::from),
        sweep_interval: Duration::from_secs(
            matches
                .get_one::<u64>(commands::ARG_SWEEP_INTERVAL)
                .copied()
                .unwrap_or(300),
        ),
        rate_limit: !matches.get_flag(commands::ARG_DISABLE_RATE_LIMIT),
        rate_limit_by_principal: matches
            .get_one::<String>(commands::ARG_RATE_LIMIT_BY)
            .is_some_and(|by| by == "principal"),
        gate: gate_args(matches)?,
    }))
}
