//! Token, admission and policy settings.

use anyhow::{Context, Result};
use clap::{
    Arg, ArgAction, ArgMatches, Command,
    builder::{FalseyValueParser, NonEmptyStringValueParser},
};
use secrecy::SecretString;
use std::time::Duration;

use crate::gate::GateConfig;

pub const ARG_TOKEN_LIFETIME: &str = "token-lifetime-seconds";
pub const ARG_BUFFER: &str = "buffer-seconds";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_MULTIPOINT: &str = "multipoint";
pub const ARG_RATE_LIMIT_WINDOW: &str = "rate-limit-window-seconds";
pub const ARG_RATE_LIMIT_COUNT: &str = "rate-limit-count";
pub const ARG_CLIENT_IP_HEADER: &str = "client-ip-header";
pub const ARG_STORE_TIMEOUT: &str = "store-timeout-ms";
pub const ARG_DEVELOPMENT: &str = "development";
pub const ARG_SIGNING_KEY: &str = "signing-key";

/// Build a [`GateConfig`] from parsed arguments.
///
/// # Errors
/// Returns an error if a required value is missing.
pub fn config(matches: &ArgMatches) -> Result<GateConfig> {
    let lifetime = matches
        .get_one::<i64>(ARG_TOKEN_LIFETIME)
        .copied()
        .with_context(|| format!("missing required argument: --{ARG_TOKEN_LIFETIME}"))?;
    let buffer = matches
        .get_one::<i64>(ARG_BUFFER)
        .copied()
        .with_context(|| format!("missing required argument: --{ARG_BUFFER}"))?;
    let window = matches
        .get_one::<u64>(ARG_RATE_LIMIT_WINDOW)
        .copied()
        .with_context(|| format!("missing required argument: --{ARG_RATE_LIMIT_WINDOW}"))?;
    let count = matches
        .get_one::<u64>(ARG_RATE_LIMIT_COUNT)
        .copied()
        .with_context(|| format!("missing required argument: --{ARG_RATE_LIMIT_COUNT}"))?;
    let store_timeout = matches
        .get_one::<u64>(ARG_STORE_TIMEOUT)
        .copied()
        .with_context(|| format!("missing required argument: --{ARG_STORE_TIMEOUT}"))?;

    let mut config = GateConfig::new()
        .with_token_lifetime_seconds(lifetime)
        .with_buffer_seconds(buffer)
        .with_multipoint(matches.get_flag(ARG_MULTIPOINT))
        .with_rate_limit(Duration::from_secs(window), count)
        .with_development(matches.get_flag(ARG_DEVELOPMENT))
        .with_store_timeout(Duration::from_millis(store_timeout))
        .with_client_ip_header(matches.get_one::<String>(ARG_CLIENT_IP_HEADER).cloned());

    if let Some(issuer) = matches.get_one::<String>(ARG_ISSUER) {
        config = config.with_issuer(issuer.clone());
    }

    Ok(config)
}

#[must_use]
pub fn signing_key(matches: &ArgMatches) -> Option<SecretString> {
    matches
        .get_one::<String>(ARG_SIGNING_KEY)
        .map(|key| SecretString::from(key.clone()))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_LIFETIME)
                .long(ARG_TOKEN_LIFETIME)
                .help("Lifetime of an issued session token in seconds")
                .env("GATEHOUSE_TOKEN_LIFETIME_SECONDS")
                .default_value("604800")
                .global(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_BUFFER)
                .long(ARG_BUFFER)
                .help("Rotate a token once it has fewer than this many seconds left")
                .env("GATEHOUSE_BUFFER_SECONDS")
                .default_value("86400")
                .global(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer written into and required from every token")
                .env("GATEHOUSE_ISSUER")
                .global(true)
                .value_parser(NonEmptyStringValueParser::new()),
        )
        .arg(
            Arg::new(ARG_MULTIPOINT)
                .long(ARG_MULTIPOINT)
                .help("Allow a single live session per principal")
                .env("GATEHOUSE_MULTIPOINT")
                .global(true)
                .action(ArgAction::SetTrue)
                .value_parser(FalseyValueParser::new()),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW)
                .long(ARG_RATE_LIMIT_WINDOW)
                .help("Admission counter window in seconds")
                .env("GATEHOUSE_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("3600")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_COUNT)
                .long(ARG_RATE_LIMIT_COUNT)
                .help("Requests admitted per client within one window")
                .env("GATEHOUSE_RATE_LIMIT_COUNT")
                .default_value("15000")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CLIENT_IP_HEADER)
                .long(ARG_CLIENT_IP_HEADER)
                .help("Trusted header carrying the client address, e.g. x-forwarded-for")
                .env("GATEHOUSE_CLIENT_IP_HEADER")
                .global(true),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT)
                .long(ARG_STORE_TIMEOUT)
                .help("Upper bound for a single store call in milliseconds")
                .env("GATEHOUSE_STORE_TIMEOUT_MS")
                .default_value("500")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_DEVELOPMENT)
                .long(ARG_DEVELOPMENT)
                .help("Development mode: the policy gate allows everything")
                .env("GATEHOUSE_DEVELOPMENT")
                .global(true)
                .action(ArgAction::SetTrue)
                .value_parser(FalseyValueParser::new()),
        )
        .arg(
            Arg::new(ARG_SIGNING_KEY)
                .long(ARG_SIGNING_KEY)
                .help("Token signing key (at least 32 bytes); read from Vault when omitted")
                .env("GATEHOUSE_SIGNING_KEY")
                .hide_env_values(true)
                .global(true),
        )
}
