//! Minimal Vault client: `AppRole` login and KV v2 reads for the signing key.

pub mod kv;

use crate::APP_USER_AGENT;
use anyhow::{Result, anyhow};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

/// Build `<scheme>://<host>:<port><endpoint>` from any Vault URL.
///
/// # Errors
/// Returns an error if the URL has no host or an unsupported scheme.
#[instrument]
pub fn endpoint_url(vault_url: &str, endpoint: &str) -> Result<String> {
    let url = Url::parse(vault_url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {}", scheme)),
        },
    };

    let endpoint_url = format!("{scheme}://{host}:{port}{endpoint}");

    debug!("endpoint URL: {}", endpoint_url);

    Ok(endpoint_url)
}

fn client() -> Result<Client> {
    Ok(Client::builder().user_agent(APP_USER_AGENT).build()?)
}

async fn error_detail(url: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let json_response: Value = response.json().await.unwrap_or_default();

    anyhow!(
        "{} - {}, {}",
        url,
        status,
        json_response["errors"][0].as_str().unwrap_or("")
    )
}

/// Unwrap a wrapped `AppRole` secret id.
/// Create wrapped token with:
/// vault write -wrap-ttl=300s -f auth/approle/role/gatehouse/secret-id
///
/// # Errors
/// Returns an error if Vault rejects the token or the response has no secret id.
#[instrument(skip(token))]
pub async fn unwrap(vault_url: &str, token: &str) -> Result<String> {
    let unwrap_url = endpoint_url(vault_url, "/v1/sys/wrapping/unwrap")?;

    let response = client()?
        .post(&unwrap_url)
        .header("X-Vault-Token", token)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(error_detail(&unwrap_url, response).await);
    }

    let json_response: Value = response.json().await?;
    let sid = json_response["data"]["secret_id"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no secret_id found"))?;

    Ok(sid.to_string())
}

/// Login to Vault using `AppRole`; `login_url` is the full login endpoint,
/// e.g. `https://vault.tld:8200/v1/auth/approle/login`.
/// Returns the client token and its lease duration.
///
/// # Errors
/// Returns an error if the login is rejected or the response has no token.
#[instrument(skip(sid))]
pub async fn approle_login(login_url: &str, sid: &str, rid: &str) -> Result<(String, u64)> {
    // Create a JSON payload for AppRole login
    let login_payload = json!({
        "role_id": rid,
        "secret_id": sid
    });

    debug!("login URL: {}, role ID: {}", login_url, rid);

    let response = client()?
        .post(login_url)
        .json(&login_payload)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(error_detail(login_url, response).await);
    }

    let json_response: Value = response.json().await?;
    let token = json_response["auth"]["client_token"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no client_token found"))?;
    let lease_duration = json_response["auth"]["lease_duration"]
        .as_u64()
        .unwrap_or(1800);

    Ok((token.to_string(), lease_duration))
}
