use crate::vault;
use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{Instrument, info_span, instrument};

use crate::gate::codec::MIN_KEY_LEN;

const SIGNING_KEY_FIELD: &str = "signing_key";

/// Read the token signing key from a KV v2 secret (`data.data.signing_key`).
///
/// # Errors
/// Returns an error if the Vault request fails, the field is missing, or the
/// key is shorter than the codec accepts.
#[instrument(skip(vault_token))]
pub async fn read_signing_key(
    vault_url: &str,
    vault_token: &SecretString,
    kv_mount: &str,
    kv_path: &str,
) -> Result<SecretString> {
    let client = reqwest::Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .build()?;
    let path = format!("/v1/{kv_mount}/data/{kv_path}");
    let url = vault::endpoint_url(vault_url, &path)?;

    let span = info_span!(
        "vault.kv.read",
        http.method = "GET",
        url = %url
    );
    let response = client
        .get(&url)
        .header("X-Vault-Token", vault_token.expose_secret())
        .send()
        .instrument(span)
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("vault kv read failed: {status} {body}"));
    }

    let json: Value = response.json().await?;
    let key = json
        .get("data")
        .and_then(|data| data.get("data"))
        .and_then(|data| data.get(SIGNING_KEY_FIELD))
        .and_then(Value::as_str)
        .context("signing key missing from vault response")?;

    if key.len() < MIN_KEY_LEN {
        return Err(anyhow!(
            "signing key length is {}, expected at least {}",
            key.len(),
            MIN_KEY_LEN
        ));
    }

    Ok(SecretString::from(key.to_string()))
}
