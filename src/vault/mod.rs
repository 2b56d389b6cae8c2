//! Optional Vault AppRole integration.
//!
//! When configured, the server logs in with AppRole, mints short-lived
//! database credentials, and keeps its token renewed in the background.

pub mod database;
pub mod renew;

use crate::APP_USER_AGENT;
use anyhow::{Context, Result, anyhow};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::fmt;
use tracing::{debug, instrument};
use url::Url;

const DEFAULT_LEASE_DURATION: u64 = 1800;

/// Authenticated Vault client.
pub struct Vault {
    login_url: String,
    token: SecretString,
    client: Client,
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("login_url", &self.login_url)
            .finish_non_exhaustive()
    }
}

/// How to obtain the AppRole secret id.
pub enum SecretId {
    Plain(SecretString),
    /// Response-wrapped secret id, created with:
    /// `vault write -wrap-ttl=300s -f auth/approle/role/ticketauth/secret-id`
    Wrapped(SecretString),
}

impl Vault {
    /// Log in with AppRole.
    ///
    /// `login_url` is the full AppRole login URL, e.g.
    /// `https://vault.tld:8200/v1/auth/approle/login`.
    ///
    /// Returns the client and the token lease duration in seconds.
    ///
    /// # Errors
    /// Returns an error if the secret id cannot be unwrapped or the login fails.
    pub async fn login(login_url: &str, role_id: &str, secret_id: SecretId) -> Result<(Self, u64)> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .context("failed to build Vault client")?;

        let secret_id = match secret_id {
            SecretId::Plain(secret_id) => secret_id,
            SecretId::Wrapped(wrapped) => unwrap(&client, login_url, &wrapped).await?,
        };

        let (token, lease_duration) = approle_login(&client, login_url, role_id, &secret_id).await?;

        Ok((
            Self {
                login_url: login_url.to_string(),
                token,
                client,
            },
            lease_duration,
        ))
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn token(&self) -> &str {
        self.token.expose_secret()
    }

    /// Build an API URL on the same Vault host as the login URL.
    ///
    /// # Errors
    /// Returns an error if the login URL cannot be parsed.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<String> {
        endpoint_url(&self.login_url, endpoint)
    }
}

fn endpoint_url(base: &str, endpoint: &str) -> Result<String> {
    let url = Url::parse(base).with_context(|| format!("Invalid Vault URL: {base}"))?;

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

/// Turn a non-2xx Vault response into an error carrying Vault's first message.
pub(crate) async fn check_response(url: &str, response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let json_response: Value = response.json().await.unwrap_or(Value::Null);
    Err(anyhow!(
        "{} - {}, {}",
        url,
        status,
        json_response["errors"][0].as_str().unwrap_or("")
    ))
}

#[instrument(skip(client, token))]
async fn unwrap(client: &Client, login_url: &str, token: &SecretString) -> Result<SecretString> {
    let unwrap_url = endpoint_url(login_url, "/v1/sys/wrapping/unwrap")?;

    let response = client
        .post(&unwrap_url)
        .header("X-Vault-Token", token.expose_secret())
        .send()
        .await
        .context("failed to unwrap secret id")?;
    let json_response: Value = check_response(&unwrap_url, response).await?.json().await?;

    let sid = json_response["data"]["secret_id"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no secret_id found"))?;

    Ok(SecretString::from(sid.to_string()))
}

#[instrument(skip(client, secret_id))]
async fn approle_login(
    client: &Client,
    login_url: &str,
    role_id: &str,
    secret_id: &SecretString,
) -> Result<(SecretString, u64)> {
    let login_payload = json!({
        "role_id": role_id,
        "secret_id": secret_id.expose_secret(),
    });

    let response = client
        .post(login_url)
        .json(&login_payload)
        .send()
        .await
        .context("failed to log in to Vault")?;
    let json_response: Value = check_response(login_url, response).await?.json().await?;

    let token = json_response["auth"]["client_token"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no client_token found"))?;
    let lease_duration = json_response["auth"]["lease_duration"]
        .as_u64()
        .unwrap_or(DEFAULT_LEASE_DURATION);

    Ok((SecretString::from(token.to_string()), lease_duration))
}
