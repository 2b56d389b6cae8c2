use super::{Vault, check_response};
use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::instrument;
use url::Url;

/// Dynamic database credentials leased from Vault.
#[derive(Debug)]
pub struct DatabaseCreds {
    pub lease_id: String,
    pub lease_duration: u64,
    pub username: String,
    pub password: SecretString,
}

impl DatabaseCreds {
    /// Inject the leased username and password into a DSN.
    ///
    /// # Errors
    /// Returns an error if the DSN is not a valid URL.
    pub fn apply(&self, dsn: &str) -> Result<String> {
        let mut dsn = Url::parse(dsn).context("Invalid database DSN")?;

        dsn.set_username(&self.username)
            .map_err(|()| anyhow!("Error setting username"))?;

        dsn.set_password(Some(self.password.expose_secret()))
            .map_err(|()| anyhow!("Error setting password"))?;

        Ok(dsn.to_string())
    }
}

/// Get DB credentials for `role` from the database secrets engine.
///
/// # Errors
/// Returns an error if Vault rejects the request or the response is incomplete.
#[instrument(skip(vault))]
pub async fn database_creds(vault: &Vault, role: &str) -> Result<DatabaseCreds> {
    let db_creds = vault.endpoint_url(&format!("/v1/database/creds/{role}"))?;

    let response = vault
        .client()
        .get(db_creds.as_str())
        .header("X-Vault-Token", vault.token())
        .send()
        .await
        .context("failed to request database credentials")?;
    let json_response: Value = check_response(&db_creds, response).await?.json().await?;

    parse_creds(&json_response)
}

fn parse_creds(json_response: &Value) -> Result<DatabaseCreds> {
    let lease_id = json_response["lease_id"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_id found"))?;

    let lease_duration = json_response["lease_duration"]
        .as_u64()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))?;

    let username = json_response["data"]["username"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no username found"))?;

    let password = json_response["data"]["password"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no password found"))?;

    Ok(DatabaseCreds {
        lease_id: lease_id.to_string(),
        lease_duration,
        username: username.to_string(),
        password: SecretString::from(password.to_string()),
    })
}
