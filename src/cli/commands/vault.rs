use anyhow::{Context, Result};
use clap::{Arg, ArgGroup, ArgMatches, Command};

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("vault-url")
                .long("vault-url")
                .help("Vault approle login URL, example: https://vault.tld:8200/v1/auth/<approle>/login")
                .long_help(
                    "Vault approle login URL. When set, database credentials are leased from Vault and injected into the DSN.",
                )
                .env("TICKETAUTH_VAULT_URL"),
        )
        .arg(
            Arg::new("vault-role-id")
                .long("vault-role-id")
                .help("Vault role id")
                .env("TICKETAUTH_VAULT_ROLE_ID")
                .requires("vault-url"),
        )
        .arg(
            Arg::new("vault-secret-id")
                .long("vault-secret-id")
                .help("Vault secret id")
                .env("TICKETAUTH_VAULT_SECRET_ID")
                .requires("vault-url")
                .conflicts_with("vault-wrapped-token"),
        )
        .arg(
            Arg::new("vault-wrapped-token")
                .long("vault-wrapped-token")
                .help("Vault wrapped token holding the secret id")
                .env("TICKETAUTH_VAULT_WRAPPED_TOKEN")
                .requires("vault-url"),
        )
        .arg(
            Arg::new("vault-db-role")
                .long("vault-db-role")
                .help("Vault database secrets engine role")
                .env("TICKETAUTH_VAULT_DB_ROLE")
                .default_value("ticketauth"),
        )
        .group(
            ArgGroup::new("vault-auth")
                .args(["vault-role-id", "vault-secret-id", "vault-wrapped-token"])
                .multiple(true),
        )
}

#[derive(Debug)]
pub struct Options {
    pub url: String,
    pub role_id: String,
    pub secret_id: Option<String>,
    pub wrapped_token: Option<String>,
    pub db_role: String,
}

impl Options {
    /// Returns `None` when Vault is not configured.
    ///
    /// # Errors
    /// Returns an error if `--vault-url` is set without a role id.
    pub fn parse(matches: &ArgMatches) -> Result<Option<Self>> {
        let Some(url) = matches.get_one::<String>("vault-url").cloned() else {
            return Ok(None);
        };

        let role_id = matches
            .get_one::<String>("vault-role-id")
            .cloned()
            .context("missing required argument: --vault-role-id")?;

        Ok(Some(Self {
            url,
            role_id,
            secret_id: matches.get_one::<String>("vault-secret-id").cloned(),
            wrapped_token: matches.get_one::<String>("vault-wrapped-token").cloned(),
            db_role: matches
                .get_one::<String>("vault-db-role")
                .cloned()
                .unwrap_or_else(|| "ticketauth".to_string()),
        }))
    }
}
