use crate::{
    api::{
        self, VaultLease,
        auth::{AuthConfig, ClaimPolicy, HttpProofVerifier, RenoncePolicy, SignerKey},
    },
    cli::commands::vault::Options as VaultOptions,
    vault::{self, SecretId, Vault},
};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub verifier_url: String,
    pub verifier_timeout_seconds: u64,
    pub trusted_signers: Vec<SignerKey>,
    pub allowed_event_ids: Vec<String>,
    pub frontend_base_url: Option<String>,
    pub session_ttl_seconds: i64,
    pub renonce_policy: RenoncePolicy,
    pub vault: Option<VaultOptions>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if Vault login fails, DB credentials cannot be fetched, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let (dsn, vault_lease) = match &args.vault {
        Some(opts) => {
            let (dsn, lease) = vault_dsn(&args.dsn, opts).await?;
            (dsn, Some(lease))
        }
        None => (args.dsn.clone(), None),
    };

    let verifier = HttpProofVerifier::new(
        args.verifier_url,
        Duration::from_secs(args.verifier_timeout_seconds),
    )?;

    let policy = ClaimPolicy::new(
        args.trusted_signers,
        args.allowed_event_ids.into_iter().collect(),
    );
    let mut auth_config = AuthConfig::new(policy)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_renonce_policy(args.renonce_policy);
    if let Some(frontend_base_url) = args.frontend_base_url {
        auth_config = auth_config.with_frontend_base_url(frontend_base_url);
    }

    api::new(args.port, dsn, vault_lease, auth_config, Arc::new(verifier)).await
}

/// Log in to Vault and inject leased database credentials into the DSN.
async fn vault_dsn(dsn: &str, opts: &VaultOptions) -> Result<(String, VaultLease)> {
    // If vault wrapped token try to unwrap, otherwise use secret-id.
    let secret_id = match (&opts.wrapped_token, &opts.secret_id) {
        (Some(wrapped), _) => SecretId::Wrapped(SecretString::from(wrapped.clone())),
        (None, Some(secret_id)) => SecretId::Plain(SecretString::from(secret_id.clone())),
        (None, None) => return Err(anyhow!("Vault secret-id or wrapped token is required")),
    };

    let (vault, lease_duration) = Vault::login(&opts.url, &opts.role_id, secret_id)
        .await
        .context("Vault login failed")?;

    // Get database username and password from Vault
    let creds = vault::database::database_creds(&vault, &opts.db_role)
        .await
        .context("Could not get database username and password")?;

    debug!(
        "database lease {} for {} seconds",
        creds.lease_id, creds.lease_duration
    );

    let dsn = creds.apply(dsn)?;

    Ok((
        dsn,
        VaultLease {
            vault: Arc::new(vault),
            lease_duration,
        },
    ))
}

fn log_startup_args(args: &Args) {
    let signers = args
        .trusted_signers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("verifier_url", args.verifier_url.clone()),
        (
            "verifier_timeout",
            format!("{}s", args.verifier_timeout_seconds),
        ),
        ("trusted_signers", signers.join(", ")),
        ("allowed_event_ids", args.allowed_event_ids.join(", ")),
        (
            "frontend_base_url",
            args.frontend_base_url
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        ),
        ("session_ttl", format!("{}s", args.session_ttl_seconds)),
        ("renonce_policy", format!("{:?}", args.renonce_policy).to_lowercase()),
        (
            "vault_url",
            args.vault
                .as_ref()
                .map_or_else(|| "disabled".to_string(), |vault| vault.url.clone()),
        ),
    ];
    info!("{}", format_entries("Startup configuration", &entries));
}

fn format_entries(title: &str, entries: &[(&str, String)]) -> String {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "ticketauth {} - {}\n\n{title}:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    message
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
