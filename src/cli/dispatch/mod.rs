//! Map validated CLI arguments to an action.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, vault};
use anyhow::{Context, Result, anyhow};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    crate::cli::commands::validate(matches).map_err(|e| anyhow!(e))?;

    let auth_opts = auth::Options::parse(matches)?;
    let vault_opts = vault::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        verifier_url: auth_opts.verifier_url,
        verifier_timeout_seconds: auth_opts.verifier_timeout_seconds,
        trusted_signers: auth_opts.trusted_signers,
        allowed_event_ids: auth_opts.allowed_event_ids,
        frontend_base_url: auth_opts.frontend_base_url,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        renonce_policy: auth_opts.renonce_policy,
        vault: vault_opts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::RenoncePolicy;

    #[test]
    fn builds_server_action_from_env() {
        temp_env::with_vars(
            [
                ("TICKETAUTH_DSN", Some("postgres://localhost:5432/ticketauth")),
                ("TICKETAUTH_VERIFIER_URL", Some("http://verifier:3000/verify")),
                ("TICKETAUTH_ALLOWED_EVENT_ID", Some("evt1")),
                ("TICKETAUTH_VAULT_URL", None),
                ("TICKETAUTH_VAULT_ROLE_ID", None),
                ("TICKETAUTH_VAULT_SECRET_ID", None),
                ("TICKETAUTH_RENONCE_POLICY", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["ticketauth"]);
                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.port, 8080);
                    assert_eq!(args.allowed_event_ids, vec!["evt1"]);
                    assert_eq!(args.renonce_policy, RenoncePolicy::Allow);
                    assert!(args.vault.is_none());
                    assert!(args.frontend_base_url.is_none());
                }
            },
        );
    }

    #[test]
    fn vault_url_without_secret_is_rejected() {
        temp_env::with_vars(
            [
                ("TICKETAUTH_DSN", Some("postgres://localhost:5432/ticketauth")),
                ("TICKETAUTH_VERIFIER_URL", Some("http://verifier:3000/verify")),
                ("TICKETAUTH_ALLOWED_EVENT_ID", Some("evt1")),
                (
                    "TICKETAUTH_VAULT_URL",
                    Some("http://127.0.0.1:8200/v1/auth/approle/login"),
                ),
                ("TICKETAUTH_VAULT_ROLE_ID", Some("role-id")),
                ("TICKETAUTH_VAULT_SECRET_ID", None),
                ("TICKETAUTH_VAULT_WRAPPED_TOKEN", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["ticketauth"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("--vault-secret-id"));
                }
            },
        );
    }

    #[test]
    fn vault_options_are_collected() {
        temp_env::with_vars(
            [
                ("TICKETAUTH_DSN", Some("postgres://localhost:5432/ticketauth")),
                ("TICKETAUTH_VERIFIER_URL", Some("http://verifier:3000/verify")),
                ("TICKETAUTH_ALLOWED_EVENT_ID", Some("evt1")),
                (
                    "TICKETAUTH_VAULT_URL",
                    Some("http://127.0.0.1:8200/v1/auth/approle/login"),
                ),
                ("TICKETAUTH_VAULT_ROLE_ID", Some("role-id")),
                ("TICKETAUTH_VAULT_SECRET_ID", Some("secret-id")),
                ("TICKETAUTH_VAULT_WRAPPED_TOKEN", None),
                ("TICKETAUTH_VAULT_DB_ROLE", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["ticketauth"]);
                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    let vault = args.vault;
                    assert!(vault.is_some());
                    if let Some(vault) = vault {
                        assert_eq!(vault.role_id, "role-id");
                        assert_eq!(vault.secret_id.as_deref(), Some("secret-id"));
                        assert_eq!(vault.db_role, "ticketauth");
                    }
                }
            },
        );
    }
}
