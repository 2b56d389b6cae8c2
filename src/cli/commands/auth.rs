use crate::api::auth::{RenoncePolicy, SignerKey};
use anyhow::{Context, Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};
use regex::Regex;

/// Public key of the Zupass production ticket issuer.
pub const DEFAULT_TRUSTED_SIGNER: &str = "05e0c4e8517758da3a26c80310ff2fe65b9f85d89dfc9c80e6d0b6477f88173e:29ae64b615383a0ebb1bc37b3a642d82d37545f0f5b1444330300e4c4eedba3f";

pub fn with_args(command: Command) -> Command {
    let command = with_verifier_args(command);
    with_session_args(command)
}

fn with_verifier_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("verifier-url")
                .long("verifier-url")
                .help("Proof verification service URL")
                .long_help(
                    "Proof verification service URL. It receives POST {\"pcd\": <serialized proof>} and answers {\"verified\": bool}.",
                )
                .env("TICKETAUTH_VERIFIER_URL")
                .required(true),
        )
        .arg(
            Arg::new("verifier-timeout-seconds")
                .long("verifier-timeout-seconds")
                .help("Timeout for a single proof verification")
                .env("TICKETAUTH_VERIFIER_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("trusted-signer")
                .long("trusted-signer")
                .help("Trusted ticket signer public key as <x>:<y> hex, repeatable")
                .env("TICKETAUTH_TRUSTED_SIGNER")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .default_value(DEFAULT_TRUSTED_SIGNER),
        )
        .arg(
            Arg::new("allowed-event-id")
                .long("allowed-event-id")
                .help("Event id accepted for login, repeatable")
                .env("TICKETAUTH_ALLOWED_EVENT_ID")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .required(true),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL allowed by CORS")
                .long_help(
                    "Frontend base URL. Its origin is allowed by CORS with credentials, and an https URL marks the session cookie Secure.",
                )
                .env("TICKETAUTH_FRONTEND_BASE_URL"),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session cookie TTL in seconds")
                .env("TICKETAUTH_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new("renonce-policy")
                .long("renonce-policy")
                .help("What a nonce request does on a logged in session")
                .env("TICKETAUTH_RENONCE_POLICY")
                .default_value("allow")
                .value_parser(["allow", "reject"]),
        )
}

#[derive(Debug)]
pub struct Options {
    pub verifier_url: String,
    pub verifier_timeout_seconds: u64,
    pub trusted_signers: Vec<SignerKey>,
    pub allowed_event_ids: Vec<String>,
    pub frontend_base_url: Option<String>,
    pub session_ttl_seconds: i64,
    pub renonce_policy: RenoncePolicy,
}

impl Options {
    /// # Errors
    /// Returns an error if a required value is missing or a signer key is malformed.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let verifier_url = matches
            .get_one::<String>("verifier-url")
            .cloned()
            .context("missing required argument: --verifier-url")?;

        let trusted_signers = matches
            .get_many::<String>("trusted-signer")
            .map(|values| values.map(|value| parse_signer(value)).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();

        let allowed_event_ids: Vec<String> = matches
            .get_many::<String>("allowed-event-id")
            .map(|values| {
                values
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if allowed_event_ids.is_empty() {
            return Err(anyhow!("missing required argument: --allowed-event-id"));
        }

        let renonce_policy = matches
            .get_one::<String>("renonce-policy")
            .map(|value| value.parse::<RenoncePolicy>())
            .transpose()
            .map_err(|err| anyhow!(err))?
            .unwrap_or_default();

        Ok(Self {
            verifier_url,
            verifier_timeout_seconds: matches
                .get_one::<u64>("verifier-timeout-seconds")
                .copied()
                .unwrap_or(10),
            trusted_signers,
            allowed_event_ids,
            frontend_base_url: matches
                .get_one::<String>("frontend-base-url")
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            session_ttl_seconds: matches
                .get_one::<i64>("session-ttl-seconds")
                .copied()
                .unwrap_or(86_400),
            renonce_policy,
        })
    }
}

fn parse_signer(value: &str) -> Result<SignerKey> {
    let re = Regex::new(r"^([0-9a-fA-F]+):([0-9a-fA-F]+)$")?;
    let captures = re
        .captures(value.trim())
        .ok_or_else(|| anyhow!("invalid trusted signer {value}, expected <x>:<y> hex"))?;
    Ok(SignerKey::new(&captures[1], &captures[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signer_pairs() -> Result<()> {
        let key = parse_signer(" AB01:cd02 ")?;
        assert_eq!(key.to_string(), "AB01:cd02");
        assert!(parse_signer("ab01").is_err());
        assert!(parse_signer("ab01:xyz").is_err());
        assert!(parse_signer(":cd02").is_err());
        Ok(())
    }

    #[test]
    fn default_signer_is_valid() -> Result<()> {
        let key = parse_signer(DEFAULT_TRUSTED_SIGNER)?;
        assert_eq!(key.to_string(), DEFAULT_TRUSTED_SIGNER);
        Ok(())
    }
}
