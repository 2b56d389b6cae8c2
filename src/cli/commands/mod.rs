pub mod auth;
pub mod logging;
pub mod vault;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

/// Validate that Vault login can succeed when Vault is configured.
///
/// # Errors
/// Returns an error string if `vault-url` is set but AppRole credentials are missing.
pub fn validate(matches: &clap::ArgMatches) -> Result<(), String> {
    if !matches.contains_id("vault-url") {
        return Ok(());
    }
    if !matches.contains_id("vault-role-id") {
        return Err("Missing required argument: --vault-role-id (required with --vault-url)".to_string());
    }
    if !matches.contains_id("vault-secret-id") && !matches.contains_id("vault-wrapped-token") {
        return Err(
            "Missing required argument: --vault-secret-id or --vault-wrapped-token (required with --vault-url)"
                .to_string(),
        );
    }
    Ok(())
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("ticketauth")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("TICKETAUTH_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .long_help(
                    "Database connection string. With --vault-url, username/password are injected from Vault DB creds.",
                )
                .env("TICKETAUTH_DSN")
                .required(true),
        );

    let command = auth::with_args(command);
    let command = vault::with_args(command);
    logging::with_args(command)
}
