use crate::api::handlers::{auth, health};
use utoipa::{
    OpenApi,
    openapi::{Contact, Info, InfoBuilder, License},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::nonce::nonce,
        auth::login::login,
        auth::session::logout,
        auth::session::session,
    ),
    components(schemas(
        health::Health,
        auth::types::NonceResponse,
        auth::types::LoginRequest,
        auth::types::LoginResponse,
        auth::types::SessionResponse,
        auth::types::LogoutResponse,
        auth::types::ErrorResponse,
        auth::SessionIdentity,
    )),
    tags(
        (name = "auth", description = "Zero-knowledge ticket login"),
        (name = "health", description = "Service health"),
    )
)]
struct ApiDoc;

/// The `OpenAPI` document served at `/api-docs/openapi.json`.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info = cargo_info();
    doc
}

fn cargo_info() -> Info {
    // Use Cargo.toml metadata instead of the utoipa crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();
    info
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.find('<') {
        Some(start) => (
            non_empty(author[..start].trim()),
            non_empty(author[start + 1..].trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_author_variants() {
        assert_eq!(
            parse_author("Team Ticketauth <team@ticketauth.dev>"),
            (Some("Team Ticketauth"), Some("team@ticketauth.dev"))
        );
        assert_eq!(parse_author("<ops@example.com>"), (None, Some("ops@example.com")));
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("  "), (None, None));
    }

    #[test]
    fn document_lists_auth_routes() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert!(doc.paths.paths.contains_key("/api/auth"));
        assert!(doc.paths.paths.contains_key("/api/auth/session"));
        assert!(doc.paths.paths.contains_key("/health"));

        let auth = &doc.paths.paths["/api/auth"];
        assert!(auth.get.is_some());
        assert!(auth.post.is_some());
        assert!(auth.delete.is_some());
    }
}
