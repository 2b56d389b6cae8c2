use crate::{
    api::handlers::{auth::AuthState, health, root},
    vault,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request, StatusCode,
        header::{ALLOW, AUTHORIZATION, CONTENT_TYPE},
    },
    response::IntoResponse,
    routing::get,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_swagger_ui::SwaggerUi;

pub(crate) mod handlers;
mod openapi;

pub use handlers::auth;
pub use openapi::openapi;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Renewable Vault login handed to the server.
pub struct VaultLease {
    pub vault: Arc<vault::Vault>,
    pub lease_duration: u64,
}

/// Build the application router around a ready `AuthState`.
///
/// # Errors
/// Returns an error if the configured frontend base URL is not a valid origin.
pub fn router(auth_state: Arc<AuthState>) -> Result<Router> {
    let auth_routes = get(auth::nonce::nonce)
        .post(auth::login::login)
        .delete(auth::session::logout)
        .fallback(method_not_allowed);

    let mut app = Router::new()
        .route("/", get(root::root))
        .route("/health", get(health::health).options(health::health))
        .route("/api/auth", auth_routes)
        .route("/api/auth/session", get(auth::session::session))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(auth_state.clone())),
        );

    if let Some(frontend_base_url) = auth_state.config().frontend_base_url() {
        let cors = CorsLayer::new()
            .allow_headers([CONTENT_TYPE, AUTHORIZATION])
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_origin(AllowOrigin::exact(frontend_origin(frontend_base_url)?))
            .allow_credentials(true);
        app = app.layer(cors);
    }

    Ok(app)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    vault_lease: Option<VaultLease>,
    auth_config: auth::AuthConfig,
    verifier: Arc<dyn auth::ProofVerifier>,
) -> Result<()> {
    // Renew vault token, gracefully shutdown if failed
    let (tx, mut rx) = mpsc::unbounded_channel();

    if let Some(lease) = vault_lease {
        vault::renew::try_renew(lease.vault, lease.lease_duration, tx.clone());
    }

    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let sessions = Arc::new(auth::PgSessionStore::new(pool.clone()));
    let sweeper = auth::spawn_sweeper(sessions.clone(), SESSION_SWEEP_INTERVAL);

    let auth_state = Arc::new(AuthState::new(
        auth_config,
        verifier,
        Arc::new(auth::PgUserStore::new(pool)),
        sessions,
    ));

    let app = router(auth_state)?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = rx.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            info!("Gracefully shutdown");
        })
        .await?;

    sweeper.abort();
    drop(tx);

    Ok(())
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(ALLOW, "GET, POST, DELETE")],
    )
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
