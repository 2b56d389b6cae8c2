//! Auth configuration and the state shared by the auth handlers.

use std::str::FromStr;
use std::sync::Arc;
use url::Url;

use super::{
    claim::ClaimPolicy,
    proof::ProofVerifier,
    resolver::{IdentityResolver, UserStore},
    session::{SessionManager, SessionStore},
};

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;

/// What `GET /api/auth` does for a session that is already logged in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenoncePolicy {
    /// Issue the nonce and drop the current identity.
    #[default]
    Allow,
    /// Refuse until the session logs out.
    Reject,
}

impl FromStr for RenoncePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "reject" => Ok(Self::Reject),
            other => Err(format!("invalid re-nonce policy: {other} (expected allow or reject)")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    policy: ClaimPolicy,
    frontend_base_url: Option<String>,
    session_ttl_seconds: i64,
    renonce_policy: RenoncePolicy,
}

impl AuthConfig {
    #[must_use]
    pub fn new(policy: ClaimPolicy) -> Self {
        Self {
            policy,
            frontend_base_url: None,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            renonce_policy: RenoncePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_frontend_base_url(mut self, frontend_base_url: String) -> Self {
        self.frontend_base_url = Some(frontend_base_url);
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_renonce_policy(mut self, renonce_policy: RenoncePolicy) -> Self {
        self.renonce_policy = renonce_policy;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &ClaimPolicy {
        &self.policy
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> Option<&str> {
        self.frontend_base_url.as_deref()
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn renonce_policy(&self) -> RenoncePolicy {
        self.renonce_policy
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url
            .as_deref()
            .and_then(|url| Url::parse(url).ok())
            .is_some_and(|url| url.scheme() == "https")
    }
}

pub struct AuthState {
    config: AuthConfig,
    verifier: Arc<dyn ProofVerifier>,
    resolver: IdentityResolver,
    sessions: SessionManager,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        verifier: Arc<dyn ProofVerifier>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let sessions = SessionManager::new(
            sessions,
            config.session_ttl_seconds(),
            config.session_cookie_secure(),
        );
        Self {
            config,
            verifier,
            resolver: IdentityResolver::new(users),
            sessions,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn verifier(&self) -> &Arc<dyn ProofVerifier> {
        &self.verifier
    }

    #[must_use]
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserStore> {
        self.resolver.store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn config() -> AuthConfig {
        AuthConfig::new(ClaimPolicy::new(Vec::new(), HashSet::new()))
    }

    #[test]
    fn defaults() {
        let config = config();
        assert_eq!(config.session_ttl_seconds(), DEFAULT_SESSION_TTL_SECONDS);
        assert_eq!(config.renonce_policy(), RenoncePolicy::Allow);
        assert_eq!(config.frontend_base_url(), None);
        assert!(!config.session_cookie_secure());
    }

    #[test]
    fn cookie_secure_follows_frontend_scheme() {
        let config = config().with_frontend_base_url("https://tickets.example".to_string());
        assert!(config.session_cookie_secure());
        let config = config.with_frontend_base_url("http://localhost:5173".to_string());
        assert!(!config.session_cookie_secure());
    }

    #[test]
    fn renonce_policy_parses() {
        assert_eq!("allow".parse(), Ok(RenoncePolicy::Allow));
        assert_eq!("REJECT".parse(), Ok(RenoncePolicy::Reject));
        assert!("maybe".parse::<RenoncePolicy>().is_err());
    }
}
