use std::path::PathBuf;

use tracing::debug;
use tracing::warn;

use crate::auth_store::load_credentials;
use crate::credentials::BasicCredentials;
use crate::credentials::Credentials;
use crate::credentials::SessionCookie;
use crate::credentials::SessionSeed;

pub const ADT_USERNAME_ENV_VAR: &str = "ADT_USERNAME";
pub const ADT_PASSWORD_ENV_VAR: &str = "ADT_PASSWORD";
pub const ADT_COOKIE_ENV_VAR: &str = "ADT_COOKIE";
pub const ADT_CSRF_TOKEN_ENV_VAR: &str = "ADT_CSRF_TOKEN";

/// Produces the initial credentials for a backend connection before the
/// session client starts.
pub trait CredentialResolver: Send + Sync {
    fn try_resolve(&self, connection_id: &str) -> Option<Credentials>;
}

/// Resolver for environments without a host that could hand over a session.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCredentialResolver;

impl CredentialResolver for NoopCredentialResolver {
    fn try_resolve(&self, _connection_id: &str) -> Option<Credentials> {
        None
    }
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads `ADT_USERNAME`/`ADT_PASSWORD` and, for a handed-over session,
/// `ADT_COOKIE`/`ADT_CSRF_TOKEN`. The values apply to every connection id.
pub struct EnvCredentialResolver {
    lookup: EnvLookup,
}

impl EnvCredentialResolver {
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    fn var(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }
}

impl Default for EnvCredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialResolver for EnvCredentialResolver {
    fn try_resolve(&self, _connection_id: &str) -> Option<Credentials> {
        let basic = match (self.var(ADT_USERNAME_ENV_VAR), self.var(ADT_PASSWORD_ENV_VAR)) {
            (Some(username), Some(password)) => Some(BasicCredentials::new(username, password)),
            _ => None,
        };
        let cookies = self
            .var(ADT_COOKIE_ENV_VAR)
            .map(|header| SessionCookie::parse_header(&header))
            .unwrap_or_default();
        let csrf_token = self.var(ADT_CSRF_TOKEN_ENV_VAR);
        let session = if cookies.is_empty() && csrf_token.is_none() {
            None
        } else {
            Some(SessionSeed {
                cookies,
                csrf_token,
            })
        };

        let credentials = Credentials { basic, session };
        if credentials.is_empty() {
            None
        } else {
            Some(credentials)
        }
    }
}

/// Looks up credentials saved with `adt login` in `$ADT_HOME/auth.json`.
#[derive(Debug, Clone)]
pub struct StoredCredentialResolver {
    adt_home: PathBuf,
}

impl StoredCredentialResolver {
    pub fn new(adt_home: impl Into<PathBuf>) -> Self {
        Self {
            adt_home: adt_home.into(),
        }
    }
}

impl CredentialResolver for StoredCredentialResolver {
    fn try_resolve(&self, connection_id: &str) -> Option<Credentials> {
        match load_credentials(&self.adt_home, connection_id) {
            Ok(found) => found,
            Err(err) => {
                warn!("failed to read stored credentials for {connection_id}: {err}");
                None
            }
        }
    }
}

/// Tries each resolver in order and returns the first hit.
#[derive(Default)]
pub struct ChainedCredentialResolver {
    resolvers: Vec<Box<dyn CredentialResolver>>,
}

impl ChainedCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resolver: impl CredentialResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }
}

impl CredentialResolver for ChainedCredentialResolver {
    fn try_resolve(&self, connection_id: &str) -> Option<Credentials> {
        let found = self
            .resolvers
            .iter()
            .find_map(|resolver| resolver.try_resolve(connection_id));
        if found.is_none() {
            debug!("no credentials resolved for connection {connection_id}");
        }
        found
    }
}
