#![deny(clippy::unwrap_used, clippy::expect_used)]

mod auth_store;
mod credentials;
mod resolver;

use std::path::PathBuf;

pub use auth_store::AuthDotJson;
pub use auth_store::StoredConnection;
pub use auth_store::get_auth_file;
pub use auth_store::load_credentials;
pub use auth_store::logout;
pub use auth_store::save_credentials;
pub use auth_store::try_read_auth_json;
pub use credentials::BasicCredentials;
pub use credentials::Credentials;
pub use credentials::SessionCookie;
pub use credentials::SessionSeed;
pub use resolver::ADT_COOKIE_ENV_VAR;
pub use resolver::ADT_CSRF_TOKEN_ENV_VAR;
pub use resolver::ADT_PASSWORD_ENV_VAR;
pub use resolver::ADT_USERNAME_ENV_VAR;
pub use resolver::ChainedCredentialResolver;
pub use resolver::CredentialResolver;
pub use resolver::EnvCredentialResolver;
pub use resolver::NoopCredentialResolver;
pub use resolver::StoredCredentialResolver;

pub const ADT_HOME_ENV_VAR: &str = "ADT_HOME";

/// Directory holding `config.toml` and `auth.json`: `$ADT_HOME` when set,
/// otherwise `~/.adt`.
pub fn find_adt_home() -> std::io::Result<PathBuf> {
    if let Ok(val) = std::env::var(ADT_HOME_ENV_VAR)
        && !val.trim().is_empty()
    {
        return Ok(PathBuf::from(val));
    }

    let mut home = dirs::home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "could not find home directory",
        )
    })?;
    home.push(".adt");
    Ok(home)
}

/// The resolver chain used by the CLI: environment first, then the store.
pub fn default_resolver(adt_home: impl Into<PathBuf>) -> ChainedCredentialResolver {
    ChainedCredentialResolver::new()
        .with(EnvCredentialResolver::new())
        .with(StoredCredentialResolver::new(adt_home))
}
