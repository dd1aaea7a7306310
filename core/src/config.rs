//! Workspace configuration.
//!
//! Loaded from `$ADT_HOME/config.toml` (overlaid by
//! `/etc/opt/adt/config.toml`):
//!
//! ```toml
//! default_connection = "dev"
//!
//! [connections.dev]
//! base_url = "https://dev.example.com:44300"
//! client = "100"
//! language = "EN"
//! username = "DEVELOPER"
//! default_package = "$TMP"
//!
//! [lifecycle]
//! lock_retry_delay_ms = 1000
//! activate = true
//!
//! [object_types."SRVD/SRV"]
//! collection = "/sap/bc/adt/ddic/srvd/sources"
//! content_type = "application/vnd.sap.adt.ddic.srvd.v1+xml"
//! root_element = "srvd:srvdSource"
//! namespace = "http://www.sap.com/adt/ddic/srvdsources"
//! ```

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use adt_backend_client::SessionOptions;
use serde::Deserialize;

use crate::config_loader::load_config_as_toml;
use crate::error::AdtErr;
use crate::object_types::ObjectCatalog;
use crate::object_types::ObjectTypeSpec;

/// Attempts of the lock → write → unlock unit before a 423 is surfaced.
pub const LOCK_ATTEMPTS: usize = 3;
const DEFAULT_LOCK_RETRY_DELAY_MS: u64 = 1_000;
/// Hard cap for user-configured `lock_retry_delay_ms`.
const MAX_LOCK_RETRY_DELAY_MS: u64 = 60_000;
const DEFAULT_SEARCH_MAX_RESULTS: u32 = 50;
/// Hard cap for user-configured `request_timeout_ms`.
const MAX_REQUEST_TIMEOUT_MS: u64 = 600_000;
pub const DEFAULT_PACKAGE: &str = "$TMP";

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigToml {
    pub default_connection: Option<String>,

    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionToml>,

    #[serde(default)]
    pub lifecycle: LifecycleToml,

    /// Additions to and replacements of the built-in object catalog.
    #[serde(default)]
    pub object_types: BTreeMap<String, ObjectTypeSpec>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectionToml {
    pub base_url: String,
    /// `sap-client` sent with every request.
    pub client: Option<String>,
    /// `sap-language` sent with every request; also the master language of
    /// created objects.
    pub language: Option<String>,
    /// Recorded as the responsible user of created objects.
    pub username: Option<String>,
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub danger_accept_invalid_certs: bool,
    pub default_package: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleToml {
    pub lock_retry_delay_ms: Option<u64>,
    pub activate: Option<bool>,
    pub search_max_results: Option<u32>,
}

/// Knobs of the object-mutation lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleOptions {
    pub lock_attempts: usize,
    pub lock_retry_delay: Duration,
    /// Activate after a successful write.
    pub activate: bool,
    pub search_max_results: u32,
    pub master_language: Option<String>,
    pub responsible: Option<String>,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            lock_attempts: LOCK_ATTEMPTS,
            lock_retry_delay: Duration::from_millis(DEFAULT_LOCK_RETRY_DELAY_MS),
            activate: true,
            search_max_results: DEFAULT_SEARCH_MAX_RESULTS,
            master_language: None,
            responsible: None,
        }
    }
}

impl From<&LifecycleToml> for LifecycleOptions {
    fn from(toml: &LifecycleToml) -> Self {
        let defaults = Self::default();
        Self {
            lock_retry_delay: toml
                .lock_retry_delay_ms
                .map(|ms| Duration::from_millis(ms.min(MAX_LOCK_RETRY_DELAY_MS)))
                .unwrap_or(defaults.lock_retry_delay),
            activate: toml.activate.unwrap_or(defaults.activate),
            search_max_results: toml
                .search_max_results
                .filter(|n| *n > 0)
                .unwrap_or(defaults.search_max_results),
            ..defaults
        }
    }
}

/// A named backend connection ready to open a session.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub id: String,
    pub options: SessionOptions,
    pub username: Option<String>,
    pub default_package: String,
}

impl ConnectionConfig {
    pub fn from_toml(id: &str, toml: &ConnectionToml) -> Self {
        let mut options = SessionOptions::new(toml.base_url.clone());
        options.sap_client = toml.client.clone();
        options.language = toml.language.clone();
        if let Some(ms) = toml.request_timeout_ms {
            options.request_timeout = Duration::from_millis(ms.clamp(1, MAX_REQUEST_TIMEOUT_MS));
        }
        options.danger_accept_invalid_certs = toml.danger_accept_invalid_certs;
        Self {
            id: id.to_string(),
            options,
            username: toml.username.clone(),
            default_package: toml
                .default_package
                .clone()
                .unwrap_or_else(|| DEFAULT_PACKAGE.to_string()),
        }
    }

    /// Lifecycle options with this connection's identity filled in.
    pub fn lifecycle_options(&self, base: &LifecycleOptions) -> LifecycleOptions {
        LifecycleOptions {
            master_language: self.options.language.clone(),
            responsible: self.username.as_ref().map(|u| u.to_uppercase()),
            ..base.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub adt_home: PathBuf,
    pub default_connection: Option<String>,
    pub connections: BTreeMap<String, ConnectionConfig>,
    pub lifecycle: LifecycleOptions,
    pub catalog: ObjectCatalog,
}

impl Config {
    pub fn load(adt_home: &Path) -> io::Result<Self> {
        let root_value = load_config_as_toml(adt_home)?;
        let cfg: ConfigToml = root_value.try_into().map_err(|e| {
            tracing::error!("Failed to deserialize config: {e}");
            io::Error::new(io::ErrorKind::InvalidData, e)
        })?;
        Ok(Self::from_toml(cfg, adt_home.to_path_buf()))
    }

    pub fn from_toml(cfg: ConfigToml, adt_home: PathBuf) -> Self {
        let connections = cfg
            .connections
            .iter()
            .map(|(id, toml)| (id.clone(), ConnectionConfig::from_toml(id, toml)))
            .collect();
        Self {
            adt_home,
            default_connection: cfg.default_connection,
            connections,
            lifecycle: LifecycleOptions::from(&cfg.lifecycle),
            catalog: ObjectCatalog::builtin().with_overrides(&cfg.object_types),
        }
    }

    /// Picks `id`, else `default_connection`, else the only configured
    /// connection.
    pub fn connection(&self, id: Option<&str>) -> Result<&ConnectionConfig, AdtErr> {
        if let Some(id) = id.or(self.default_connection.as_deref()) {
            return self
                .connections
                .get(id)
                .ok_or_else(|| AdtErr::UnknownConnection(id.to_string()));
        }
        let mut all = self.connections.values();
        match (all.next(), all.next()) {
            (Some(only), None) => Ok(only),
            _ => Err(AdtErr::NoConnection),
        }
    }
}
