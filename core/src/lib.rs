//! Object catalog, response decoders and the object-mutation lifecycle on
//! top of the backend session client.

#![deny(clippy::unwrap_used, clippy::expect_used)]

mod checks;
pub mod config;
mod config_loader;
mod connection;
pub mod decoders;
pub mod error;
mod lifecycle;
pub mod object_types;
mod xml;

pub use checks::ATC_RUNS_PATH;
pub use checks::ATC_WORKLISTS_PATH;
pub use checks::AtcReport;
pub use checks::CHECK_RUNS_PATH;
pub use checks::DEFAULT_ATC_VARIANT;
pub use config::Config;
pub use config::ConnectionConfig;
pub use config::LifecycleOptions;
pub use connection::open_session;
pub use error::AdtErr;
pub use error::Result;
pub use lifecycle::ACTIVATION_PATH;
pub use lifecycle::ActivationWarning;
pub use lifecycle::ObjectLifecycle;
pub use lifecycle::SEARCH_PATH;
pub use lifecycle::WriteOutcome;
pub use lifecycle::WriteRequest;
pub use object_types::ObjectCatalog;
pub use object_types::ObjectReference;
