#![deny(clippy::unwrap_used, clippy::expect_used)]

mod client;
mod error;
mod path;
mod types;

pub use client::AuthStrategy;
pub use client::CSRF_TOKEN_HEADER;
pub use client::DISCOVERY_PATH;
pub use client::SESSION_TYPE_HEADER;
pub use client::Session;
pub use error::BODY_EXCERPT_LIMIT;
pub use error::ProtocolError;
pub use error::Result;
pub use error::SessionError;
pub use path::ADT_ROOT;
pub use path::normalize_path;
pub use types::AdtRequest;
pub use types::AdtResponse;
pub use types::DEFAULT_REQUEST_TIMEOUT;
pub use types::SessionOptions;

pub use reqwest::Method;
pub use reqwest::StatusCode;
pub use reqwest::header;
pub use tokio_util::sync::CancellationToken;
