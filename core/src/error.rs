use adt_backend_client::SessionError;
use adt_backend_client::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdtErr>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{response} response is missing {field}")]
    MissingField {
        response: &'static str,
        field: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum AdtErr {
    #[error("unsupported object type `{0}`")]
    UnsupportedObjectType(String),

    #[error("invalid object name `{name}`: {reason}")]
    InvalidObjectName { name: String, reason: String },

    /// Creating the object failed for a reason other than "already exists".
    #[error("creating {object_type} {name} failed: {source}")]
    Create {
        object_type: String,
        name: String,
        #[source]
        source: SessionError,
    },

    /// The object could not be found right after it was created or found.
    #[error("{object_url} returned 404 for its structure after being created or found")]
    NotFoundAfterCreate { object_url: String },

    /// The lock call succeeded but returned no handle.
    #[error("locking {object_url} returned no lock handle")]
    LockAcquisition {
        object_url: String,
        #[source]
        source: DecodeError,
    },

    #[error("writing {source_url} failed: {source}")]
    Write {
        source_url: String,
        #[source]
        source: SessionError,
    },

    #[error("{object_type} {name} does not exist")]
    NotFound { object_type: String, name: String },

    #[error("no connection named `{0}` is configured")]
    UnknownConnection(String),

    #[error("no connection configured; add one under [connections] in config.toml")]
    NoConnection,

    #[error("no credentials available for connection `{0}`")]
    MissingCredentials(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl AdtErr {
    /// HTTP status of the backend response behind this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            AdtErr::Create { source, .. }
            | AdtErr::Write { source, .. }
            | AdtErr::Session(source) => source.status(),
            _ => None,
        }
    }

    /// The object is locked by someone else (HTTP 423).
    pub fn is_locked(&self) -> bool {
        self.status() == Some(StatusCode::LOCKED)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            AdtErr::Session(SessionError::Cancelled)
                | AdtErr::Create {
                    source: SessionError::Cancelled,
                    ..
                }
                | AdtErr::Write {
                    source: SessionError::Cancelled,
                    ..
                }
        )
    }
}
