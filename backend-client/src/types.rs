use std::time::Duration;

use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Static settings of one backend connection.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub base_url: String,
    /// Value of the `sap-client` query parameter sent with every request.
    pub sap_client: Option<String>,
    /// Value of the `sap-language` query parameter sent with every request.
    pub language: Option<String>,
    pub request_timeout: Duration,
    /// Accept any TLS certificate. Development systems only.
    pub danger_accept_invalid_certs: bool,
    pub user_agent: Option<String>,
}

impl SessionOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            sap_client: None,
            language: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            danger_accept_invalid_certs: false,
            user_agent: None,
        }
    }

    pub fn with_sap_client(mut self, client: impl Into<String>) -> Self {
        self.sap_client = Some(client.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }
}

/// One request against the backend. The path may be canonical
/// (`/sap/bc/adt/...`) or an IDE-workspace URI; it is normalized before
/// sending.
#[derive(Clone, Debug)]
pub struct AdtRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: Vec<(HeaderName, String)>,
    pub(crate) body: Option<String>,
    pub(crate) cancellable: bool,
}

impl AdtRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            cancellable: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn accept(self, value: impl Into<String>) -> Self {
        self.header(reqwest::header::ACCEPT, value)
    }

    pub fn content_type(self, value: impl Into<String>) -> Self {
        self.header(reqwest::header::CONTENT_TYPE, value)
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Send even when the session's cancellation token has fired. Used for
    /// compensation steps that must run on every exit path.
    pub fn uncancellable(mut self) -> Self {
        self.cancellable = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Clone, Debug)]
pub struct AdtResponse {
    pub status: StatusCode,
    pub url: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl AdtResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
