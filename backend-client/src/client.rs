use std::sync::Arc;

use adt_login::Credentials;
use adt_login::SessionSeed;
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::cookie::Jar;
use reqwest::header::ACCEPT;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;
use url::Url;

use crate::error::ProtocolError;
use crate::error::Result;
use crate::error::SessionError;
use crate::path::normalize_path;
use crate::types::AdtRequest;
use crate::types::AdtResponse;
use crate::types::SessionOptions;

pub const CSRF_TOKEN_HEADER: &str = "x-csrf-token";
pub const SESSION_TYPE_HEADER: &str = "x-sap-adt-sessiontype";
pub const DISCOVERY_PATH: &str = "/sap/bc/adt/discovery";

const CSRF_FETCH: &str = "Fetch";
const DEFAULT_USER_AGENT: &str = concat!("adt-client/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Basic credentials sent on the discovery request.
    Password,
    /// Cookies (and possibly a token) handed over from an existing session.
    PreAuthenticated,
}

/// One authenticated, stateful channel to one backend.
///
/// Every request method takes `&mut self`: the CSRF token and the cookie jar
/// are only consistent under strict request ordering, so a session never has
/// two requests in flight.
pub struct Session {
    options: SessionOptions,
    base_url: String,
    host: String,
    credentials: Credentials,
    http: reqwest::Client,
    jar: Arc<Jar>,
    csrf_token: Option<String>,
    strategy: Option<AuthStrategy>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(options: SessionOptions, credentials: Credentials) -> Result<Self> {
        let mut base_url = options.base_url.trim().to_string();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        let parsed = Url::parse(&base_url)
            .map_err(|e| SessionError::InvalidRequest(format!("invalid base url {base_url}: {e}")))?;
        let host = parsed.host_str().unwrap_or_default().to_string();

        if options.danger_accept_invalid_certs {
            warn!("TLS certificate validation is DISABLED for {host}; use only against development systems");
        }
        let (http, jar) = build_http(&options)?;

        Ok(Self {
            options,
            base_url,
            host,
            credentials,
            http,
            jar,
            csrf_token: None,
            strategy: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Share a caller-owned cancellation token. Cancelling it aborts the
    /// in-flight request and any retry delay built on this session.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.strategy.is_some()
    }

    pub fn auth_strategy(&self) -> Option<AuthStrategy> {
        self.strategy
    }

    /// Establish the session and obtain a CSRF token.
    pub async fn login(&mut self) -> Result<()> {
        if let Some(seed) = self.credentials.session.clone() {
            self.seed_cookies(&seed)?;

            if let Some(token) = seed.csrf_token.filter(|t| !t.trim().is_empty()) {
                debug!("reusing handed-over session for {}", self.host);
                self.csrf_token = Some(token);
                self.strategy = Some(AuthStrategy::PreAuthenticated);
                return Ok(());
            }

            match self.fetch_csrf_token(AuthStrategy::PreAuthenticated, true).await {
                Ok(token) => {
                    self.csrf_token = Some(token);
                    self.strategy = Some(AuthStrategy::PreAuthenticated);
                    info!("session for {} established from handed-over cookies", self.host);
                    return Ok(());
                }
                Err(SessionError::Authentication(reason)) if self.credentials.basic.is_some() => {
                    warn!("handed-over session was rejected ({reason}); falling back to password login");
                }
                Err(err) => return Err(err),
            }
        }

        if self.credentials.basic.is_none() {
            return Err(SessionError::Authentication(format!(
                "no credentials available for {}",
                self.host
            )));
        }

        let token = self.fetch_csrf_token(AuthStrategy::Password, true).await?;
        self.csrf_token = Some(token);
        self.strategy = Some(AuthStrategy::Password);
        info!("logged in to {}", self.host);
        Ok(())
    }

    /// Forget the token and every cookie. Safe to call repeatedly.
    pub fn logout(&mut self) -> Result<()> {
        let (http, jar) = build_http(&self.options)?;
        self.http = http;
        self.jar = jar;
        self.csrf_token = None;
        if self.strategy.take().is_some() {
            debug!("logged out of {}", self.host);
        }
        Ok(())
    }

    pub async fn get(&mut self, path: &str) -> Result<AdtResponse> {
        self.send(AdtRequest::get(path)).await
    }

    pub async fn post(
        &mut self,
        path: &str,
        body: Option<String>,
        headers: &[(HeaderName, &str)],
    ) -> Result<AdtResponse> {
        self.send(with_parts(AdtRequest::post(path), body, headers))
            .await
    }

    pub async fn put(
        &mut self,
        path: &str,
        body: Option<String>,
        headers: &[(HeaderName, &str)],
    ) -> Result<AdtResponse> {
        self.send(with_parts(AdtRequest::put(path), body, headers))
            .await
    }

    pub async fn delete(&mut self, path: &str, headers: &[(HeaderName, &str)]) -> Result<AdtResponse> {
        self.send(with_parts(AdtRequest::delete(path), None, headers))
            .await
    }

    /// Send `request`, logging in first if needed.
    ///
    /// A 403 is treated as a stale CSRF token: the token is refreshed once
    /// and the same request replayed once. Any non-2xx after that is a
    /// [`ProtocolError`].
    pub async fn send(&mut self, request: AdtRequest) -> Result<AdtResponse> {
        if !self.is_authenticated() {
            self.login().await?;
        }

        let response = self.execute(&request).await?;
        if response.status.is_success() {
            return Ok(response);
        }
        if response.status != StatusCode::FORBIDDEN {
            return Err(protocol_error(&request, response).into());
        }

        debug!(
            "{} {} returned 403; refreshing CSRF token and replaying once",
            request.method, response.url
        );
        // The rejected token must not be sent again, even if the refresh fails.
        self.csrf_token = None;
        match self.refresh_csrf_token(request.cancellable).await {
            Ok(()) => {}
            Err(SessionError::Authentication(reason)) => {
                warn!("CSRF token refresh failed: {reason}");
                return Err(protocol_error(&request, response).into());
            }
            Err(err) => return Err(err),
        }

        let replay = self.execute(&request).await?;
        if replay.status.is_success() {
            Ok(replay)
        } else {
            Err(protocol_error(&request, replay).into())
        }
    }

    /// Fetches a fresh token with the current strategy. Expired handed-over
    /// cookies fall back to password login when basic credentials exist.
    async fn refresh_csrf_token(&mut self, cancellable: bool) -> Result<()> {
        let strategy = match self.strategy {
            Some(strategy) => strategy,
            None if self.credentials.basic.is_some() => AuthStrategy::Password,
            None => AuthStrategy::PreAuthenticated,
        };
        let token = match self.fetch_csrf_token(strategy, cancellable).await {
            Err(SessionError::Authentication(reason))
                if strategy == AuthStrategy::PreAuthenticated
                    && self.credentials.basic.is_some() =>
            {
                warn!("handed-over session expired ({reason}); falling back to password login");
                let token = self
                    .fetch_csrf_token(AuthStrategy::Password, cancellable)
                    .await?;
                self.strategy = Some(AuthStrategy::Password);
                token
            }
            result => result?,
        };
        self.csrf_token = Some(token);
        Ok(())
    }

    async fn fetch_csrf_token(&self, strategy: AuthStrategy, cancellable: bool) -> Result<String> {
        let url = self.resolve_url(DISCOVERY_PATH, &[])?;
        let mut builder = self
            .http
            .get(url.clone())
            .header(SESSION_TYPE_HEADER, "stateful")
            .header(CSRF_TOKEN_HEADER, CSRF_FETCH)
            .header(ACCEPT, "application/atomsvc+xml");
        if strategy == AuthStrategy::Password {
            match &self.credentials.basic {
                Some(basic) => {
                    builder = builder.basic_auth(&basic.username, Some(&basic.password));
                }
                None => {
                    return Err(SessionError::Authentication(
                        "password login requested without basic credentials".to_string(),
                    ));
                }
            }
        }

        debug!("fetching CSRF token from {url} ({strategy:?})");
        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let token = response
                .headers()
                .get(CSRF_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            Ok::<_, reqwest::Error>((status, token, body))
        };
        let result = if cancellable {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                result = exchange => result,
            }
        } else {
            exchange.await
        };
        let (status, token, body) = result.map_err(|e| self.classify(e, &Method::GET, &url))?;

        if !status.is_success() {
            trace!("token fetch body: {body}");
            return Err(SessionError::Authentication(format!(
                "token fetch from {url} returned {status}"
            )));
        }
        match token {
            Some(token) if !token.trim().is_empty() && !token.eq_ignore_ascii_case("required") => {
                Ok(token)
            }
            _ => Err(SessionError::Authentication(format!(
                "{url} did not return a CSRF token"
            ))),
        }
    }

    async fn execute(&self, request: &AdtRequest) -> Result<AdtResponse> {
        let url = self.resolve_url(&request.path, &request.query)?;
        let mut builder = self
            .http
            .request(request.method.clone(), url.clone())
            .header(SESSION_TYPE_HEADER, "stateful");
        if let Some(token) = &self.csrf_token {
            builder = builder.header(CSRF_TOKEN_HEADER, token);
        }
        for (name, value) in &request.headers {
            let value = HeaderValue::from_str(value).map_err(|e| {
                SessionError::InvalidRequest(format!("invalid value for header {name}: {e}"))
            })?;
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            trace!("{} {url} body: {body}", request.method);
            builder = builder.body(body.clone());
        }

        debug!("{} {url}", request.method);
        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, headers, body))
        };
        let result = if request.cancellable {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                result = exchange => result,
            }
        } else {
            exchange.await
        };
        let (status, headers, body) = result.map_err(|e| self.classify(e, &request.method, &url))?;
        trace!("{} {url} -> {status}", request.method);

        Ok(AdtResponse {
            status,
            url: url.to_string(),
            headers,
            body,
        })
    }

    fn resolve_url(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let path = normalize_path(path);
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.into_owned()
        } else if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        };
        let mut url = Url::parse(&raw)
            .map_err(|e| SessionError::InvalidRequest(format!("invalid url {raw}: {e}")))?;

        let has_session_params = self.options.sap_client.is_some() || self.options.language.is_some();
        if has_session_params || !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            if let Some(client) = &self.options.sap_client {
                pairs.append_pair("sap-client", client);
            }
            if let Some(language) = &self.options.language {
                pairs.append_pair("sap-language", language);
            }
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn seed_cookies(&self, seed: &SessionSeed) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| SessionError::InvalidRequest(format!("invalid base url: {e}")))?;
        for cookie in &seed.cookies {
            self.jar
                .add_cookie_str(&format!("{}; Path=/", cookie.to_header_pair()), &url);
        }
        Ok(())
    }

    fn classify(&self, err: reqwest::Error, method: &Method, url: &Url) -> SessionError {
        if err.is_connect() || err.is_timeout() {
            let host = url.host_str().unwrap_or(&self.host).to_string();
            let detail = if err.is_timeout() {
                format!("request timed out after {:?}", self.options.request_timeout)
            } else {
                err.to_string()
            };
            SessionError::Connectivity { host, detail }
        } else {
            SessionError::Transport {
                method: method.clone(),
                url: url.to_string(),
                source: err,
            }
        }
    }
}

fn build_http(options: &SessionOptions) -> Result<(reqwest::Client, Arc<Jar>)> {
    let jar = Arc::new(Jar::default());
    let user_agent = options
        .user_agent
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
    let http = reqwest::Client::builder()
        .cookie_provider(jar.clone())
        .timeout(options.request_timeout)
        .user_agent(user_agent)
        .danger_accept_invalid_certs(options.danger_accept_invalid_certs)
        .build()
        .map_err(|e| SessionError::InvalidRequest(format!("failed to build http client: {e}")))?;
    Ok((http, jar))
}

fn with_parts(
    mut request: AdtRequest,
    body: Option<String>,
    headers: &[(HeaderName, &str)],
) -> AdtRequest {
    for (name, value) in headers {
        request = request.header(name.clone(), *value);
    }
    match body {
        Some(body) => request.body(body),
        None => request,
    }
}

fn protocol_error(request: &AdtRequest, response: AdtResponse) -> ProtocolError {
    ProtocolError::new(
        response.status,
        request.method.clone(),
        response.url,
        &response.body,
    )
}
