use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Username/password pair sent as HTTP Basic auth on token discovery.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse a `Cookie:` request header value (`a=1; b=2`). Pairs without a
    /// `=` or with an empty name are skipped.
    pub fn parse_header(header: &str) -> Vec<SessionCookie> {
        header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some(SessionCookie::new(name, value.trim()))
            })
            .collect()
    }

    pub fn to_header_pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCookie")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// A session that was established elsewhere (for example by the host IDE)
/// and is handed over as cookies plus, optionally, the CSRF token that goes
/// with them.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSeed {
    #[serde(default)]
    pub cookies: Vec<SessionCookie>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

impl fmt::Debug for SessionSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSeed")
            .field("cookies", &self.cookies)
            .field(
                "csrf_token",
                &self.csrf_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Everything the session client may use to authenticate.
///
/// `session` wins when present; `basic` is then only the fallback used when
/// the seeded cookies turn out to be expired.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSeed>,
}

impl Credentials {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            basic: Some(BasicCredentials::new(username, password)),
            session: None,
        }
    }

    pub fn pre_authenticated(seed: SessionSeed) -> Self {
        Self {
            basic: None,
            session: Some(seed),
        }
    }

    pub fn with_fallback(mut self, basic: BasicCredentials) -> Self {
        self.basic = Some(basic);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.basic.is_none()
            && self
                .session
                .as_ref()
                .is_none_or(|s| s.cookies.is_empty() && s.csrf_token.is_none())
    }
}
