//! Pure functions turning raw response bodies into typed results.

use serde::Serialize;

use crate::error::DecodeError;
use crate::xml;

/// Exclusive edit session on one object. Not `Clone`: the unlock that
/// releases it takes it by value.
#[derive(Debug, PartialEq, Eq)]
pub struct LockHandle(String);

impl LockHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct LockResult {
    pub handle: LockHandle,
    /// Transport request the object is already recorded on, if any.
    pub transport: Option<String>,
    /// Object belongs to a local package and needs no transport.
    pub is_local: bool,
}

pub fn parse_lock_result(body: &str) -> Result<LockResult, DecodeError> {
    let handle = xml::first_text(body, "LOCK_HANDLE").ok_or(DecodeError::MissingField {
        response: "lock",
        field: "LOCK_HANDLE",
    })?;
    Ok(LockResult {
        handle: LockHandle(handle),
        transport: xml::first_text(body, "CORRNR"),
        is_local: xml::first_text(body, "IS_LOCAL").is_some_and(|flag| flag == "X"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub uri: String,
    pub object_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

pub fn parse_search_results(body: &str) -> Vec<SearchHit> {
    xml::elements(body, "objectReference")
        .into_iter()
        .filter_map(|el| {
            Some(SearchHit {
                uri: el.attr("uri")?,
                object_type: el.attr("type").unwrap_or_default(),
                name: el.attr("name")?,
                package: el.attr("packageName").filter(|p| !p.is_empty()),
                description: el.attr("description").filter(|d| !d.is_empty()),
            })
        })
        .collect()
}

const SOURCE_RELATION: &str = "http://www.sap.com/adt/relations/source";

/// Source URI advertised by an object structure document: the first
/// `sourceUri` attribute (the main include), else the first link with the
/// source relation.
pub fn parse_source_uri(body: &str) -> Option<String> {
    xml::find_attribute(body, "sourceUri").or_else(|| {
        xml::elements(body, "link").into_iter().find_map(|link| {
            let rel = link.attr("rel")?;
            if rel == SOURCE_RELATION {
                link.attr("href")
            } else {
                None
            }
        })
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Maps the backend's one-letter message type. `A` (abort) and `X`
    /// (exit) are errors.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "E" | "A" | "X" => Severity::Error,
            "W" => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationMessage {
    pub severity: Severity,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationResult {
    pub success: bool,
    pub messages: Vec<ActivationMessage>,
    /// Objects the backend still reports as inactive after the run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inactive_objects: Vec<String>,
}

impl ActivationResult {
    pub fn errors(&self) -> impl Iterator<Item = &ActivationMessage> {
        self.messages
            .iter()
            .filter(|m| m.severity == Severity::Error)
    }

    /// Error texts joined for display, or a generic note when the backend
    /// failed without saying why.
    pub fn error_summary(&self) -> String {
        let texts: Vec<&str> = self.errors().map(|m| m.text.as_str()).collect();
        if texts.is_empty() {
            "activation failed".to_string()
        } else {
            texts.join("; ")
        }
    }
}

/// An empty body means the activation ran without messages.
pub fn parse_activation_result(body: &str) -> ActivationResult {
    let messages: Vec<ActivationMessage> = xml::elements(body, "msg")
        .into_iter()
        .map(|el| {
            let text = el
                .children("txt")
                .into_iter()
                .filter_map(|t| t.text())
                .find(|t| !t.is_empty())
                .or_else(|| el.attr("shortText"))
                .unwrap_or_default();
            ActivationMessage {
                severity: Severity::from_code(&el.attr("type").unwrap_or_default()),
                text,
                object: el.attr("objDescr").filter(|o| !o.is_empty()),
                href: el.attr("href").filter(|h| !h.is_empty()),
            }
        })
        .collect();
    let inactive_objects = xml::elements(body, "entry")
        .into_iter()
        .flat_map(|entry| entry.children("object"))
        .filter_map(|object| {
            object
                .children("ref")
                .into_iter()
                .next()
                .and_then(|r| r.attr("uri"))
        })
        .collect();
    let success = !messages.iter().any(|m| m.severity == Severity::Error);
    ActivationResult {
        success,
        messages,
        inactive_objects,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendException {
    pub exception_type: Option<String>,
    pub message: Option<String>,
}

impl BackendException {
    /// The backend's standard phrasing is "does already exist", so the match
    /// is on the shared stem.
    pub fn is_already_exists(&self) -> bool {
        self.exception_type.as_deref() == Some("ExceptionResourceAlreadyExists")
            || self
                .message
                .as_deref()
                .is_some_and(|m| m.to_ascii_lowercase().contains("already exist"))
    }
}

/// Parses an `exc:exception` document. Returns `None` for bodies that are
/// not exception documents.
pub fn parse_exception(body: &str) -> Option<BackendException> {
    let exception = xml::first(body, "exception")?;
    let inner = exception.inner().unwrap_or_default();
    let exception_type = xml::first(inner, "type").and_then(|t| t.attr("id"));
    let message = xml::first_text(inner, "message")
        .or_else(|| xml::first_text(inner, "localizedMessage"));
    Some(BackendException {
        exception_type,
        message,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckMessage {
    pub severity: Severity,
    pub text: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

pub fn parse_check_messages(body: &str) -> Vec<CheckMessage> {
    xml::elements(body, "checkMessage")
        .into_iter()
        .map(|el| {
            let uri = el.attr("uri").unwrap_or_default();
            let (line, column) = source_position(&uri);
            CheckMessage {
                severity: Severity::from_code(&el.attr("type").unwrap_or_default()),
                text: el.attr("shortText").unwrap_or_default(),
                uri,
                line,
                column,
            }
        })
        .collect()
}

/// Reads `#start=<line>,<column>` from a source fragment URI.
fn source_position(uri: &str) -> (Option<u32>, Option<u32>) {
    let Some((_, fragment)) = uri.split_once('#') else {
        return (None, None);
    };
    let Some(start) = fragment
        .split(';')
        .find_map(|part| part.strip_prefix("start="))
    else {
        return (None, None);
    };
    let mut parts = start.split(',');
    let line = parts.next().and_then(|l| l.trim().parse().ok());
    let column = parts.next().and_then(|c| c.trim().parse().ok());
    (line, column)
}

/// The worklist endpoint answers with the bare id as plain text.
pub fn parse_worklist_id(body: &str) -> Result<String, DecodeError> {
    let id = body.trim();
    if id.is_empty() || id.contains('<') {
        return Err(DecodeError::MissingField {
            response: "ATC worklist",
            field: "worklist id",
        });
    }
    Ok(id.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtcFinding {
    pub object_name: String,
    pub check_title: String,
    pub message: String,
    pub priority: u8,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

pub fn parse_atc_findings(body: &str) -> Vec<AtcFinding> {
    xml::elements(body, "object")
        .into_iter()
        .flat_map(|object| {
            let object_name = object.attr("name").unwrap_or_default();
            object
                .children("finding")
                .into_iter()
                .map(move |finding| {
                    let location = finding.attr("location").unwrap_or_default();
                    let (line, _) = source_position(&location);
                    AtcFinding {
                        object_name: object_name.clone(),
                        check_title: finding.attr("checkTitle").unwrap_or_default(),
                        message: finding.attr("messageTitle").unwrap_or_default(),
                        priority: finding
                            .attr("priority")
                            .and_then(|p| p.trim().parse().ok())
                            .unwrap_or(0),
                        location,
                        line,
                    }
                })
        })
        .collect()
}
