use std::time::Duration;

use adt_backend_client::AdtRequest;
use adt_backend_client::Session;
use adt_backend_client::SessionError;
use adt_backend_client::StatusCode;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::LifecycleOptions;
use crate::decoders::ActivationMessage;
use crate::decoders::ActivationResult;
use crate::decoders::LockHandle;
use crate::decoders::LockResult;
use crate::decoders::SearchHit;
use crate::decoders::parse_activation_result;
use crate::decoders::parse_exception;
use crate::decoders::parse_lock_result;
use crate::decoders::parse_search_results;
use crate::decoders::parse_source_uri;
use crate::error::AdtErr;
use crate::error::Result;
use crate::object_types::ADTCORE_NAMESPACE;
use crate::object_types::CreationParams;
use crate::object_types::ObjectCatalog;
use crate::object_types::ObjectReference;
use crate::object_types::ObjectTypeSpec;
use crate::xml::escape;

pub const SEARCH_PATH: &str = "/sap/bc/adt/repository/informationsystem/search";
pub const ACTIVATION_PATH: &str = "/sap/bc/adt/activation";

const LOCK_ACCEPT: &str =
    "application/*,application/vnd.sap.as+xml;charset=UTF-8;dataname=com.sap.adt.lock.result";
const SOURCE_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// One write of an object's main source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub object_type: String,
    pub name: String,
    pub source: String,
    /// Package new objects are created in.
    pub package: String,
    pub transport: Option<String>,
    /// Description of a newly created object. Defaults to the name.
    pub description: Option<String>,
}

/// Activation failed after the write itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationWarning {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ActivationMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub created: bool,
    pub object_url: String,
    pub source_url: String,
    pub activated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_error: Option<ActivationWarning>,
}

/// Drives the search → create → lock → write → unlock → activate sequence
/// against one session.
pub struct ObjectLifecycle<'a> {
    session: &'a mut Session,
    catalog: &'a ObjectCatalog,
    options: LifecycleOptions,
}

impl<'a> ObjectLifecycle<'a> {
    pub fn new(
        session: &'a mut Session,
        catalog: &'a ObjectCatalog,
        options: LifecycleOptions,
    ) -> Self {
        Self {
            session,
            catalog,
            options,
        }
    }

    pub fn catalog(&self) -> &'a ObjectCatalog {
        self.catalog
    }

    pub(crate) fn session(&mut self) -> &mut Session {
        self.session
    }

    /// Writes `request.source` as the main source of the object, creating
    /// the object first when it does not exist.
    ///
    /// The object is never left locked: every lock taken here is released
    /// before this returns, whatever the outcome of the write. Activation is
    /// best-effort and reported in the outcome rather than as an error.
    pub async fn write_object(&mut self, request: &WriteRequest) -> Result<WriteOutcome> {
        let catalog = self.catalog;
        let (spec, reference) = catalog.require(&request.object_type, &request.name)?;

        let (created, object_url) = match self.find_object(spec, &request.name).await {
            Some(url) => {
                debug!("{} {} exists at {url}", spec.code, request.name);
                (false, url)
            }
            None => self.create_object(spec, &reference, request).await?,
        };

        let source_url = self.resolve_source_url(spec, &object_url).await?;
        self.write_source_with_retry(
            &object_url,
            &source_url,
            &request.source,
            request.transport.as_deref(),
        )
        .await?;
        info!(
            "wrote {} {} ({} bytes)",
            spec.code,
            request.name,
            request.source.len()
        );

        let mut outcome = WriteOutcome {
            created,
            object_url: object_url.clone(),
            source_url,
            activated: false,
            activation_error: None,
        };
        if !self.options.activate {
            return Ok(outcome);
        }

        let written = ObjectReference {
            object_url,
            ..reference
        };
        match self.activate(&written).await {
            Ok(result) if result.success => outcome.activated = true,
            Ok(result) => {
                warn!("activation of {} failed: {}", written.name, result.error_summary());
                outcome.activation_error = Some(ActivationWarning {
                    message: result.error_summary(),
                    messages: result.messages,
                });
            }
            Err(err) => {
                warn!("activation of {} failed: {err}", written.name);
                outcome.activation_error = Some(ActivationWarning {
                    message: err.to_string(),
                    messages: Vec::new(),
                });
            }
        }
        Ok(outcome)
    }

    /// Repository quick search. `object_type` narrows the search to one
    /// catalog type.
    pub async fn search(
        &mut self,
        query: &str,
        object_type: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let search_type = match object_type {
            Some(code) => Some(
                self.catalog
                    .get(code)
                    .ok_or_else(|| AdtErr::UnsupportedObjectType(code.to_string()))?
                    .search_type()
                    .to_string(),
            ),
            None => None,
        };
        self.quick_search(query, search_type.as_deref()).await
    }

    async fn quick_search(
        &mut self,
        query: &str,
        search_type: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let mut request = AdtRequest::get(SEARCH_PATH)
            .query("operation", "quickSearch")
            .query("query", query)
            .query("maxResults", self.options.search_max_results.to_string())
            .accept("application/xml");
        if let Some(search_type) = search_type {
            request = request.query("objectType", search_type);
        }
        let response = self.session.send(request).await?;
        Ok(parse_search_results(&response.body))
    }

    /// URL of the object named exactly `name` (case-insensitive), if any.
    /// Search failures count as "not found".
    async fn find_object(&mut self, spec: &ObjectTypeSpec, name: &str) -> Option<String> {
        let hits = match self.quick_search(name, Some(spec.search_type())).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(
                    "search for {} {name} failed, assuming it does not exist: {err}",
                    spec.code
                );
                return None;
            }
        };
        hits.into_iter()
            .find(|hit| {
                hit.name.eq_ignore_ascii_case(name)
                    && (hit.object_type.is_empty()
                        || hit.object_type.eq_ignore_ascii_case(&spec.code))
            })
            .map(|hit| hit.uri)
    }

    /// Returns `(created, object_url)`.
    async fn create_object(
        &mut self,
        spec: &ObjectTypeSpec,
        reference: &ObjectReference,
        request: &WriteRequest,
    ) -> Result<(bool, String)> {
        let envelope = spec.render_creation(&CreationParams {
            name: &request.name,
            description: request.description.as_deref().unwrap_or(&request.name),
            package: &request.package,
            responsible: self.options.responsible.as_deref(),
            master_language: self.options.master_language.as_deref(),
        });
        let mut create = AdtRequest::post(spec.collection.clone())
            .content_type(spec.content_type.clone())
            .accept("application/*")
            .body(envelope);
        if let Some(transport) = &request.transport {
            create = create.query("corrNr", transport.clone());
        }

        let err = match self.session.send(create).await {
            Ok(_) => {
                info!("created {} {} in {}", spec.code, request.name, request.package);
                return Ok((true, reference.object_url.clone()));
            }
            Err(SessionError::Cancelled) => return Err(SessionError::Cancelled.into()),
            Err(err) => err,
        };

        if already_exists(&err) {
            info!("{} {} already exists; writing to it", spec.code, request.name);
            return Ok((false, reference.object_url.clone()));
        }
        if err.status() == Some(StatusCode::INTERNAL_SERVER_ERROR) {
            debug!(
                "create returned 500; searching once to see whether {} exists",
                request.name
            );
            if let Some(url) = self.find_object(spec, &request.name).await {
                info!("{} {} exists after ambiguous create failure", spec.code, request.name);
                return Ok((false, url));
            }
        }
        Err(AdtErr::Create {
            object_type: spec.code.clone(),
            name: request.name.clone(),
            source: err,
        })
    }

    /// Source URL advertised by the object structure when it points inside
    /// the object, else the type's fixed suffix.
    async fn resolve_source_url(
        &mut self,
        spec: &ObjectTypeSpec,
        object_url: &str,
    ) -> Result<String> {
        let fallback = format!("{object_url}{}", spec.source_suffix);
        let structure =
            AdtRequest::get(object_url).accept(format!("{}, application/*", spec.content_type));
        match self.session.send(structure).await {
            Ok(response) => Ok(parse_source_uri(&response.body)
                .and_then(|uri| source_url_within(object_url, &uri))
                .unwrap_or(fallback)),
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND) => {
                Err(AdtErr::NotFoundAfterCreate {
                    object_url: object_url.to_string(),
                })
            }
            Err(SessionError::Cancelled) => Err(SessionError::Cancelled.into()),
            Err(err) => {
                debug!("structure of {object_url} unavailable ({err}); using {fallback}");
                Ok(fallback)
            }
        }
    }

    async fn write_source_with_retry(
        &mut self,
        object_url: &str,
        source_url: &str,
        source: &str,
        transport: Option<&str>,
    ) -> Result<()> {
        let attempts = self.options.lock_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.write_once(object_url, source_url, source, transport).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_locked() && attempt < attempts => {
                    warn!(
                        "{object_url} is locked (attempt {attempt}/{attempts}); retrying in {:?}",
                        self.options.lock_retry_delay
                    );
                    self.pause(self.options.lock_retry_delay).await?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One lock → write → unlock unit. Unlock runs whenever the lock was
    /// taken.
    async fn write_once(
        &mut self,
        object_url: &str,
        source_url: &str,
        source: &str,
        transport: Option<&str>,
    ) -> Result<()> {
        let LockResult {
            handle,
            transport: lock_transport,
            ..
        } = self.lock(object_url).await?;
        let transport = transport.map(str::to_string).or(lock_transport);

        let mut put = AdtRequest::put(source_url)
            .query("lockHandle", handle.as_str())
            .content_type(SOURCE_CONTENT_TYPE)
            .body(source);
        if let Some(transport) = transport {
            put = put.query("corrNr", transport);
        }
        let written = self.session.send(put).await.map_err(|source| AdtErr::Write {
            source_url: source_url.to_string(),
            source,
        });

        self.unlock(object_url, handle).await;
        written.map(|_| ())
    }

    pub(crate) async fn lock(&mut self, object_url: &str) -> Result<LockResult> {
        let request = AdtRequest::post(object_url)
            .query("_action", "LOCK")
            .query("accessMode", "MODIFY")
            .accept(LOCK_ACCEPT);
        let response = self.session.send(request).await?;
        parse_lock_result(&response.body).map_err(|source| AdtErr::LockAcquisition {
            object_url: object_url.to_string(),
            source,
        })
    }

    /// Releases `handle`. Failures are logged: the backend drops stale locks
    /// with the session.
    pub(crate) async fn unlock(&mut self, object_url: &str, handle: LockHandle) {
        let request = AdtRequest::post(object_url)
            .query("_action", "UNLOCK")
            .query("lockHandle", handle.as_str())
            .uncancellable();
        if let Err(err) = self.session.send(request).await {
            warn!("failed to unlock {object_url}: {err}");
        }
    }

    async fn pause(&self, delay: Duration) -> Result<()> {
        let cancel = self.session.cancellation_token();
        tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Cancelled.into()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Activates one object. A non-success result is returned, not raised.
    pub async fn activate(&mut self, reference: &ObjectReference) -> Result<ActivationResult> {
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<adtcore:objectReferences xmlns:adtcore=\"{ADTCORE_NAMESPACE}\">\n  <adtcore:objectReference adtcore:uri=\"{}\" adtcore:name=\"{}\"/>\n</adtcore:objectReferences>\n",
            escape(&reference.object_url),
            escape(&reference.name.to_uppercase()),
        );
        let request = AdtRequest::post(ACTIVATION_PATH)
            .query("method", "activate")
            .query("preauditRequested", "true")
            .content_type("application/xml")
            .accept("application/xml")
            .body(body);
        let response = self.session.send(request).await?;
        let result = parse_activation_result(&response.body);
        if result.success {
            info!("activated {}", reference.name);
        }
        Ok(result)
    }

    /// Activates an object addressed by type and name.
    pub async fn activate_object(
        &mut self,
        object_type: &str,
        name: &str,
    ) -> Result<ActivationResult> {
        let (_, reference) = self.catalog.require(object_type, name)?;
        self.activate(&reference).await
    }

    pub async fn read_source(&mut self, object_type: &str, name: &str) -> Result<String> {
        let catalog = self.catalog;
        let (spec, reference) = catalog.require(object_type, name)?;
        let request = AdtRequest::get(reference.source_url.clone()).accept("text/plain");
        match self.session.send(request).await {
            Ok(response) => Ok(response.body),
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND) => Err(AdtErr::NotFound {
                object_type: spec.code.clone(),
                name: name.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes an object. The lock is released only when the delete fails;
    /// a deleted object takes its lock with it.
    pub async fn delete_object(
        &mut self,
        object_type: &str,
        name: &str,
        transport: Option<&str>,
    ) -> Result<()> {
        let catalog = self.catalog;
        let (spec, reference) = catalog.require(object_type, name)?;
        let LockResult {
            handle,
            transport: lock_transport,
            ..
        } = match self.lock(&reference.object_url).await {
            Ok(lock) => lock,
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND) => {
                return Err(AdtErr::NotFound {
                    object_type: spec.code.clone(),
                    name: name.to_string(),
                });
            }
            Err(err) => return Err(err),
        };

        let mut delete =
            AdtRequest::delete(reference.object_url.clone()).query("lockHandle", handle.as_str());
        if let Some(transport) = transport.map(str::to_string).or(lock_transport) {
            delete = delete.query("corrNr", transport);
        }
        match self.session.send(delete).await {
            Ok(_) => {
                info!("deleted {} {name}", spec.code);
                Ok(())
            }
            Err(err) => {
                self.unlock(&reference.object_url, handle).await;
                Err(err.into())
            }
        }
    }
}

/// A failed create that means "the object is already there".
fn already_exists(err: &SessionError) -> bool {
    let Some(protocol) = err.as_protocol() else {
        return false;
    };
    if protocol.status == StatusCode::CONFLICT {
        return true;
    }
    match parse_exception(&protocol.body) {
        Some(exception) => exception.is_already_exists(),
        None => protocol.body.to_ascii_lowercase().contains("already exist"),
    }
}

/// Accepts `uri` only when it stays inside `object_url`: a relative
/// `source/...` path, or an absolute path below the object.
fn source_url_within(object_url: &str, uri: &str) -> Option<String> {
    let object_url = object_url.trim_end_matches('/');
    let relative = uri.strip_prefix("./").unwrap_or(uri);
    if relative.starts_with("source/") {
        return Some(format!("{object_url}/{relative}"));
    }
    let prefix = format!("{object_url}/");
    match uri.get(..prefix.len()) {
        Some(head) if uri.len() > prefix.len() && head.eq_ignore_ascii_case(&prefix) => {
            Some(uri.to_string())
        }
        _ => None,
    }
}
