use adt_backend_client::CancellationToken;
use adt_backend_client::Session;
use adt_login::CredentialResolver;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::AdtErr;
use crate::error::Result;

/// Builds an unauthenticated session for `connection`. Login happens on the
/// first request.
pub fn open_session(
    connection: &ConnectionConfig,
    resolver: &dyn CredentialResolver,
    cancel: CancellationToken,
) -> Result<Session> {
    let credentials = resolver
        .try_resolve(&connection.id)
        .ok_or_else(|| AdtErr::MissingCredentials(connection.id.clone()))?;
    debug!(
        "opening session for {} at {}",
        connection.id, connection.options.base_url
    );
    let session = Session::new(connection.options.clone(), credentials)?.with_cancellation(cancel);
    Ok(session)
}
