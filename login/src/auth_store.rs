use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::fs::OpenOptions;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;

use crate::credentials::Credentials;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
pub struct AuthDotJson {
    #[serde(default)]
    pub connections: BTreeMap<String, StoredConnection>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct StoredConnection {
    #[serde(flatten)]
    pub credentials: Credentials,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

pub fn get_auth_file(adt_home: &Path) -> PathBuf {
    adt_home.join("auth.json")
}

/// Remove the stored credentials for `connection_id`. Returns `Ok(true)` if
/// an entry was removed. The file itself is deleted once no connection is
/// left in it.
pub fn logout(adt_home: &Path, connection_id: &str) -> std::io::Result<bool> {
    let auth_file = get_auth_file(adt_home);
    let mut auth = match try_read_auth_json(&auth_file) {
        Ok(auth) => auth,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if auth.connections.remove(connection_id).is_none() {
        return Ok(false);
    }
    if auth.connections.is_empty() {
        match std::fs::remove_file(&auth_file) {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    } else {
        write_auth_json(&auth_file, &auth)?;
    }
    Ok(true)
}

/// Attempt to read and deserialize the `auth.json` file at the given path.
pub fn try_read_auth_json(auth_file: &Path) -> std::io::Result<AuthDotJson> {
    let mut file = File::open(auth_file)?;
    let mut contents = String::new();
    use std::io::Read as _;
    file.read_to_string(&mut contents)?;
    let auth_dot_json: AuthDotJson = serde_json::from_str(&contents)?;
    Ok(auth_dot_json)
}

pub(crate) fn write_auth_json(
    auth_file: &Path,
    auth_dot_json: &AuthDotJson,
) -> std::io::Result<()> {
    if let Some(parent) = auth_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json_data = serde_json::to_string_pretty(auth_dot_json)?;
    let mut options = OpenOptions::new();
    options.truncate(true).write(true).create(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = options.open(auth_file)?;
    use std::io::Write as _;
    file.write_all(json_data.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Store `credentials` for `connection_id`, replacing any previous entry and
/// keeping the other connections untouched.
pub fn save_credentials(
    adt_home: &Path,
    connection_id: &str,
    credentials: Credentials,
) -> std::io::Result<()> {
    let auth_file = get_auth_file(adt_home);
    let mut auth = match try_read_auth_json(&auth_file) {
        Ok(auth) => auth,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => AuthDotJson::default(),
        Err(err) => return Err(err),
    };
    auth.connections.insert(
        connection_id.to_string(),
        StoredConnection {
            credentials,
            last_login: Some(Utc::now()),
        },
    );
    write_auth_json(&auth_file, &auth)
}

pub fn load_credentials(
    adt_home: &Path,
    connection_id: &str,
) -> std::io::Result<Option<Credentials>> {
    match try_read_auth_json(&get_auth_file(adt_home)) {
        Ok(mut auth) => Ok(auth
            .connections
            .remove(connection_id)
            .map(|stored| stored.credentials)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
