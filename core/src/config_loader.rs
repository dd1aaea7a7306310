use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::thread;

use toml::Value as TomlValue;

pub(crate) const CONFIG_TOML_FILE: &str = "config.toml";
const SYSTEM_CONFIG_PATH: &str = "/etc/opt/adt/config.toml";

/// Reads `$ADT_HOME/config.toml` and overlays the system-wide file on top.
/// Missing files are treated as empty tables.
pub(crate) fn load_config_as_toml(adt_home: &Path) -> io::Result<TomlValue> {
    load_layered(
        &adt_home.join(CONFIG_TOML_FILE),
        &PathBuf::from(SYSTEM_CONFIG_PATH),
    )
}

fn load_layered(user_config_path: &Path, system_config_path: &Path) -> io::Result<TomlValue> {
    thread::scope(|scope| {
        let user_handle = scope.spawn(|| read_config_from_path(user_config_path, true));
        let system_handle = scope.spawn(|| read_config_from_path(system_config_path, false));

        let user_config = join_config_result(user_handle, "user config.toml")?;
        let system_config = join_config_result(system_handle, SYSTEM_CONFIG_PATH)?;

        let mut merged = user_config.unwrap_or_else(default_empty_table);
        if let Some(overlay) = system_config {
            merge_toml_values(&mut merged, &overlay);
        }
        Ok(merged)
    })
}

fn default_empty_table() -> TomlValue {
    TomlValue::Table(Default::default())
}

fn join_config_result(
    handle: thread::ScopedJoinHandle<'_, io::Result<Option<TomlValue>>>,
    label: &str,
) -> io::Result<Option<TomlValue>> {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => {
            if let Some(msg) = panic.downcast_ref::<&str>() {
                tracing::error!("Configuration loader for {label} panicked: {msg}");
            } else if let Some(msg) = panic.downcast_ref::<String>() {
                tracing::error!("Configuration loader for {label} panicked: {msg}");
            } else {
                tracing::error!("Configuration loader for {label} panicked");
            }
            Err(io::Error::other(format!(
                "Failed to load {label} configuration"
            )))
        }
    }
}

fn read_config_from_path(path: &Path, log_missing_as_info: bool) -> io::Result<Option<TomlValue>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<TomlValue>(&contents) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::error!("Failed to parse {}: {err}", path.display());
                Err(io::Error::new(io::ErrorKind::InvalidData, err))
            }
        },
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            if log_missing_as_info {
                tracing::info!("{} not found, using defaults", path.display());
            } else {
                tracing::debug!("{} not found", path.display());
            }
            Ok(None)
        }
        Err(err) => {
            tracing::error!("Failed to read {}: {err}", path.display());
            Err(err)
        }
    }
}

/// Tables merge key by key; any other overlay value replaces the base.
fn merge_toml_values(base: &mut TomlValue, overlay: &TomlValue) {
    if let TomlValue::Table(overlay_table) = overlay
        && let TomlValue::Table(base_table) = base
    {
        for (key, value) in overlay_table {
            if let Some(existing) = base_table.get_mut(key) {
                merge_toml_values(existing, value);
            } else {
                base_table.insert(key.clone(), value.clone());
            }
        }
        return;
    }

    *base = overlay.clone();
}
