use adt_core::Config;
use adt_login::find_adt_home;

const EXIT_CODE_INVALID_CONFIG: i32 = 3;

pub(crate) fn validate_config(should_print: bool) {
    let adt_home = match find_adt_home() {
        Ok(home) => home,
        Err(err) => {
            eprintln!("Error locating ADT home: {err}");
            std::process::exit(EXIT_CODE_INVALID_CONFIG);
        }
    };

    match Config::load(&adt_home) {
        Ok(config) => {
            if should_print {
                for (key, value) in config_summary_entries(&config) {
                    println!("{key}: {value}");
                }
            }
        }
        Err(err) => {
            if should_print {
                eprintln!("Config validation error: {err}");
            }
            std::process::exit(EXIT_CODE_INVALID_CONFIG);
        }
    }
}

fn config_summary_entries(config: &Config) -> Vec<(String, String)> {
    let mut entries = vec![
        ("adt_home".to_string(), config.adt_home.display().to_string()),
        (
            "default_connection".to_string(),
            config
                .default_connection
                .clone()
                .unwrap_or_else(|| "<none>".to_string()),
        ),
    ];
    for (id, connection) in &config.connections {
        let mut target = connection.options.base_url.clone();
        if let Some(client) = &connection.options.sap_client {
            target.push_str(&format!(" (client {client})"));
        }
        entries.push((format!("connections.{id}"), target));
        entries.push((
            format!("connections.{id}.default_package"),
            connection.default_package.clone(),
        ));
    }
    entries.push((
        "lifecycle.lock_retry_delay_ms".to_string(),
        config.lifecycle.lock_retry_delay.as_millis().to_string(),
    ));
    entries.push((
        "lifecycle.activate".to_string(),
        config.lifecycle.activate.to_string(),
    ));
    entries.push((
        "object_types".to_string(),
        config.catalog.codes().collect::<Vec<_>>().join(", "),
    ));
    entries
}
