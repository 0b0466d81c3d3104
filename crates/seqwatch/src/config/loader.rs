use std::path::{Path, PathBuf};

use crate::config::schema::ClientConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Environment variable that overrides `apiUrl`.
pub const API_URL_ENV: &str = "SEQWATCH_API_URL";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ClientConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ClientConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: ClientConfig = serde_json::from_value(json_value)?;
    apply_env_overrides(&mut config);

    validate_config(&config)?;

    Ok(config)
}

/// Loads `path` if given, else the default location if present, else defaults.
pub fn load_config_or_default(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    if let Some(path) = path {
        return load_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            log::debug!("Loading config from {:?}", path);
            load_config(&path)
        }
        _ => {
            log::debug!("No config file found, using defaults");
            let mut config = ClientConfig::default();
            apply_env_overrides(&mut config);
            validate_config(&config)?;
            Ok(config)
        }
    }
}

/// `<config dir>/seqwatch/config.json` for the current platform.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("seqwatch").join("config.json"))
}

fn apply_env_overrides(config: &mut ClientConfig) {
    if let Ok(url) = std::env::var(API_URL_ENV) {
        if !url.trim().is_empty() {
            config.api_url = url.trim().to_string();
        }
    }
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let url = config.api_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::InvalidUrl {
            url: config.api_url.clone(),
            reason: "must start with http:// or https://".to_string(),
        });
    }

    if config.page_size == 0 || config.page_size > 100 {
        return Err(ConfigError::Validation {
            message: format!("pageSize must be between 1 and 100, got {}", config.page_size),
        });
    }

    let intervals = [
        ("polling.fastMs", config.polling.fast_ms),
        ("polling.mediumMs", config.polling.medium_ms),
        ("polling.slowMs", config.polling.slow_ms),
        ("polling.taskStatusMs", config.polling.task_status_ms),
        ("stream.reconnectDelayMs", config.stream.reconnect_delay_ms),
        ("health.intervalMs", config.health.interval_ms),
        ("http.connectTimeoutMs", config.http.connect_timeout_ms),
        ("http.requestTimeoutMs", config.http.request_timeout_ms),
    ];
    for (name, value) in intervals {
        if value == 0 {
            return Err(ConfigError::InvalidInterval {
                name: name.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
    }

    let p = &config.polling;
    if !(p.fast_ms <= p.medium_ms && p.medium_ms <= p.slow_ms) {
        return Err(ConfigError::InvalidInterval {
            name: "polling".to_string(),
            reason: format!(
                "tiers must satisfy fastMs <= mediumMs <= slowMs (got {}, {}, {})",
                p.fast_ms, p.medium_ms, p.slow_ms
            ),
        });
    }

    Ok(())
}
