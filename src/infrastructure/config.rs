use crate::infrastructure::api_gateway::DEFAULT_API_BASE_URL;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const DEFAULT_REFERENCE_TIMEZONE: &str = "Europe/Madrid";
const DEFAULT_TICK_SECONDS: u64 = 30;
const DEFAULT_REFRESH_SECONDS: u64 = 30;
pub const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://ticktick.com/oauth/authorize";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://ticktick.com/oauth/token";
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Zone whose calendar date decides which remote tasks count as "today".
    pub reference_timezone: Tz,
    pub tick_interval: Duration,
    pub refresh_interval: Duration,
    pub api_base_url: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub redirect_uri: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            reference_timezone: chrono_tz::Europe::Madrid,
            tick_interval: Duration::from_secs(DEFAULT_TICK_SECONDS),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_SECONDS),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
        }
    }
}

fn default_app_config() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "referenceTimezone": DEFAULT_REFERENCE_TIMEZONE,
        "tickSeconds": DEFAULT_TICK_SECONDS,
        "refreshSeconds": DEFAULT_REFRESH_SECONDS,
        "apiBaseUrl": DEFAULT_API_BASE_URL,
        "authorizationEndpoint": DEFAULT_AUTHORIZATION_ENDPOINT,
        "tokenEndpoint": DEFAULT_TOKEN_ENDPOINT,
        "redirectUri": DEFAULT_REDIRECT_URI
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_config())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let defaults = AppConfig::default();

    let reference_timezone = match read_string(&app, "referenceTimezone") {
        Some(name) => name.parse::<Tz>().map_err(|_| {
            InfraError::InvalidConfig(format!("unknown referenceTimezone: {name}"))
        })?,
        None => defaults.reference_timezone,
    };

    Ok(AppConfig {
        reference_timezone,
        tick_interval: read_seconds(&app, "tickSeconds")?.unwrap_or(defaults.tick_interval),
        refresh_interval: read_seconds(&app, "refreshSeconds")?
            .unwrap_or(defaults.refresh_interval),
        api_base_url: read_string(&app, "apiBaseUrl").unwrap_or(defaults.api_base_url),
        authorization_endpoint: read_string(&app, "authorizationEndpoint")
            .unwrap_or(defaults.authorization_endpoint),
        token_endpoint: read_string(&app, "tokenEndpoint").unwrap_or(defaults.token_endpoint),
        redirect_uri: read_string(&app, "redirectUri").unwrap_or(defaults.redirect_uri),
    })
}

fn read_string(config: &serde_json::Value, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn read_seconds(config: &serde_json::Value, key: &str) -> Result<Option<Duration>, InfraError> {
    let Some(value) = config.get(key).filter(|value| !value.is_null()) else {
        return Ok(None);
    };
    match value.as_u64() {
        Some(seconds) if seconds > 0 => Ok(Some(Duration::from_secs(seconds))),
        _ => Err(InfraError::InvalidConfig(format!(
            "{key} must be a positive number of seconds"
        ))),
    }
}
