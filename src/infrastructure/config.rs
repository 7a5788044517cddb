use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

const CLIENT_JSON: &str = "client.json";
const DEFAULT_API_BASE_URL: &str = "http://localhost:5170/api/";
const DEFAULT_REFRESH_CHECK_SECONDS: u64 = 60;
const DEFAULT_EXPIRY_HORIZON_SECONDS: u64 = 5 * 60;
const DEFAULT_TOKEN_KEY: &str = "token";
const DEFAULT_CREDENTIAL_SERVICE: &str = "worknest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: Url,
    pub refresh_check_interval: Duration,
    pub expiry_horizon: Duration,
    pub token_key: String,
    pub credential_service: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_base_url(),
            refresh_check_interval: Duration::from_secs(DEFAULT_REFRESH_CHECK_SECONDS),
            expiry_horizon: Duration::from_secs(DEFAULT_EXPIRY_HORIZON_SECONDS),
            token_key: DEFAULT_TOKEN_KEY.to_string(),
            credential_service: DEFAULT_CREDENTIAL_SERVICE.to_string(),
        }
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_API_BASE_URL).expect("valid fixed api base url")
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientConfigFile {
    schema: u8,
    api_base_url: Option<String>,
    refresh_check_seconds: Option<u64>,
    expiry_horizon_seconds: Option<u64>,
    token_key: Option<String>,
    credential_service: Option<String>,
}

/// Parses a base URL, forcing a trailing slash so relative joins keep the
/// `/api` prefix.
pub fn parse_base_url(raw: &str) -> Result<Url, InfraError> {
    let raw = raw.trim();
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    let url = Url::parse(&normalized)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid api base url '{raw}': {error}")))?;
    if url.cannot_be_a_base() {
        return Err(InfraError::InvalidConfig(format!(
            "api base url '{raw}' cannot be a base"
        )));
    }
    Ok(url)
}

pub fn ensure_default_config(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(CLIENT_JSON);
    if !path.exists() {
        fs::create_dir_all(config_dir)?;
        let value = serde_json::json!({
            "schema": 1,
            "apiBaseUrl": DEFAULT_API_BASE_URL,
            "refreshCheckSeconds": DEFAULT_REFRESH_CHECK_SECONDS,
            "expiryHorizonSeconds": DEFAULT_EXPIRY_HORIZON_SECONDS
        });
        let formatted = serde_json::to_string_pretty(&value)?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<ClientConfigFile, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: ClientConfigFile = serde_json::from_str(&raw)?;
    if parsed.schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            parsed.schema,
            path.display()
        )));
    }
    Ok(parsed)
}

/// Defaults, then `client.json` in `config_dir` when it exists, then
/// environment overrides.
pub fn load_config(config_dir: Option<&Path>) -> Result<ClientConfig, InfraError> {
    let mut config = ClientConfig::default();
    if let Some(config_dir) = config_dir {
        let path = config_dir.join(CLIENT_JSON);
        if path.exists() {
            apply_file(&mut config, read_config_file(&path)?)?;
        }
    }
    apply_lookup(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

fn apply_file(config: &mut ClientConfig, file: ClientConfigFile) -> Result<(), InfraError> {
    if let Some(raw) = file.api_base_url.as_deref() {
        config.api_base_url = parse_base_url(raw)?;
    }
    if let Some(seconds) = file.refresh_check_seconds {
        config.refresh_check_interval = positive_seconds(seconds, "refreshCheckSeconds")?;
    }
    if let Some(seconds) = file.expiry_horizon_seconds {
        config.expiry_horizon = Duration::from_secs(seconds);
    }
    if let Some(key) = normalized(file.token_key) {
        config.token_key = key;
    }
    if let Some(service) = normalized(file.credential_service) {
        config.credential_service = service;
    }
    Ok(())
}

pub fn apply_lookup<F>(config: &mut ClientConfig, lookup: F) -> Result<(), InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup_value(&lookup, "WORKNEST_API_BASE_URL") {
        config.api_base_url = parse_base_url(&raw)?;
    }
    if let Some(raw) = lookup_value(&lookup, "WORKNEST_REFRESH_CHECK_SECONDS") {
        let seconds = parse_seconds(&raw, "WORKNEST_REFRESH_CHECK_SECONDS")?;
        config.refresh_check_interval = positive_seconds(seconds, "WORKNEST_REFRESH_CHECK_SECONDS")?;
    }
    if let Some(raw) = lookup_value(&lookup, "WORKNEST_EXPIRY_HORIZON_SECONDS") {
        config.expiry_horizon =
            Duration::from_secs(parse_seconds(&raw, "WORKNEST_EXPIRY_HORIZON_SECONDS")?);
    }
    if let Some(key) = lookup_value(&lookup, "WORKNEST_TOKEN_KEY") {
        config.token_key = key;
    }
    Ok(())
}

fn lookup_value<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    normalized(lookup(key))
}

fn normalized(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_seconds(raw: &str, field_name: &str) -> Result<u64, InfraError> {
    raw.parse::<u64>().map_err(|_| {
        InfraError::InvalidConfig(format!("{field_name} must be a whole number of seconds"))
    })
}

fn positive_seconds(seconds: u64, field_name: &str) -> Result<Duration, InfraError> {
    if seconds == 0 {
        return Err(InfraError::InvalidConfig(format!(
            "{field_name} must be greater than zero"
        )));
    }
    Ok(Duration::from_secs(seconds))
}
