/*
 * Responsibility
 * - 環境変数の読み込み (ポート, キャッシュ, TTL, 更新間隔など)
 * - AUTHORIZER_CONFIG_PATH の secret ServiceConfig の読み込み
 * - 設定値のバリデーション (不足なら起動失敗)
 */
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
    Secret(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
            ConfigError::Secret(reason) => write!(f, "unreadable secret configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Identity-provider settings delivered as a secret JSON blob.
///
/// Loaded once at cold start and shared read-only afterwards.
#[derive(Clone, Deserialize)]
pub struct ServiceConfig {
    pub jwks_uri: String,
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    // Expected in the `aud` claim of incoming tokens
    pub token_audience: String,
    // Requested when exchanging client credentials for the service token
    pub client_audience: String,
    pub grant_type: String,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print the client secret
        f.debug_struct("ServiceConfig")
            .field("jwks_uri", &self.jwks_uri)
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("token_audience", &self.token_audience)
            .field("client_audience", &self.client_audience)
            .field("grant_type", &self.grant_type)
            .finish()
    }
}

impl ServiceConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig =
            serde_json::from_str(raw).map_err(|e| ConfigError::Secret(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Secret(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("jwks_uri", &self.jwks_uri),
            ("issuer", &self.issuer),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("token_audience", &self.token_audience),
            ("client_audience", &self.client_audience),
            ("grant_type", &self.grant_type),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(key));
            }
        }
        Ok(())
    }
}

pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    pub service_config_path: String,

    // Durable tier
    pub cache_table_name: String,
    pub valkey_url: Option<String>,
    pub cache_retention: Duration,
    pub permissions_ttl: Duration,

    // Key set
    pub jwks_refresh_interval: Duration,
    pub jwks_min_refresh_interval: Duration,

    pub token_leeway_seconds: u64,
    pub user_subject_marker: String,

    pub http_timeout: Duration,
    pub credential_refresh_skew: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::from_env();

        let service_config_path = std::env::var("AUTHORIZER_CONFIG_PATH")
            .map_err(|_| ConfigError::Missing("AUTHORIZER_CONFIG_PATH"))?;

        let cache_table_name = std::env::var("AUTH_CACHE_TABLE_NAME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "auth-cache".to_string());

        let valkey_url = std::env::var("VALKEY_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let cache_retention = seconds_var("AUTH_CACHE_RETENTION_SECONDS", 86_400)?; // 1 day
        let permissions_ttl = seconds_var("PERMISSIONS_TTL_SECONDS", 900)?; // 15 min
        let jwks_refresh_interval = seconds_var("JWKS_REFRESH_SECONDS", 600)?;
        let jwks_min_refresh_interval = seconds_var("JWKS_MIN_REFRESH_SECONDS", 5)?;

        let token_leeway_seconds = seconds_var("TOKEN_LEEWAY_SECONDS", 0)?.as_secs();

        let user_subject_marker = std::env::var("USER_SUBJECT_MARKER")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "auth0".to_string());

        let http_timeout = seconds_var("HTTP_TIMEOUT_SECONDS", 15)?;
        let credential_refresh_skew = seconds_var("CREDENTIAL_REFRESH_SKEW_SECONDS", 60)?;

        Ok(Self {
            addr,
            app_env,
            service_config_path,
            cache_table_name,
            valkey_url,
            cache_retention,
            permissions_ttl,
            jwks_refresh_interval,
            jwks_min_refresh_interval,
            token_leeway_seconds,
            user_subject_marker,
            http_timeout,
            credential_refresh_skew,
        })
    }

    pub fn load_service_config(&self) -> Result<ServiceConfig, ConfigError> {
        ServiceConfig::from_file(Path::new(&self.service_config_path))
    }
}

fn seconds_var(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parse_seconds(key, std::env::var(key).ok().as_deref(), default)
}

// Unset means default; set but not a whole number of seconds is an error
fn parse_seconds(
    key: &'static str,
    raw: Option<&str>,
    default: u64,
) -> Result<Duration, ConfigError> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid(key)),
        None => Ok(Duration::from_secs(default)),
    }
}
