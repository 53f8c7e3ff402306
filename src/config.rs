use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub toss: TossConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Per-tenant gateway configuration snapshot.
///
/// The secret key is optional at load time: a missing key is logged, not
/// fatal, and every gateway call for that tenant fails with a configuration
/// error instead. The test/live flag only selects the base endpoint, it
/// never alters reconciliation logic.
#[derive(Debug, Clone)]
pub struct TossConfig {
    pub secret_key: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub test_mode: bool,
}

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

impl Default for TossConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            test_mode: false,
        }
    }
}

impl TossConfig {
    pub fn from_env() -> Self {
        let secret_key = env::var("TOSS_SECRET_KEY").ok().filter(|s| !s.trim().is_empty());
        if secret_key.is_none() {
            warn!("TOSS_SECRET_KEY is not configured; every gateway call will fail until it is set");
        }

        Self {
            secret_key,
            connect_timeout: Duration::from_millis(parse_millis(
                "TOSS_CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT_MS,
            )),
            read_timeout: Duration::from_millis(parse_millis(
                "TOSS_READ_TIMEOUT_MS",
                DEFAULT_READ_TIMEOUT_MS,
            )),
            test_mode: env::var("TOSS_TEST_MODE")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Secret keys follow a fixed prefix scheme; anything else is a
    /// misconfiguration the health check should surface.
    pub fn has_valid_secret_key(&self) -> bool {
        match self.secret_key.as_deref() {
            None => false,
            Some(key) => {
                key.starts_with("test_sk")
                    || key.starts_with("live_sk")
                    || key.starts_with("test_gsk")
                    || key.starts_with("live_gsk")
            }
        }
    }
}

fn parse_millis(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Err(_) => default,
        Ok(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("invalid integer value for {}: {:?}, using default {}", key, value, default);
                default
            }
        },
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let toss = TossConfig::from_env();

        let config = Config {
            server,
            database,
            toss,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.toss.read_timeout.is_zero() || self.toss.connect_timeout.is_zero() {
            return Err(anyhow!("Toss timeouts must be greater than 0"));
        }

        Ok(())
    }
}

/// Capability for resolving the gateway configuration of a tenant.
///
/// The engine asks for a fresh immutable snapshot on every call and never
/// caches it, so configuration changes take effect on the next operation.
pub trait ConfigProvider: Send + Sync {
    fn config_for_tenant(&self, tenant_id: Uuid) -> TossConfig;
}

/// Provider serving the same configuration to every tenant. Suitable for
/// single-tenant deployments and tests; multi-tenant hosts plug in their own.
#[derive(Debug, Clone)]
pub struct StaticConfigProvider {
    config: TossConfig,
}

impl StaticConfigProvider {
    pub fn new(config: TossConfig) -> Self {
        Self { config }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn config_for_tenant(&self, _tenant_id: Uuid) -> TossConfig {
        self.config.clone()
    }
}
