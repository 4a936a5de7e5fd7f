//! Shared connection properties for a pool registry
//!
//! [`RedisProperties`] carries the values every pool inherits unless the pool
//! overrides them: default endpoint, credentials, logical database index and
//! pool sizing. Properties can be built in code or loaded from the environment.
//!
//! ## Environment Variables
//!
//! - `REDPOOL_HOST` - Default host (default: 127.0.0.1)
//! - `REDPOOL_PORT` - Default port (default: 6379)
//! - `REDPOOL_USERNAME` - ACL username (Redis 6+)
//! - `REDPOOL_PASSWORD` - Password used when a pool has no secret of its own
//! - `REDPOOL_DATABASE` - Logical database index (default: 0)
//! - `REDPOOL_POOL_MAX_SIZE` - Maximum connections per pool (default: 30)
//! - `REDPOOL_POOL_WAIT_MS` - Wait timeout for an exhausted pool (default: 1000)
//! - `REDPOOL_BLOCK_WHEN_EXHAUSTED` - Wait instead of failing fast (default: true)
//! - `REDPOOL_DISPATCH_WORKERS` - Concurrent publish workers (default: 4)

use std::env;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

/// Default Redis port
pub const DEFAULT_PORT: u16 = 6379;

/// Default host used when neither the pool nor the properties name one
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Largest accepted `limits.max_size`
pub const MAX_POOL_SIZE: usize = 10_000;

/// Error type for configuration loading and validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Sizing and exhaustion policy applied to every pool in a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolLimits {
    /// Maximum live connections per pool
    pub max_size: usize,
    /// How long `acquire` waits for a free connection when blocking
    pub wait_timeout: Duration,
    /// Timeout for opening a new connection
    pub create_timeout: Option<Duration>,
    /// Timeout for health-checking a returned connection
    pub recycle_timeout: Option<Duration>,
    /// Wait for a connection when exhausted; fail immediately otherwise
    pub block_when_exhausted: bool,
    /// Number of publishes the messaging service runs concurrently
    pub dispatch_workers: usize,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_size: 30,
            wait_timeout: Duration::from_millis(1000),
            create_timeout: Some(Duration::from_secs(5)),
            recycle_timeout: Some(Duration::from_secs(5)),
            block_when_exhausted: true,
            dispatch_workers: 4,
        }
    }
}

impl PoolLimits {
    /// Wait timeout handed to the pool, zero when failing fast
    pub fn effective_wait(&self) -> Duration {
        if self.block_when_exhausted {
            self.wait_timeout
        } else {
            Duration::ZERO
        }
    }

    pub(crate) fn to_pool_config(&self) -> deadpool_redis::PoolConfig {
        let mut config = deadpool_redis::PoolConfig::new(self.max_size);
        config.timeouts.wait = Some(self.effective_wait());
        config.timeouts.create = self.create_timeout;
        config.timeouts.recycle = self.recycle_timeout;
        config
    }
}

/// Properties shared by every pool of a registry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisProperties {
    /// Host inherited by pools registered without one
    pub host: String,
    /// Port inherited by pools registered without one
    pub port: u16,
    /// ACL username (Redis 6+)
    pub username: Option<String>,
    /// Password used by pools that carry no secret of their own
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Logical database index selected on every lease
    pub database: u32,
    /// Pool sizing and exhaustion policy
    pub limits: PoolLimits,
}

impl Default for RedisProperties {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            database: 0,
            limits: PoolLimits::default(),
        }
    }
}

impl fmt::Debug for RedisProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisProperties")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("limits", &self.limits)
            .finish()
    }
}

impl RedisProperties {
    /// Properties for the given endpoint and database index
    pub fn new(host: impl Into<String>, port: u16, database: u32) -> Self {
        Self {
            host: host.into(),
            port,
            database,
            ..Default::default()
        }
    }

    /// Default endpoint, custom database index
    pub fn with_database_index(database: u32) -> Self {
        Self {
            database,
            ..Default::default()
        }
    }

    /// Set the shared password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set ACL credentials
    pub fn with_auth(mut self, username: Option<String>, password: impl Into<String>) -> Self {
        self.username = username;
        self.password = Some(password.into());
        self
    }

    /// Replace the pool limits
    pub fn with_limits(mut self, limits: PoolLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set maximum connections per pool
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.limits.max_size = max_size;
        self
    }

    /// Set wait timeout for an exhausted pool
    pub fn with_wait_timeout(mut self, wait: Duration) -> Self {
        self.limits.wait_timeout = wait;
        self
    }

    /// Fail fast instead of waiting when a pool is exhausted
    pub fn fail_fast(mut self) -> Self {
        self.limits.block_when_exhausted = false;
        self
    }

    /// Set concurrent publish workers
    pub fn with_dispatch_workers(mut self, workers: usize) -> Self {
        self.limits.dispatch_workers = workers;
        self
    }

    /// Load properties from `REDPOOL_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any variable has an invalid value or the
    /// resulting properties fail validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut props = Self::default();

        if let Some(host) = get_env_string("REDPOOL_HOST") {
            props.host = host;
        }
        if let Some(port) = get_env_parsed::<u16>("REDPOOL_PORT")? {
            props.port = port;
        }
        props.username = get_env_string("REDPOOL_USERNAME");
        props.password = get_env_string("REDPOOL_PASSWORD");
        if let Some(database) = get_env_parsed::<u32>("REDPOOL_DATABASE")? {
            props.database = database;
        }
        if let Some(max_size) = get_env_parsed::<usize>("REDPOOL_POOL_MAX_SIZE")? {
            props.limits.max_size = max_size;
        }
        if let Some(wait_ms) = get_env_parsed::<u64>("REDPOOL_POOL_WAIT_MS")? {
            props.limits.wait_timeout = Duration::from_millis(wait_ms);
        }
        if let Some(block) = get_env_bool("REDPOOL_BLOCK_WHEN_EXHAUSTED")? {
            props.limits.block_when_exhausted = block;
        }
        if let Some(workers) = get_env_parsed::<usize>("REDPOOL_DISPATCH_WORKERS")? {
            props.limits.dispatch_workers = workers;
        }

        props.validate()?;
        Ok(props)
    }

    /// Validate the properties
    ///
    /// An empty host is allowed here; it only becomes an error at connect time
    /// for a pool that has no host of its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ValidationError(
                "port cannot be zero".to_string(),
            ));
        }
        if self.limits.max_size == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_size must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_size > MAX_POOL_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "limits.max_size cannot exceed {MAX_POOL_SIZE}"
            )));
        }
        if self.limits.dispatch_workers == 0 {
            return Err(ConfigError::ValidationError(
                "limits.dispatch_workers must be greater than zero".to_string(),
            ));
        }
        if self.limits.dispatch_workers > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ValidationError(format!(
                "limits.dispatch_workers cannot exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.limits.block_when_exhausted && self.limits.wait_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "limits.wait_timeout must be non-zero when blocking on exhaustion".to_string(),
            ));
        }
        if matches!(&self.password, Some(p) if p.is_empty()) {
            return Err(ConfigError::ValidationError(
                "password cannot be empty when set".to_string(),
            ));
        }
        Ok(())
    }
}

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn get_env_parsed<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!(
                    "invalid boolean value '{val}', expected true/false/1/0/yes/no/on/off"
                ),
            }),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let props = RedisProperties::default();
        assert_eq!(props.host, "127.0.0.1");
        assert_eq!(props.port, 6379);
        assert_eq!(props.database, 0);
        assert_eq!(props.limits.max_size, 30);
        assert_eq!(props.limits.wait_timeout, Duration::from_millis(1000));
        assert!(props.limits.block_when_exhausted);
        assert!(props.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let props = RedisProperties::new("cache.internal", 6380, 3)
            .with_password("s3cret")
            .with_max_size(8)
            .with_dispatch_workers(2);

        assert_eq!(props.host, "cache.internal");
        assert_eq!(props.port, 6380);
        assert_eq!(props.database, 3);
        assert_eq!(props.password.as_deref(), Some("s3cret"));
        assert_eq!(props.limits.max_size, 8);
        assert_eq!(props.limits.dispatch_workers, 2);
    }

    #[test]
    fn test_fail_fast_uses_zero_wait() {
        let props = RedisProperties::default().fail_fast();
        assert_eq!(props.limits.effective_wait(), Duration::ZERO);
        assert!(props.validate().is_ok());

        let pool_config = props.limits.to_pool_config();
        assert_eq!(pool_config.max_size, 30);
        assert_eq!(pool_config.timeouts.wait, Some(Duration::ZERO));
    }

    #[test]
    fn test_validation_rejects_bad_limits() {
        assert!(RedisProperties::default().with_max_size(0).validate().is_err());
        assert!(
            RedisProperties::default()
                .with_dispatch_workers(0)
                .validate()
                .is_err()
        );
        assert!(
            RedisProperties::default()
                .with_wait_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(RedisProperties::default().with_password("").validate().is_err());
    }

    #[test]
    fn test_validation_rejects_oversized_limits() {
        let too_many_workers = RedisProperties::default().with_dispatch_workers(usize::MAX);
        assert!(matches!(
            too_many_workers.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let too_large = RedisProperties::default().with_max_size(usize::MAX);
        assert!(matches!(
            too_large.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let at_cap = RedisProperties::default()
            .with_max_size(MAX_POOL_SIZE)
            .with_dispatch_workers(Semaphore::MAX_PERMITS);
        assert!(at_cap.validate().is_ok());
    }

    #[test]
    fn test_password_is_redacted() {
        let props = RedisProperties::default().with_password("hunter2");
        let debug = format!("{:?}", props);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));

        let json = serde_json::to_string(&props).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_env_parse_helpers() {
        // Keys are unique to this test so parallel tests do not interfere
        unsafe {
            env::set_var("REDPOOL_TEST_PORT_OK", "6390");
            env::set_var("REDPOOL_TEST_PORT_BAD", "sixty");
            env::set_var("REDPOOL_TEST_BOOL", "off");
        }

        assert_eq!(get_env_parsed::<u16>("REDPOOL_TEST_PORT_OK").unwrap(), Some(6390));
        assert!(matches!(
            get_env_parsed::<u16>("REDPOOL_TEST_PORT_BAD"),
            Err(ConfigError::InvalidEnvVar { .. })
        ));
        assert_eq!(get_env_bool("REDPOOL_TEST_BOOL").unwrap(), Some(false));
        assert_eq!(get_env_parsed::<u16>("REDPOOL_TEST_UNSET").unwrap(), None);
    }
}
