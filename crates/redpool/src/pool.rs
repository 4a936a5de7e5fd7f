//! Pool descriptors
//!
//! A [`RedisPool`] names one backing connection pool and tags it with a
//! [`PoolRole`]. It is created unbound by the registry builder, bound to a
//! `deadpool-redis` pool exactly once by `connect`, and unbound again by
//! `cleanup`. Identity is `(name, role)`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use deadpool_redis::{Config as PoolConfig, Pool, PoolError, Runtime};
use redis::IntoConnectionInfo;
use tracing::{debug, warn};

use crate::config::RedisProperties;
use crate::error::{DatabaseError, DatabaseResult, sanitize_error};
use crate::health::PoolStats;
use crate::lease::{Lease, SubscriberLease};
use crate::role::PoolRole;

/// Settings a pool inherits from its registry at connect time
#[derive(Clone)]
struct LeaseSettings {
    username: Option<String>,
    secret: Option<String>,
    database: u32,
    wait: Duration,
    connect_timeout: Option<Duration>,
}

/// Live provider state, present only while connected
struct PoolBinding {
    pool: Pool,
    client: redis::Client,
    host: String,
    port: u16,
    settings: LeaseSettings,
    created_at: Instant,
}

/// Named, role-tagged descriptor of one backing connection pool
pub struct RedisPool {
    name: String,
    host: Option<String>,
    port: Option<u16>,
    auth: Option<String>,
    role: PoolRole,
    binding: RwLock<Option<PoolBinding>>,
}

impl RedisPool {
    /// Create an unbound descriptor
    ///
    /// `host`/`port` left as `None` are inherited from the registry
    /// properties at connect time.
    pub fn new(
        name: impl Into<String>,
        host: Option<String>,
        port: Option<u16>,
        auth: Option<String>,
        role: PoolRole,
    ) -> Self {
        Self {
            name: name.into(),
            host,
            port,
            auth,
            role,
            binding: RwLock::new(None),
        }
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool role
    pub fn role(&self) -> PoolRole {
        self.role
    }

    /// Whether this pool accepts writes
    pub fn is_writable(&self) -> bool {
        self.role == PoolRole::Writable
    }

    /// Host configured on the descriptor itself
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Port configured on the descriptor itself
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Resolved `host:port` once connected
    pub fn endpoint(&self) -> Option<String> {
        let guard = self.binding.read().ok()?;
        guard
            .as_ref()
            .map(|binding| format!("{}:{}", binding.host, binding.port))
    }

    /// Whether a live, open provider is bound
    pub fn is_connected(&self) -> bool {
        match self.binding.read() {
            Ok(guard) => guard.as_ref().is_some_and(|b| !b.pool.is_closed()),
            Err(_) => false,
        }
    }

    /// Materialize the backing pool from the registry properties
    pub(crate) fn bind(&self, props: &RedisProperties) -> DatabaseResult<()> {
        let host = self.host.clone().unwrap_or_else(|| props.host.clone());
        if host.trim().is_empty() {
            return Err(DatabaseError::MissingHost {
                pool: self.name.clone(),
            });
        }
        let port = self.port.unwrap_or(props.port);

        let settings = LeaseSettings {
            username: props.username.clone(),
            secret: self.auth.clone().or_else(|| props.password.clone()),
            database: props.database,
            wait: props.limits.effective_wait(),
            connect_timeout: props.limits.create_timeout,
        };

        let mut pool_config = PoolConfig::from_url(endpoint_url(&host, port));
        pool_config.pool = Some(props.limits.to_pool_config());
        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| DatabaseError::Acquire {
                pool: self.name.clone(),
                reason: format!("Failed to create connection pool: {}", e),
            })?;

        let mut info = endpoint_url(&host, port).into_connection_info()?;
        info.redis.db = i64::from(settings.database);
        info.redis.username = settings.username.clone();
        info.redis.password = settings.secret.clone();
        let client = redis::Client::open(info)?;

        let mut guard = self.binding.write()?;
        if let Some(previous) = guard.take() {
            warn!(pool = %self.name, "Replacing a pool that was still bound");
            previous.pool.close();
        }
        *guard = Some(PoolBinding {
            pool,
            client,
            host,
            port,
            settings,
            created_at: Instant::now(),
        });
        Ok(())
    }

    /// Close the backing pool, if bound and still open, and clear the handle
    ///
    /// Returns whether a provider was actually closed.
    pub(crate) fn unbind(&self) -> bool {
        let binding = match self.binding.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match binding {
            Some(binding) if !binding.pool.is_closed() => {
                binding.pool.close();
                debug!(pool = %self.name, "Closed pool");
                true
            }
            _ => false,
        }
    }

    fn bound(&self) -> DatabaseResult<(Pool, LeaseSettings)> {
        let guard = self.binding.read()?;
        let binding = guard.as_ref().ok_or_else(|| DatabaseError::NotConnected {
            pool: self.name.clone(),
        })?;
        if binding.pool.is_closed() {
            return Err(DatabaseError::PoolClosed {
                pool: self.name.clone(),
            });
        }
        Ok((binding.pool.clone(), binding.settings.clone()))
    }

    /// Lease a connection, authenticated and switched to the logical database
    ///
    /// Waits up to the configured wait timeout when the pool is exhausted.
    pub async fn acquire(&self) -> DatabaseResult<Lease> {
        let (pool, settings) = self.bound()?;

        let conn = pool
            .get()
            .await
            .map_err(|e| self.map_pool_error(e, settings.wait))?;
        let mut lease = Lease::new(conn, self.name.clone(), settings.database);

        if let Some(secret) = &settings.secret {
            let mut auth = redis::cmd("AUTH");
            if let Some(username) = &settings.username {
                auth.arg(username);
            }
            auth.arg(secret);
            auth.query_async::<()>(&mut *lease).await?;
        }

        redis::cmd("SELECT")
            .arg(settings.database)
            .query_async::<()>(&mut *lease)
            .await?;

        Ok(lease)
    }

    /// Open a dedicated pub/sub connection against this pool's endpoint
    pub async fn subscriber(&self) -> DatabaseResult<SubscriberLease> {
        let (client, timeout) = {
            let guard = self.binding.read()?;
            let binding = guard.as_ref().ok_or_else(|| DatabaseError::NotConnected {
                pool: self.name.clone(),
            })?;
            if binding.pool.is_closed() {
                return Err(DatabaseError::PoolClosed {
                    pool: self.name.clone(),
                });
            }
            (binding.client.clone(), binding.settings.connect_timeout)
        };

        let pubsub = match timeout {
            Some(limit) => tokio::time::timeout(limit, client.get_async_pubsub())
                .await
                .map_err(|_| DatabaseError::AcquireTimeout {
                    pool: self.name.clone(),
                    waited: limit,
                })??,
            None => client.get_async_pubsub().await?,
        };

        Ok(SubscriberLease::new(pubsub, self.name.clone()))
    }

    /// Current pool statistics, `None` when unbound
    pub fn status(&self) -> Option<PoolStats> {
        let guard = self.binding.read().ok()?;
        let binding = guard.as_ref()?;
        let status = binding.pool.status();
        Some(PoolStats {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
            closed: binding.pool.is_closed(),
            uptime: binding.created_at.elapsed(),
        })
    }

    fn map_pool_error(&self, error: PoolError, waited: Duration) -> DatabaseError {
        match error {
            PoolError::Timeout(_) => DatabaseError::AcquireTimeout {
                pool: self.name.clone(),
                waited,
            },
            PoolError::Closed => DatabaseError::PoolClosed {
                pool: self.name.clone(),
            },
            PoolError::Backend(e) => DatabaseError::Acquire {
                pool: self.name.clone(),
                reason: sanitize_error(&e),
            },
            other => DatabaseError::Acquire {
                pool: self.name.clone(),
                reason: other.to_string(),
            },
        }
    }
}

fn endpoint_url(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("redis://[{}]:{}", host, port)
    } else {
        format!("redis://{}:{}", host, port)
    }
}

impl PartialEq for RedisPool {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.role == other.role
    }
}

impl Eq for RedisPool {}

impl Hash for RedisPool {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.role.hash(state);
    }
}

impl fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPool")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_is_name_and_role() {
        let writable = PoolRole::Writable;
        let a = RedisPool::new("cache", Some("10.0.0.1".into()), Some(6379), None, writable);
        let b = RedisPool::new("cache", Some("10.0.0.2".into()), Some(6380), None, writable);
        let c = RedisPool::new("cache", None, None, None, PoolRole::ReadOnly);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        assert!(set.insert(a));
        assert!(!set.insert(b));
        assert!(set.insert(c));
    }

    #[test]
    fn test_endpoint_url_brackets_ipv6() {
        assert_eq!(endpoint_url("127.0.0.1", 6379), "redis://127.0.0.1:6379");
        assert_eq!(endpoint_url("::1", 6379), "redis://[::1]:6379");
    }

    #[tokio::test]
    async fn test_acquire_before_connect_is_a_state_error() {
        let pool = RedisPool::new("primary", None, None, None, PoolRole::Writable);
        assert!(!pool.is_connected());
        assert!(pool.status().is_none());
        assert!(matches!(
            pool.acquire().await,
            Err(DatabaseError::NotConnected { .. })
        ));
        assert!(matches!(
            pool.subscriber().await,
            Err(DatabaseError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_bind_then_unbind() {
        let pool = RedisPool::new("primary", None, Some(6390), None, PoolRole::Writable);
        pool.bind(&RedisProperties::default()).unwrap();

        assert!(pool.is_connected());
        assert_eq!(pool.endpoint().as_deref(), Some("127.0.0.1:6390"));
        let stats = pool.status().unwrap();
        assert_eq!(stats.max_size, 30);
        assert!(!stats.closed);

        assert!(pool.unbind());
        assert!(!pool.unbind());
        assert!(!pool.is_connected());
        assert!(matches!(
            pool.acquire().await,
            Err(DatabaseError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_bind_requires_a_host() {
        let pool = RedisPool::new("orphan", None, None, None, PoolRole::ReadOnly);
        let props = RedisProperties {
            host: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            pool.bind(&props),
            Err(DatabaseError::MissingHost { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_auth() {
        let auth = Some("hunter2".to_string());
        let pool = RedisPool::new("secure", None, None, auth, PoolRole::Writable);
        let debug = format!("{:?}", pool);
        assert!(!debug.contains("hunter2"));
    }

    fn bound_secret(pool: &RedisPool) -> Option<String> {
        let guard = pool.binding.read().unwrap();
        guard.as_ref().unwrap().settings.secret.clone()
    }

    #[tokio::test]
    async fn test_pool_secret_overrides_shared_password() {
        let props = RedisProperties::default().with_password("shared");
        let own = RedisPool::new("own", None, None, Some("own".into()), PoolRole::Writable);
        let inherited = RedisPool::new("inherited", None, None, None, PoolRole::ReadOnly);
        own.bind(&props).unwrap();
        inherited.bind(&props).unwrap();

        assert_eq!(bound_secret(&own).as_deref(), Some("own"));
        assert_eq!(bound_secret(&inherited).as_deref(), Some("shared"));

        let open = RedisPool::new("open", None, None, None, PoolRole::ReadOnly);
        open.bind(&RedisProperties::default()).unwrap();
        assert_eq!(bound_secret(&open), None);

        for pool in [own, inherited, open] {
            assert!(pool.unbind());
        }
    }
}
