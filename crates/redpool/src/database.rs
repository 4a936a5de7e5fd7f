//! The pool registry
//!
//! [`RedisDatabase`] holds a set of [`RedisPool`] descriptors, materializes them
//! on `connect`, and hands them out by role with random load distribution.
//! A READ_ONLY request with no replica registered falls back to a WRITABLE
//! pool; a WRITABLE request never falls back.
//!
//! The descriptor set and the messaging subscription table share one lock, so
//! `connect`, `cleanup` and subscription bookkeeping are mutually exclusive.
//!
//! ```rust,no_run
//! use redpool::{PoolRole, RedisDatabase, RedisProperties};
//!
//! # async fn run() -> redpool::DatabaseResult<()> {
//! let database = RedisDatabase::new()
//!     .with_pool("primary", "127.0.0.1", 6379, PoolRole::Writable)?
//!     .with_pool("replica", "127.0.0.1", 6380, PoolRole::ReadOnly)?
//!     .connect(RedisProperties::with_database_index(1))?;
//!
//! let mut lease = database.select_pool(PoolRole::ReadOnly)?.acquire().await?;
//! lease.ping().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::seq::IndexedRandom;
use redis::{ConnectionAddr, IntoConnectionInfo};
use tracing::{debug, info, warn};

use crate::config::RedisProperties;
use crate::error::{DatabaseError, DatabaseResult, sanitize_error};
use crate::health::RedisHealth;
use crate::messaging::{ActiveSubscription, MessagingService, cancel_all};
use crate::pool::RedisPool;
use crate::repository::RedisRepository;
use crate::role::PoolRole;

/// Registry state guarded by the registry-wide lock
#[derive(Default)]
pub(crate) struct DatabaseState {
    pub(crate) properties: Option<RedisProperties>,
    pub(crate) pools: Vec<Arc<RedisPool>>,
    pub(crate) messaging: Option<Arc<MessagingService>>,
    pub(crate) subscriptions: HashMap<u64, ActiveSubscription>,
    /// Bumped by every connect and cleanup so stale messaging handles notice
    pub(crate) generation: u64,
    /// Subscription ids are unique for the registry's lifetime
    pub(crate) next_subscription_id: u64,
    setup_time: Option<Duration>,
}

#[derive(Default)]
pub(crate) struct DatabaseInner {
    pub(crate) state: Mutex<DatabaseState>,
}

impl DatabaseInner {
    pub(crate) fn lock(&self) -> DatabaseResult<MutexGuard<'_, DatabaseState>> {
        Ok(self.state.lock()?)
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        // Subscription tasks only hold weak references, stop them with the last handle
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        cancel_all(state);
    }
}

/// A named collection of role-tagged Redis pools
///
/// Cloning is cheap and yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct RedisDatabase {
    inner: Arc<DatabaseInner>,
}

impl RedisDatabase {
    /// Create an empty, unconnected registry
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_inner(inner: Arc<DatabaseInner>) -> Self {
        Self { inner }
    }

    /// Register a pool with its own endpoint
    pub fn with_pool(
        self,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        role: PoolRole,
    ) -> DatabaseResult<Self> {
        self.add_pool(RedisPool::new(name, Some(host.into()), Some(port), None, role))
    }

    /// Register a password-protected pool with its own endpoint
    pub fn with_authenticated_pool(
        self,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        auth: impl Into<String>,
        role: PoolRole,
    ) -> DatabaseResult<Self> {
        self.add_pool(RedisPool::new(
            name,
            Some(host.into()),
            Some(port),
            Some(auth.into()),
            role,
        ))
    }

    /// Register a pool that inherits its endpoint from the connect properties
    pub fn with_role(self, name: impl Into<String>, role: PoolRole) -> DatabaseResult<Self> {
        self.add_pool(RedisPool::new(name, None, None, None, role))
    }

    /// Register a prepared descriptor
    ///
    /// Fails with `DuplicatePool` if a pool with the same name and role is
    /// already registered, and with `AlreadyConnected` after `connect`.
    pub fn add_pool(self, pool: RedisPool) -> DatabaseResult<Self> {
        {
            let mut state = self.inner.lock()?;
            if state.properties.is_some() {
                return Err(DatabaseError::AlreadyConnected);
            }
            if state.pools.iter().any(|existing| **existing == pool) {
                return Err(DatabaseError::DuplicatePool {
                    name: pool.name().to_string(),
                    role: pool.role(),
                });
            }
            state.pools.push(Arc::new(pool));
        }
        Ok(self)
    }

    /// Materialize every registered pool and start the messaging service
    ///
    /// Must be called from within a Tokio runtime. A registry connects once;
    /// a second call fails with `AlreadyConnected` until `cleanup` runs.
    pub fn connect(self, properties: RedisProperties) -> DatabaseResult<Self> {
        properties.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DatabaseError::NoRuntime(e.to_string()))?;

        {
            let mut state = self.inner.lock()?;
            if state.properties.is_some() {
                return Err(DatabaseError::AlreadyConnected);
            }
            if state.pools.is_empty() {
                return Err(DatabaseError::NoPools);
            }

            let started = Instant::now();
            for (index, pool) in state.pools.iter().enumerate() {
                if let Err(e) = pool.bind(&properties) {
                    warn!(
                        pool = %pool.name(),
                        error = %e,
                        "Failed to set up pool, closing opened pools"
                    );
                    for opened in state.pools.iter().take(index) {
                        opened.unbind();
                    }
                    return Err(e);
                }
                debug!(
                    pool = %pool.name(),
                    role = %pool.role(),
                    endpoint = pool.endpoint().as_deref().unwrap_or("?"),
                    "Bound pool"
                );
            }

            state.generation += 1;
            state.messaging = Some(Arc::new(MessagingService::new(
                Arc::downgrade(&self.inner),
                state.generation,
                runtime,
                &properties.limits,
            )));
            state.properties = Some(properties);

            let elapsed = started.elapsed();
            state.setup_time = Some(elapsed);
            info!(
                pools = state.pools.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Set up Redis pools"
            );
        }

        Ok(self)
    }

    /// Connect using an explicit URI for the shared endpoint
    ///
    /// The URI's host and port replace the properties' defaults; credentials
    /// and database index in the URI override the properties when present.
    pub fn connect_with_uri(
        self,
        mut properties: RedisProperties,
        uri: &str,
    ) -> DatabaseResult<Self> {
        let info = uri
            .into_connection_info()
            .map_err(|e| DatabaseError::InvalidUri(sanitize_error(&e)))?;

        match info.addr {
            ConnectionAddr::Tcp(host, port) => {
                properties.host = host;
                properties.port = port;
            }
            other => {
                return Err(DatabaseError::InvalidUri(format!(
                    "only tcp endpoints are supported, got {:?}",
                    other
                )));
            }
        }
        if info.redis.username.is_some() {
            properties.username = info.redis.username;
        }
        if info.redis.password.is_some() {
            properties.password = info.redis.password;
        }
        if info.redis.db != 0 {
            properties.database = u32::try_from(info.redis.db).map_err(|_| {
                DatabaseError::InvalidUri(format!("invalid database index {}", info.redis.db))
            })?;
        }

        self.connect(properties)
    }

    /// Pick a pool of the given role uniformly at random
    ///
    /// READ_ONLY falls back to WRITABLE when no replica is registered.
    pub fn select_pool(&self, role: PoolRole) -> DatabaseResult<Arc<RedisPool>> {
        let state = self.inner.lock()?;
        select_from(&state.pools, role)
    }

    /// Pick a pool by writability
    pub fn select_writable(&self, writable: bool) -> DatabaseResult<Arc<RedisPool>> {
        self.select_pool(PoolRole::from_writable(writable))
    }

    /// Look a pool up by exact name, across all roles
    pub fn pool(&self, name: &str) -> Option<Arc<RedisPool>> {
        let state = self.inner.state.lock().ok()?;
        state.pools.iter().find(|p| p.name() == name).cloned()
    }

    /// Snapshot of every registered pool
    pub fn pools(&self) -> Vec<Arc<RedisPool>> {
        match self.inner.state.lock() {
            Ok(state) => state.pools.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Whether `connect` has succeeded and `cleanup` has not run since
    pub fn is_connected(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| state.properties.is_some())
            .unwrap_or(false)
    }

    /// Properties the registry was connected with
    pub fn properties(&self) -> Option<RedisProperties> {
        self.inner.state.lock().ok()?.properties.clone()
    }

    /// Time `connect` spent materializing pools
    pub fn setup_time(&self) -> Option<Duration> {
        self.inner.state.lock().ok()?.setup_time
    }

    /// The messaging service created by `connect`
    pub fn messaging(&self) -> DatabaseResult<Arc<MessagingService>> {
        self.inner
            .lock()?
            .messaging
            .clone()
            .ok_or(DatabaseError::RegistryClosed)
    }

    /// A repository façade over this registry
    pub fn repository(&self) -> RedisRepository {
        RedisRepository::new(self.clone())
    }

    /// Ping every pool and report its health
    pub async fn health_check(&self) -> Vec<RedisHealth> {
        let mut report = Vec::new();

        for pool in self.pools() {
            let started = Instant::now();
            let result = async {
                let mut lease = pool.acquire().await?;
                lease.ping().await
            }
            .await;

            let (healthy, latency, error) = match result {
                Ok(()) => (true, Some(started.elapsed()), None),
                Err(e) => (false, None, Some(e.to_string())),
            };
            report.push(RedisHealth {
                pool: pool.name().to_string(),
                role: pool.role(),
                endpoint: pool.endpoint(),
                healthy,
                latency,
                stats: pool.status(),
                error,
            });
        }

        report
    }

    /// Close every pool, cancel subscriptions and forget all descriptors
    ///
    /// Safe to call any number of times. The registry can be populated and
    /// connected again afterwards.
    pub fn cleanup(&self) {
        let mut state = match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        state.properties = None;
        state.setup_time = None;

        let cancelled = cancel_all(&mut state);
        if let Some(messaging) = state.messaging.take() {
            messaging.close_dispatch();
        }

        let mut closed = 0usize;
        for pool in state.pools.drain(..) {
            if pool.unbind() {
                closed += 1;
            }
        }
        state.generation += 1;

        if closed > 0 || cancelled > 0 {
            info!(closed, cancelled, "Cleaned up Redis pools");
        }
    }
}

/// Uniform random choice among pools of `role`, with READ_ONLY → WRITABLE fallback
fn select_from(pools: &[Arc<RedisPool>], role: PoolRole) -> DatabaseResult<Arc<RedisPool>> {
    let matching: Vec<&Arc<RedisPool>> = pools.iter().filter(|p| p.role() == role).collect();

    match matching.choose(&mut rand::rng()) {
        Some(pool) => Ok(Arc::clone(pool)),
        None if role == PoolRole::ReadOnly => {
            debug!(
                "Cannot find an available pool of role {}, attempting to find a {} pool",
                role,
                PoolRole::Writable
            );
            select_from(pools, PoolRole::Writable)
        }
        None => Err(DatabaseError::NoPoolForRole(role)),
    }
}

impl std::fmt::Debug for RedisDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDatabase")
            .field("pools", &self.pools())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, role: PoolRole) -> Arc<RedisPool> {
        Arc::new(RedisPool::new(name, None, None, None, role))
    }

    #[test]
    fn test_select_from_matches_role() {
        let pools = vec![
            descriptor("w", PoolRole::Writable),
            descriptor("r1", PoolRole::ReadOnly),
            descriptor("r2", PoolRole::ReadOnly),
        ];

        for _ in 0..200 {
            assert_eq!(select_from(&pools, PoolRole::Writable).unwrap().name(), "w");
            let read = select_from(&pools, PoolRole::ReadOnly).unwrap();
            assert_eq!(read.role(), PoolRole::ReadOnly);
        }
    }

    #[test]
    fn test_select_from_empty_set_fails_for_both_roles() {
        assert!(matches!(
            select_from(&[], PoolRole::ReadOnly),
            Err(DatabaseError::NoPoolForRole(PoolRole::Writable))
        ));
        assert!(matches!(
            select_from(&[], PoolRole::Writable),
            Err(DatabaseError::NoPoolForRole(PoolRole::Writable))
        ));
    }

    #[test]
    fn test_duplicate_identity_is_rejected() {
        let result = RedisDatabase::new()
            .with_pool("cache", "10.0.0.1", 6379, PoolRole::Writable)
            .and_then(|db| db.with_pool("cache", "10.0.0.2", 6380, PoolRole::Writable));
        assert!(matches!(result, Err(DatabaseError::DuplicatePool { .. })));

        let same_name_other_role = RedisDatabase::new()
            .with_pool("cache", "10.0.0.1", 6379, PoolRole::Writable)
            .and_then(|db| db.with_pool("cache", "10.0.0.2", 6379, PoolRole::ReadOnly));
        assert!(same_name_other_role.is_ok());
    }

    #[test]
    fn test_connect_outside_runtime_fails() {
        let result = RedisDatabase::new()
            .with_role("primary", PoolRole::Writable)
            .and_then(|db| db.connect(RedisProperties::default()));
        assert!(matches!(result, Err(DatabaseError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_connect_rolls_back_on_failure() {
        let database = RedisDatabase::new()
            .with_role("first", PoolRole::Writable)
            .unwrap()
            .add_pool(RedisPool::new("second", Some("  ".into()), None, None, PoolRole::ReadOnly))
            .unwrap();

        let result = database.clone().connect(RedisProperties::default());
        assert!(matches!(result, Err(DatabaseError::MissingHost { .. })));
        assert!(!database.is_connected());
        assert!(database.pools().iter().all(|p| !p.is_connected()));
    }

    #[tokio::test]
    async fn test_connect_with_uri_overrides_endpoint() {
        let database = RedisDatabase::new()
            .with_role("primary", PoolRole::Writable)
            .unwrap()
            .connect_with_uri(RedisProperties::default(), "redis://10.1.2.3:7000/4")
            .unwrap();

        let props = database.properties().unwrap();
        assert_eq!(props.host, "10.1.2.3");
        assert_eq!(props.port, 7000);
        assert_eq!(props.database, 4);
        assert_eq!(
            database.pool("primary").unwrap().endpoint().as_deref(),
            Some("10.1.2.3:7000")
        );
        database.cleanup();
    }

    #[tokio::test]
    async fn test_connect_with_bad_uri() {
        let result = RedisDatabase::new()
            .with_role("primary", PoolRole::Writable)
            .unwrap()
            .connect_with_uri(RedisProperties::default(), "not a uri");
        assert!(matches!(result, Err(DatabaseError::InvalidUri(_))));
    }
}
