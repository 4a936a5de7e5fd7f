//! # redpool
//!
//! Role-aware access to a set of Redis connection pools.
//!
//! A [`RedisDatabase`] holds any number of named pools, each tagged
//! [`PoolRole::Writable`] (a primary) or [`PoolRole::ReadOnly`] (a replica).
//! Callers ask for a role and get one matching pool at random; a READ_ONLY
//! request with no replica registered degrades to the primary.
//!
//! ## Features
//!
//! - **Role-aware selection**: uniform random choice with READ_ONLY → WRITABLE fallback
//! - **Prepared leases**: each lease is authenticated and switched to the configured database
//! - **Pub/Sub**: one task per subscription, cancellable handles, bounded dispatch workers
//! - **Health**: per-pool PING with pool statistics
//!
//! ## Example
//!
//! ```rust,no_run
//! use redpool::{PoolRole, RedisDatabase, RedisProperties};
//! use redis::AsyncCommands;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let database = RedisDatabase::new()
//!         .with_pool("primary", "10.0.0.1", 6379, PoolRole::Writable)?
//!         .with_pool("replica-a", "10.0.0.2", 6379, PoolRole::ReadOnly)?
//!         .with_pool("replica-b", "10.0.0.3", 6379, PoolRole::ReadOnly)?
//!         .connect(RedisProperties::with_database_index(2).with_password("secret"))?;
//!
//!     let mut writer = database.select_pool(PoolRole::Writable)?.acquire().await?;
//!     let _: () = writer.set("greeting", "hello").await?;
//!
//!     let mut reader = database.select_pool(PoolRole::ReadOnly)?.acquire().await?;
//!     let greeting: String = reader.get("greeting").await?;
//!     assert_eq!(greeting, "hello");
//!
//!     database.cleanup();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod lease;
pub mod messaging;
pub mod pool;
pub mod repository;
pub mod role;

pub use config::{
    ConfigError, DEFAULT_HOST, DEFAULT_PORT, MAX_POOL_SIZE, PoolLimits, RedisProperties,
};
pub use database::RedisDatabase;
pub use error::{DatabaseError, DatabaseResult};
pub use health::{PoolStats, RedisHealth};
pub use lease::{Lease, SubscriberLease};
pub use messaging::{
    DispatchHandle, MessagingService, RedisMessenger, SubscriptionContext, SubscriptionHandle,
    SubscriptionInfo, SubscriptionState,
};
pub use pool::RedisPool;
pub use repository::RedisRepository;
pub use role::PoolRole;
