//! Repository façade
//!
//! Data-access types usually want "a reader" or "a writer", not a registry.
//! [`RedisRepository`] wraps a registry handle and answers exactly that.

use std::sync::Arc;

use crate::database::RedisDatabase;
use crate::error::{DatabaseError, DatabaseResult};
use crate::lease::Lease;
use crate::pool::RedisPool;
use crate::role::PoolRole;

/// Hands out pools and leases by writability, role or name
#[derive(Debug, Clone)]
pub struct RedisRepository {
    database: RedisDatabase,
}

impl RedisRepository {
    pub fn new(database: RedisDatabase) -> Self {
        Self { database }
    }

    /// The registry this repository reads from
    pub fn database(&self) -> &RedisDatabase {
        &self.database
    }

    /// A WRITABLE pool when `writable`, otherwise READ_ONLY with fallback
    pub fn pool(&self, writable: bool) -> DatabaseResult<Arc<RedisPool>> {
        self.database.select_writable(writable)
    }

    pub fn pool_for(&self, role: PoolRole) -> DatabaseResult<Arc<RedisPool>> {
        self.database.select_pool(role)
    }

    /// A pool by exact name
    ///
    /// Unlike the registry lookup, a missing name is an error here.
    pub fn named(&self, name: &str) -> DatabaseResult<Arc<RedisPool>> {
        self.database
            .pool(name)
            .ok_or_else(|| DatabaseError::UnknownPool {
                name: name.to_string(),
            })
    }

    /// Lease from a READ_ONLY pool, or the primary when no replica exists
    pub async fn reader(&self) -> DatabaseResult<Lease> {
        self.pool_for(PoolRole::ReadOnly)?.acquire().await
    }

    /// Lease from a WRITABLE pool
    pub async fn writer(&self) -> DatabaseResult<Lease> {
        self.pool_for(PoolRole::Writable)?.acquire().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_routes_by_writability() {
        let database = RedisDatabase::new()
            .with_role("main", PoolRole::Writable)
            .unwrap()
            .with_role("replica", PoolRole::ReadOnly)
            .unwrap();
        let repository = database.repository();

        for _ in 0..50 {
            assert_eq!(repository.pool(true).unwrap().name(), "main");
            assert_eq!(repository.pool(false).unwrap().name(), "replica");
        }
        assert_eq!(repository.named("replica").unwrap().role(), PoolRole::ReadOnly);
        assert!(matches!(
            repository.named("missing"),
            Err(DatabaseError::UnknownPool { name }) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_leases_require_connect() {
        let repository = RedisDatabase::new()
            .with_role("main", PoolRole::Writable)
            .unwrap()
            .repository();

        assert!(matches!(
            repository.writer().await,
            Err(DatabaseError::NotConnected { .. })
        ));
        assert!(matches!(
            repository.reader().await,
            Err(DatabaseError::NotConnected { .. })
        ));
    }
}
