//! Registry behaviour that needs no running Redis
//!
//! Connecting only materializes pools; no connection is opened until a lease
//! is requested, so these tests run anywhere.

use std::collections::HashMap;

use redpool::{DatabaseError, PoolRole, RedisDatabase, RedisProperties};

fn registry(pools: &[(&str, PoolRole)]) -> RedisDatabase {
    pools
        .iter()
        .fold(RedisDatabase::new(), |db, (name, role)| {
            db.with_role(*name, *role).unwrap()
        })
}

#[tokio::test]
async fn test_connect_binds_every_pool() {
    let database = registry(&[
        ("w", PoolRole::Writable),
        ("r1", PoolRole::ReadOnly),
        ("r2", PoolRole::ReadOnly),
    ])
    .connect(RedisProperties::default())
    .unwrap();

    assert!(database.is_connected());
    assert!(database.setup_time().is_some());
    assert_eq!(database.pools().len(), 3);
    for pool in database.pools() {
        assert!(pool.is_connected(), "{} should be bound", pool.name());
        assert!(pool.status().is_some());
    }
    database.cleanup();
}

#[tokio::test]
async fn test_connect_with_no_pools_fails() {
    let result = RedisDatabase::new().connect(RedisProperties::default());
    assert!(matches!(result, Err(DatabaseError::NoPools)));
}

#[tokio::test]
async fn test_double_connect_is_rejected_until_cleanup() {
    let database = registry(&[("primary", PoolRole::Writable)])
        .connect(RedisProperties::default())
        .unwrap();

    let again = database.clone().connect(RedisProperties::default());
    assert!(matches!(again, Err(DatabaseError::AlreadyConnected)));
    assert!(matches!(
        database.clone().with_role("late", PoolRole::ReadOnly),
        Err(DatabaseError::AlreadyConnected)
    ));

    database.cleanup();
    let reconnected = database
        .with_role("primary", PoolRole::Writable)
        .unwrap()
        .connect(RedisProperties::default())
        .unwrap();
    assert!(reconnected.is_connected());
    reconnected.cleanup();
}

#[tokio::test]
async fn test_invalid_properties_fail_before_binding() {
    let database = registry(&[("primary", PoolRole::Writable)]);
    let result = database
        .clone()
        .connect(RedisProperties::default().with_max_size(0));

    assert!(result.is_err_and(|e| e.is_configuration()));
    assert!(!database.is_connected());
}

#[tokio::test]
async fn test_oversized_limits_are_rejected_without_binding() {
    let database = registry(&[
        ("primary", PoolRole::Writable),
        ("replica", PoolRole::ReadOnly),
    ]);

    let workers = database
        .clone()
        .connect(RedisProperties::default().with_dispatch_workers(usize::MAX));
    assert!(workers.is_err_and(|e| e.is_configuration()));

    let size = database
        .clone()
        .connect(RedisProperties::default().with_max_size(usize::MAX));
    assert!(size.is_err_and(|e| e.is_configuration()));

    assert!(!database.is_connected());
    assert!(database.pools().iter().all(|pool| !pool.is_connected()));

    // The registry lock is still usable afterwards
    let connected = database.connect(RedisProperties::default()).unwrap();
    assert!(connected.is_connected());
    connected.cleanup();
}

#[test]
fn test_selection_covers_every_matching_pool() {
    let database = registry(&[
        ("r1", PoolRole::ReadOnly),
        ("r2", PoolRole::ReadOnly),
        ("r3", PoolRole::ReadOnly),
    ]);

    let mut draws: HashMap<String, usize> = HashMap::new();
    for _ in 0..1000 {
        let pool = database.select_pool(PoolRole::ReadOnly).unwrap();
        assert_eq!(pool.role(), PoolRole::ReadOnly);
        *draws.entry(pool.name().to_string()).or_default() += 1;
    }

    for name in ["r1", "r2", "r3"] {
        assert!(draws.get(name).copied().unwrap_or(0) >= 1, "{name} never drawn");
    }
}

#[test]
fn test_primary_only_scenario() {
    let database = registry(&[("primary", PoolRole::Writable)]);

    for _ in 0..100 {
        assert_eq!(
            database.select_pool(PoolRole::ReadOnly).unwrap().name(),
            "primary"
        );
        assert_eq!(
            database.select_pool(PoolRole::Writable).unwrap().name(),
            "primary"
        );
    }
}

#[test]
fn test_replicas_and_primary_scenario() {
    let database = registry(&[
        ("r1", PoolRole::ReadOnly),
        ("r2", PoolRole::ReadOnly),
        ("w", PoolRole::Writable),
    ]);

    for _ in 0..100 {
        assert_eq!(database.select_pool(PoolRole::Writable).unwrap().name(), "w");
        let read = database.select_pool(PoolRole::ReadOnly).unwrap();
        assert!(read.name() == "r1" || read.name() == "r2");
    }
}

#[test]
fn test_writable_never_falls_back() {
    let database = registry(&[("r1", PoolRole::ReadOnly), ("r2", PoolRole::ReadOnly)]);

    assert!(matches!(
        database.select_pool(PoolRole::Writable),
        Err(DatabaseError::NoPoolForRole(PoolRole::Writable))
    ));
    assert!(database.select_writable(false).is_ok());
}

#[test]
fn test_empty_registry_selection_fails_for_both_roles() {
    let database = RedisDatabase::new();
    assert!(database.select_pool(PoolRole::ReadOnly).is_err());
    assert!(database.select_pool(PoolRole::Writable).is_err());
}

#[test]
fn test_lookup_by_name_is_an_explicit_absence() {
    let database = registry(&[("cache", PoolRole::ReadOnly)]);
    assert_eq!(database.pool("cache").unwrap().role(), PoolRole::ReadOnly);
    assert!(database.pool("sessions").is_none());
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let database = registry(&[("primary", PoolRole::Writable), ("replica", PoolRole::ReadOnly)])
        .connect(RedisProperties::default())
        .unwrap();
    let primary = database.pool("primary").unwrap();

    database.cleanup();
    assert!(database.pools().is_empty());
    assert!(!database.is_connected());
    assert!(database.messaging().is_err());

    database.cleanup();
    assert!(database.pools().is_empty());

    assert!(!primary.is_connected());
    assert!(matches!(
        primary.acquire().await,
        Err(DatabaseError::NotConnected { .. })
    ));
}

#[tokio::test]
async fn test_health_check_reports_unreachable_pools() {
    let database = RedisDatabase::new()
        .with_pool("nowhere", "127.0.0.1", 1, PoolRole::Writable)
        .unwrap()
        .connect(RedisProperties::default())
        .unwrap();

    let report = database.health_check().await;
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].pool, "nowhere");
    assert_eq!(report[0].endpoint.as_deref(), Some("127.0.0.1:1"));
    assert!(!report[0].healthy);
    assert!(report[0].error.is_some());
    database.cleanup();
}
