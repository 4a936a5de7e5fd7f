//! Pool health and statistics

use std::time::Duration;

use serde::Serialize;

use crate::role::PoolRole;

/// Snapshot of one backing pool's occupancy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured maximum connections
    pub max_size: usize,
    /// Connections currently open
    pub size: usize,
    /// Idle connections ready to lease
    pub available: usize,
    /// Callers waiting for a connection
    pub waiting: usize,
    /// Whether the pool has been closed
    pub closed: bool,
    /// Time since the pool was materialized
    pub uptime: Duration,
}

impl PoolStats {
    /// Connections currently leased out
    pub fn in_use(&self) -> usize {
        self.size.saturating_sub(self.available)
    }
}

/// Result of pinging one pool
#[derive(Debug, Clone, Serialize)]
pub struct RedisHealth {
    /// Pool name
    pub pool: String,
    /// Pool role
    pub role: PoolRole,
    /// Resolved endpoint, if connected
    pub endpoint: Option<String>,
    /// Did PING succeed?
    pub healthy: bool,
    /// Round-trip time of the acquire + PING
    pub latency: Option<Duration>,
    /// Pool statistics at the time of the check
    pub stats: Option<PoolStats>,
    /// Error message if unhealthy
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_use_saturates() {
        let stats = PoolStats {
            max_size: 10,
            size: 4,
            available: 1,
            waiting: 0,
            closed: false,
            uptime: Duration::from_secs(1),
        };
        assert_eq!(stats.in_use(), 3);

        let odd = PoolStats {
            available: 9,
            ..stats
        };
        assert_eq!(odd.in_use(), 0);
    }
}
