//! Connection leases handed out by a pool
//!
//! A [`Lease`] owns one pooled connection for the span of a unit of work. It is
//! already authenticated and switched to the registry's logical database when
//! the caller receives it, and it goes back to its pool when dropped, on every
//! exit path. A [`SubscriberLease`] is the dedicated pub/sub counterpart: pub/sub
//! puts a connection into subscriber mode, so it never shares a pooled one.

use std::fmt;
use std::ops::{Deref, DerefMut};

use deadpool_redis::Connection as PooledConnection;
use futures::Stream;
use redis::Msg;
use tracing::debug;

use crate::error::DatabaseResult;

/// A borrowed, ready-to-use pooled connection
///
/// Derefs to the pooled connection so any `redis` command or
/// [`redis::AsyncCommands`] method can run on it.
pub struct Lease {
    conn: PooledConnection,
    pool: String,
    database: u32,
}

impl Lease {
    pub(crate) fn new(conn: PooledConnection, pool: String, database: u32) -> Self {
        Self {
            conn,
            pool,
            database,
        }
    }

    /// Name of the pool this lease came from
    pub fn pool_name(&self) -> &str {
        &self.pool
    }

    /// Logical database index selected on this lease
    pub fn database(&self) -> u32 {
        self.database
    }

    /// Publish `message` on `channel`, returning the number of receivers
    pub async fn publish(&mut self, channel: &str, message: &str) -> DatabaseResult<usize> {
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async(&mut self.conn)
            .await?;
        debug!(pool = %self.pool, channel, receivers, "Published message");
        Ok(receivers)
    }

    /// Round-trip a PING on this lease
    pub async fn ping(&mut self) -> DatabaseResult<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn).await?;
        Ok(())
    }

    /// Return the connection to its pool
    ///
    /// Equivalent to dropping the lease.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for Lease {
    type Target = PooledConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.pool)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

/// A dedicated connection in subscriber mode
pub struct SubscriberLease {
    pubsub: redis::aio::PubSub,
    pool: String,
}

impl SubscriberLease {
    pub(crate) fn new(pubsub: redis::aio::PubSub, pool: String) -> Self {
        Self { pubsub, pool }
    }

    /// Name of the pool whose endpoint this connection targets
    pub fn pool_name(&self) -> &str {
        &self.pool
    }

    /// Subscribe to exact channel names
    pub async fn subscribe(&mut self, channels: &[String]) -> DatabaseResult<()> {
        self.pubsub.subscribe(channels.to_vec()).await?;
        Ok(())
    }

    /// Subscribe to channel patterns
    pub async fn psubscribe(&mut self, patterns: &[String]) -> DatabaseResult<()> {
        self.pubsub.psubscribe(patterns.to_vec()).await?;
        Ok(())
    }

    /// Consume the lease into its message stream
    ///
    /// The stream ends when the connection drops. Dropping the stream closes
    /// the connection.
    pub fn into_messages(self) -> impl Stream<Item = Msg> + Send {
        self.pubsub.into_on_message()
    }
}

impl fmt::Debug for SubscriberLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberLease")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
