//! Fire-and-forget publishing

use std::sync::{Arc, Weak};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::live_registry;
use crate::database::DatabaseInner;
use crate::error::{DatabaseError, DatabaseResult};
use crate::role::PoolRole;

/// Handle to one queued publish
///
/// Dropping the handle does not cancel the publish; its outcome is simply
/// never observed.
#[derive(Debug)]
pub struct DispatchHandle {
    id: u64,
    channel: String,
    task: JoinHandle<DatabaseResult<usize>>,
}

impl DispatchHandle {
    pub(crate) fn new(id: u64, channel: String, task: JoinHandle<DatabaseResult<usize>>) -> Self {
        Self { id, channel, task }
    }

    /// Dispatch sequence number
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Target channel
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether the publish has completed, successfully or not
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the publish and return the number of receivers
    pub async fn outcome(self) -> DatabaseResult<usize> {
        self.task
            .await
            .map_err(|e| DatabaseError::DispatchAborted(e.to_string()))?
    }
}

/// Body of one dispatch task
pub(crate) async fn publish(
    inner: Weak<DatabaseInner>,
    generation: u64,
    permits: Arc<Semaphore>,
    channel: String,
    message: String,
) -> DatabaseResult<usize> {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|_| DatabaseError::RegistryClosed)?;

    let result: DatabaseResult<usize> = async {
        let pool = live_registry(&inner, generation)?.select_pool(PoolRole::ReadOnly)?;
        let mut lease = pool.acquire().await?;
        let receivers = lease.publish(&channel, &message).await?;
        lease.release();
        Ok(receivers)
    }
    .await;

    match &result {
        Ok(receivers) => debug!(channel = %channel, receivers, "Dispatched message"),
        Err(e) => warn!(channel = %channel, error = %e, "Failed to dispatch message"),
    }
    result
}
