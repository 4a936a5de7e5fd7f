//! Subscription lifecycle
//!
//! Every registered messenger gets its own long-lived task. The task selects a
//! READ_ONLY pool (falling back to WRITABLE), opens a dedicated subscriber
//! connection, records its context in the registry and then pumps messages
//! until the connection drops or the subscription is cancelled.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use super::context::SubscriptionContext;
use super::live_registry;
use super::messenger::RedisMessenger;
use crate::database::DatabaseInner;
use crate::error::{DatabaseError, DatabaseResult};
use crate::role::PoolRole;

/// Where a subscription is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Registered, connection and SUBSCRIBE still in flight
    Subscribing,
    /// SUBSCRIBE confirmed, messages are being delivered
    Subscribed,
    /// Cancelled by the caller or by registry cleanup
    Unsubscribed,
    /// Ended on its own: connection lost or setup failed
    Terminated,
}

impl SubscriptionState {
    /// Whether the subscription can no longer deliver messages
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionState::Unsubscribed | SubscriptionState::Terminated
        )
    }
}

/// Move `state` to `next` unless it already reached a terminal state
///
/// The first terminal state wins, so a cancelled subscription stays
/// `Unsubscribed` even if its task later sees the connection drop.
fn settle(state: &watch::Sender<SubscriptionState>, next: SubscriptionState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    })
}

/// Registry-side record of one subscription
pub(crate) struct ActiveSubscription {
    pub(crate) messenger: Arc<dyn RedisMessenger>,
    pub(crate) channels: Vec<String>,
    pub(crate) context: Option<Arc<SubscriptionContext>>,
    pub(crate) pool: Option<String>,
    pub(crate) state: Arc<watch::Sender<SubscriptionState>>,
    pub(crate) cancel: Arc<Notify>,
}

impl ActiveSubscription {
    pub(crate) fn new(
        messenger: Arc<dyn RedisMessenger>,
        channels: Vec<String>,
        state: Arc<watch::Sender<SubscriptionState>>,
        cancel: Arc<Notify>,
    ) -> Self {
        Self {
            messenger,
            channels,
            context: None,
            pool: None,
            state,
            cancel,
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.state.borrow().is_terminal()
    }

    /// Mark the subscription `Unsubscribed` and wake its task
    pub(crate) fn cancel(&self) {
        settle(&self.state, SubscriptionState::Unsubscribed);
        self.cancel.notify_one();
    }

    pub(crate) fn info(&self, id: u64) -> SubscriptionInfo {
        SubscriptionInfo {
            id,
            channels: self.channels.clone(),
            using_patterns: self
                .context
                .as_ref()
                .map(|c| c.using_patterns())
                .unwrap_or_else(|| self.messenger.using_patterns()),
            pool: self.pool.clone(),
            state: *self.state.borrow(),
        }
    }
}

/// Public snapshot of a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: u64,
    pub channels: Vec<String>,
    pub using_patterns: bool,
    /// Pool the subscriber connection was opened against, once known
    pub pool: Option<String>,
    pub state: SubscriptionState,
}

/// Caller-side handle returned by `add_messenger`
///
/// Dropping the handle leaves the subscription running; call
/// [`unsubscribe`](Self::unsubscribe) to end it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    state: watch::Receiver<SubscriptionState>,
    cancel: Arc<Notify>,
    inner: Weak<DatabaseInner>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: u64,
        state: watch::Receiver<SubscriptionState>,
        cancel: Arc<Notify>,
        inner: Weak<DatabaseInner>,
    ) -> Self {
        Self {
            id,
            state,
            cancel,
            inner,
        }
    }

    /// Registry-unique subscription id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Whether the subscription is still subscribing or subscribed
    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Wait until SUBSCRIBE is confirmed
    ///
    /// # Errors
    ///
    /// `Timeout` if the subscription is still pending after `timeout`,
    /// `SubscriptionTerminated` if it ended instead of becoming active.
    pub async fn wait_until_subscribed(&self, timeout: Duration) -> DatabaseResult<()> {
        let mut state = self.state.clone();
        let settled = tokio::time::timeout(timeout, async move {
            match state
                .wait_for(|s| *s != SubscriptionState::Subscribing)
                .await
            {
                Ok(current) => *current,
                Err(_) => SubscriptionState::Terminated,
            }
        })
        .await
        .map_err(|_| DatabaseError::Timeout(timeout))?;

        match settled {
            SubscriptionState::Subscribed => Ok(()),
            _ => Err(DatabaseError::SubscriptionTerminated(self.id)),
        }
    }

    /// Wait until the subscription ends and return its final state
    pub async fn closed(&self) -> SubscriptionState {
        let mut state = self.state.clone();
        match state.wait_for(|s| s.is_terminal()).await {
            Ok(current) => *current,
            Err(_) => SubscriptionState::Terminated,
        }
    }

    /// Cancel the subscription and close its connection
    pub fn unsubscribe(self) {
        match forget(&self.inner, self.id, &self.cancel) {
            Some(entry) => entry.cancel(),
            None => self.cancel.notify_one(),
        }
    }
}

/// The long-lived body of one subscription
pub(crate) struct SubscriptionTask {
    pub(crate) inner: Weak<DatabaseInner>,
    pub(crate) generation: u64,
    pub(crate) id: u64,
    pub(crate) messenger: Arc<dyn RedisMessenger>,
    pub(crate) state: Arc<watch::Sender<SubscriptionState>>,
    pub(crate) cancel: Arc<Notify>,
}

/// How the message pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpEnd {
    /// The server closed the subscriber connection
    Closed,
    /// The registry entry was removed before SUBSCRIBE went out
    Cancelled,
}

impl SubscriptionTask {
    pub(crate) async fn run(self) {
        let final_state = tokio::select! {
            _ = self.cancel.notified() => {
                debug!("Subscription cancelled");
                SubscriptionState::Unsubscribed
            }
            result = self.subscribe_and_pump() => match result {
                Ok(PumpEnd::Closed) => {
                    info!("Subscription stream closed");
                    SubscriptionState::Terminated
                }
                Ok(PumpEnd::Cancelled) => {
                    debug!("Subscription cancelled while connecting");
                    SubscriptionState::Unsubscribed
                }
                Err(e) => {
                    warn!(error = %e, "Subscription terminated");
                    SubscriptionState::Terminated
                }
            },
        };

        settle(&self.state, final_state);
        forget(&self.inner, self.id, &self.cancel);
    }

    async fn subscribe_and_pump(&self) -> DatabaseResult<PumpEnd> {
        let pool = live_registry(&self.inner, self.generation)?.select_pool(PoolRole::ReadOnly)?;
        let mut lease = pool.subscriber().await?;
        let context = Arc::new(SubscriptionContext::for_messenger(Arc::clone(
            &self.messenger,
        )));

        {
            let inner = self.inner.upgrade().ok_or(DatabaseError::RegistryClosed)?;
            let mut state = inner.lock()?;
            match state.subscriptions.get_mut(&self.id) {
                Some(entry) => {
                    entry.context = Some(Arc::clone(&context));
                    entry.pool = Some(pool.name().to_string());
                }
                None => return Ok(PumpEnd::Cancelled),
            }
        }

        if context.using_patterns() {
            lease.psubscribe(context.channels()).await?;
        } else {
            lease.subscribe(context.channels()).await?;
        }
        if !settle(&self.state, SubscriptionState::Subscribed) {
            return Ok(PumpEnd::Cancelled);
        }
        info!(
            pool = %pool.name(),
            channels = ?context.channels(),
            patterns = context.using_patterns(),
            "Subscribed"
        );

        let mut messages = Box::pin(lease.into_messages());
        while let Some(msg) = messages.next().await {
            context.deliver(&msg);
        }
        Ok(PumpEnd::Closed)
    }
}

/// Remove the registry entry for `id` if it is still the one owning `cancel`
fn forget(
    inner: &Weak<DatabaseInner>,
    id: u64,
    cancel: &Arc<Notify>,
) -> Option<ActiveSubscription> {
    let inner = inner.upgrade()?;
    let mut state = inner.lock().ok()?;
    let owned = state
        .subscriptions
        .get(&id)
        .is_some_and(|entry| Arc::ptr_eq(&entry.cancel, cancel));
    if owned {
        state.subscriptions.remove(&id)
    } else {
        None
    }
}
