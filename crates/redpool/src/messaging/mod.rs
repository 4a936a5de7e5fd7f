//! Publish/subscribe on top of the pool registry
//!
//! The [`MessagingService`] is created by `connect` and lives until `cleanup`.
//! It runs one long-lived task per registered [`RedisMessenger`] and publishes
//! through a bounded set of dispatch workers.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use redpool::{PoolRole, RedisDatabase, RedisMessenger, RedisProperties};
//!
//! struct Printer;
//!
//! impl RedisMessenger for Printer {
//!     fn channels(&self) -> Vec<String> {
//!         vec!["events".to_string()]
//!     }
//!
//!     fn on_message(&self, channel: &str, message: &str) {
//!         println!("{channel}: {message}");
//!     }
//! }
//!
//! # async fn run() -> redpool::DatabaseResult<()> {
//! let database = RedisDatabase::new()
//!     .with_pool("primary", "127.0.0.1", 6379, PoolRole::Writable)?
//!     .connect(RedisProperties::default())?;
//!
//! let messaging = database.messaging()?;
//! let subscription = messaging.add_messenger(Arc::new(Printer))?;
//! subscription.wait_until_subscribed(Duration::from_secs(2)).await?;
//!
//! messaging.dispatch("events", "hello");
//! # Ok(())
//! # }
//! ```

mod context;
mod dispatch;
mod messenger;
mod subscription;

pub use context::{MessageCallback, PatternCallback, SubscriptionContext};
pub use dispatch::DispatchHandle;
pub use messenger::RedisMessenger;
pub use subscription::{SubscriptionHandle, SubscriptionInfo, SubscriptionState};

pub(crate) use subscription::ActiveSubscription;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore, watch};
use tracing::{Instrument, debug, info, info_span};

use crate::config::PoolLimits;
use crate::database::{DatabaseInner, DatabaseState, RedisDatabase};
use crate::error::{DatabaseError, DatabaseResult};
use subscription::SubscriptionTask;

/// Subscriber lifecycle and asynchronous dispatch for one connected registry
pub struct MessagingService {
    inner: Weak<DatabaseInner>,
    generation: u64,
    runtime: Handle,
    dispatch_permits: Arc<Semaphore>,
    dispatch_workers: usize,
    next_dispatch_id: AtomicU64,
    shut_down: AtomicBool,
}

impl MessagingService {
    pub(crate) fn new(
        inner: Weak<DatabaseInner>,
        generation: u64,
        runtime: Handle,
        limits: &PoolLimits,
    ) -> Self {
        Self {
            inner,
            generation,
            runtime,
            dispatch_permits: Arc::new(Semaphore::new(limits.dispatch_workers)),
            dispatch_workers: limits.dispatch_workers,
            next_dispatch_id: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Start a subscription for `messenger`
    ///
    /// Returns as soon as the subscription task is spawned; use
    /// [`SubscriptionHandle::wait_until_subscribed`] for a readiness
    /// guarantee.
    ///
    /// # Errors
    ///
    /// - `NoChannels` if the messenger lists no channels or an empty one
    /// - `AlreadySubscribed` if this messenger instance has a live subscription
    /// - `RegistryClosed` if the registry was cleaned up or dropped, or this
    ///   service was shut down
    pub fn add_messenger(
        &self,
        messenger: Arc<dyn RedisMessenger>,
    ) -> DatabaseResult<SubscriptionHandle> {
        let channels = messenger.channels();
        if channels.is_empty() || channels.iter().any(|c| c.is_empty()) {
            return Err(DatabaseError::NoChannels);
        }

        let inner = self.inner.upgrade().ok_or(DatabaseError::RegistryClosed)?;
        let (id, state_rx, task) = {
            let mut state = inner.lock()?;
            if self.shut_down.load(Ordering::Acquire)
                || state.generation != self.generation
                || state.properties.is_none()
            {
                return Err(DatabaseError::RegistryClosed);
            }
            if let Some((&existing, _)) = state
                .subscriptions
                .iter()
                .find(|(_, entry)| entry.is_live() && Arc::ptr_eq(&entry.messenger, &messenger))
            {
                return Err(DatabaseError::AlreadySubscribed(existing));
            }

            state.next_subscription_id += 1;
            let id = state.next_subscription_id;
            let (state_tx, state_rx) = watch::channel(SubscriptionState::Subscribing);
            let state_tx = Arc::new(state_tx);
            let cancel = Arc::new(Notify::new());

            state.subscriptions.insert(
                id,
                ActiveSubscription::new(
                    Arc::clone(&messenger),
                    channels.clone(),
                    Arc::clone(&state_tx),
                    Arc::clone(&cancel),
                ),
            );

            let task = SubscriptionTask {
                inner: Weak::clone(&self.inner),
                generation: self.generation,
                id,
                messenger,
                state: state_tx,
                cancel,
            };
            (id, state_rx, task)
        };

        let cancel = Arc::clone(&task.cancel);
        self.runtime
            .spawn(task.run().instrument(info_span!("redis_messenger", id)));
        debug!(id, channels = ?channels, "Spawned subscription task");

        Ok(SubscriptionHandle::new(
            id,
            state_rx,
            cancel,
            Weak::clone(&self.inner),
        ))
    }

    /// Publish `message` on `channel` without waiting
    ///
    /// The publish runs on a READ_ONLY pool (falling back to WRITABLE) once
    /// a dispatch worker is free. Failures are logged; await
    /// [`DispatchHandle::outcome`] to observe them.
    pub fn dispatch(
        &self,
        channel: impl Into<String>,
        message: impl Into<String>,
    ) -> DispatchHandle {
        let channel = channel.into();
        let id = self.next_dispatch_id.fetch_add(1, Ordering::Relaxed) + 1;

        let task = self.runtime.spawn(
            dispatch::publish(
                Weak::clone(&self.inner),
                self.generation,
                Arc::clone(&self.dispatch_permits),
                channel.clone(),
                message.into(),
            )
            .instrument(info_span!("redis_dispatch", id)),
        );

        DispatchHandle::new(id, channel, task)
    }

    /// Cancel a subscription by id
    ///
    /// Returns whether a subscription was found.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let removed = match inner.lock() {
            Ok(mut state) => state.subscriptions.remove(&id),
            Err(_) => None,
        };
        match removed {
            Some(entry) => {
                entry.cancel();
                debug!(id, "Unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Snapshot of every subscription still subscribing or subscribed, ordered by id
    pub fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let Some(inner) = self.inner.upgrade() else {
            return Vec::new();
        };
        let Ok(state) = inner.lock() else {
            return Vec::new();
        };
        let mut infos: Vec<SubscriptionInfo> = state
            .subscriptions
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(id, entry)| entry.info(*id))
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Maximum number of concurrent publishes
    pub fn dispatch_workers(&self) -> usize {
        self.dispatch_workers
    }

    /// Cancel every subscription and refuse further dispatches and messengers
    ///
    /// Pools stay open. Returns the number of cancelled subscriptions.
    pub fn shutdown(&self) -> usize {
        self.shut_down.store(true, Ordering::Release);
        self.close_dispatch();
        let Some(inner) = self.inner.upgrade() else {
            return 0;
        };
        let cancelled = match inner.lock() {
            Ok(mut state) if state.generation == self.generation => cancel_all(&mut state),
            _ => 0,
        };
        info!(cancelled, "Messaging service shut down");
        cancelled
    }

    pub(crate) fn close_dispatch(&self) {
        self.dispatch_permits.close();
    }
}

impl fmt::Debug for MessagingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingService")
            .field("generation", &self.generation)
            .field("dispatch_workers", &self.dispatch_workers)
            .field("dispatched", &self.next_dispatch_id.load(Ordering::Relaxed))
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Cancel and forget every subscription in the registry
pub(crate) fn cancel_all(state: &mut DatabaseState) -> usize {
    let mut cancelled = 0;
    for (id, entry) in state.subscriptions.drain() {
        entry.cancel();
        debug!(id, "Cancelled subscription");
        cancelled += 1;
    }
    cancelled
}

/// Upgrade to the registry, failing if it was dropped or reconnected since
pub(crate) fn live_registry(
    inner: &Weak<DatabaseInner>,
    generation: u64,
) -> DatabaseResult<RedisDatabase> {
    let inner = inner.upgrade().ok_or(DatabaseError::RegistryClosed)?;
    {
        let state = inner.lock()?;
        if state.generation != generation || state.properties.is_none() {
            return Err(DatabaseError::RegistryClosed);
        }
    }
    Ok(RedisDatabase::from_inner(inner))
}
