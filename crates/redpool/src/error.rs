//! Error types for pool registry, lease and messaging operations

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::role::PoolRole;

/// Result type for registry operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors that can occur while configuring, connecting or using the registry
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// `connect` was called with no registered pools
    #[error("Found no pools to set up")]
    NoPools,

    /// A pool has no host of its own and the properties provide none
    #[error("Pool '{pool}' has no host and no default host is configured")]
    MissingHost { pool: String },

    /// A pool with the same name and role is already registered
    #[error("Pool '{name}' with role {role} is already registered")]
    DuplicatePool { name: String, role: PoolRole },

    /// Properties failed to load or validate
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Connection URI could not be used
    #[error("Invalid connection URI: {0}")]
    InvalidUri(String),

    /// Registry was asked to connect while already connected
    #[error("Registry is already connected")]
    AlreadyConnected,

    /// Pool has not been materialized by `connect`
    #[error("Pool '{pool}' is not connected")]
    NotConnected { pool: String },

    /// Pool was closed by `cleanup`
    #[error("Pool '{pool}' is closed")]
    PoolClosed { pool: String },

    /// No registered pool carries the requested name
    #[error("No pool named '{name}' is registered")]
    UnknownPool { name: String },

    /// No pool matched the requested role after fallback
    #[error("Cannot find an available pool for role {0}")]
    NoPoolForRole(PoolRole),

    /// Messaging was used without a Tokio runtime
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),

    /// The registry was cleaned up or dropped
    #[error("Registry is closed")]
    RegistryClosed,

    /// Messenger returned an empty channel list
    #[error("Messenger must subscribe to at least one channel")]
    NoChannels,

    /// The same messenger already owns a live subscription
    #[error("Messenger already has an active subscription ({0})")]
    AlreadySubscribed(u64),

    /// Subscription ended before it became active
    #[error("Subscription {0} terminated")]
    SubscriptionTerminated(u64),

    /// Operation did not finish in time
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Lease acquisition waited longer than the configured timeout
    #[error("Timed out acquiring a connection from pool '{pool}' after {waited:?}")]
    AcquireTimeout { pool: String, waited: Duration },

    /// Lease acquisition failed for a reason other than timeout
    #[error("Failed to acquire a connection from pool '{pool}': {reason}")]
    Acquire { pool: String, reason: String },

    /// Redis command or connection failure
    #[error("Redis error: {0}")]
    Transport(String),

    /// Dispatch task was aborted before it reported back
    #[error("Dispatch task aborted: {0}")]
    DispatchAborted(String),

    /// Internal lock poisoned by a panicking thread
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl DatabaseError {
    /// Whether this error belongs to the configuration class
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DatabaseError::NoPools
                | DatabaseError::MissingHost { .. }
                | DatabaseError::DuplicatePool { .. }
                | DatabaseError::Config(_)
                | DatabaseError::InvalidUri(_)
                | DatabaseError::NoChannels
                | DatabaseError::NoRuntime(_)
        )
    }

    /// Whether this error is a transient transport failure
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DatabaseError::AcquireTimeout { .. }
                | DatabaseError::Acquire { .. }
                | DatabaseError::Transport(_)
                | DatabaseError::DispatchAborted(_)
                | DatabaseError::Timeout(_)
        )
    }
}

impl From<redis::RedisError> for DatabaseError {
    fn from(err: redis::RedisError) -> Self {
        DatabaseError::Transport(sanitize_error(&err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for DatabaseError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DatabaseError::LockPoisoned(err.to_string())
    }
}

/// Render a Redis error without leaking credentials or payloads
pub(crate) fn sanitize_error(error: &redis::RedisError) -> String {
    use redis::ErrorKind;

    match error.kind() {
        ErrorKind::AuthenticationFailed => "Authentication failed".to_string(),
        ErrorKind::TypeError => "Data type error".to_string(),
        ErrorKind::BusyLoadingError => "Redis is loading data".to_string(),
        ErrorKind::ReadOnly => "Redis is read-only".to_string(),
        ErrorKind::IoError => format!("I/O error: {}", error),
        _ if error.to_string().contains("WRONGPASS") => "Authentication failed".to_string(),
        _ => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(DatabaseError::NoPools.is_configuration());
        assert!(DatabaseError::NoChannels.is_configuration());
        assert!(!DatabaseError::AlreadyConnected.is_configuration());
        assert!(DatabaseError::Transport("boom".into()).is_transport());
        assert!(!DatabaseError::NoPoolForRole(PoolRole::Writable).is_transport());
    }

    #[test]
    fn test_auth_failures_are_sanitized() {
        let err = redis::RedisError::from((
            redis::ErrorKind::AuthenticationFailed,
            "invalid password",
            "hunter2".to_string(),
        ));
        let rendered = DatabaseError::from(err).to_string();
        assert!(rendered.contains("Authentication failed"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_display_mentions_pool() {
        let err = DatabaseError::DuplicatePool {
            name: "cache".into(),
            role: PoolRole::ReadOnly,
        };
        assert_eq!(
            err.to_string(),
            "Pool 'cache' with role READ_ONLY is already registered"
        );
    }
}
