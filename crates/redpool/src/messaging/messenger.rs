//! The handler contract for subscriptions

/// A pub/sub message handler
///
/// Callbacks run on the subscription's own task, one message at a time, so a
/// slow handler delays only its own subscription. Handlers should hand heavy
/// work off to another task.
///
/// ```rust
/// use redpool::RedisMessenger;
///
/// struct Announcements;
///
/// impl RedisMessenger for Announcements {
///     fn channels(&self) -> Vec<String> {
///         vec!["announcements".to_string()]
///     }
///
///     fn on_message(&self, channel: &str, message: &str) {
///         println!("{channel}: {message}");
///     }
/// }
/// ```
pub trait RedisMessenger: Send + Sync + 'static {
    /// Channels (or patterns, when [`using_patterns`](Self::using_patterns)
    /// is true) to subscribe to. Must not be empty.
    fn channels(&self) -> Vec<String>;

    /// Called for every message received on an exact channel subscription
    fn on_message(&self, _channel: &str, _message: &str) {}

    /// Called for every message matched by a pattern subscription
    fn on_pattern_message(&self, _pattern: &str, _channel: &str, _message: &str) {}

    /// Subscribe with PSUBSCRIBE instead of SUBSCRIBE
    fn using_patterns(&self) -> bool {
        false
    }
}
