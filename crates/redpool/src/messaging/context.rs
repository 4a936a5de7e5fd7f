//! Subscription contexts
//!
//! A [`SubscriptionContext`] binds a channel list to the callbacks that
//! incoming messages are routed to. Pattern callbacks fire only when the
//! context was built for pattern mode.

use std::fmt;
use std::sync::Arc;

use redis::Msg;
use tracing::warn;

use super::messenger::RedisMessenger;

/// Callback for exact-channel messages: `(channel, message)`
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Callback for pattern messages: `(pattern, channel, message)`
pub type PatternCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Live binding between a channel list and its callbacks
#[derive(Clone)]
pub struct SubscriptionContext {
    channels: Vec<String>,
    on_message: Option<MessageCallback>,
    on_pattern_message: Option<PatternCallback>,
    using_patterns: bool,
}

impl SubscriptionContext {
    /// Context for the given channels with no callbacks yet
    pub fn new(channels: Vec<String>) -> Self {
        Self {
            channels,
            on_message: None,
            on_pattern_message: None,
            using_patterns: false,
        }
    }

    /// Route exact-channel messages to `callback`
    pub fn with_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
        self
    }

    /// Route pattern messages to `callback` and switch to pattern mode
    pub fn with_pattern_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str, &str) + Send + Sync + 'static,
    {
        self.on_pattern_message = Some(Arc::new(callback));
        self.using_patterns = true;
        self
    }

    /// Build the context for a registered messenger
    pub fn for_messenger(messenger: Arc<dyn RedisMessenger>) -> Self {
        let handler = Arc::clone(&messenger);
        let context = Self::new(messenger.channels())
            .with_message(move |channel, message| handler.on_message(channel, message));

        if messenger.using_patterns() {
            context.with_pattern_message(move |pattern, channel, message| {
                messenger.on_pattern_message(pattern, channel, message)
            })
        } else {
            context
        }
    }

    /// Channels or patterns to subscribe to
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Whether to subscribe with PSUBSCRIBE
    pub fn using_patterns(&self) -> bool {
        self.using_patterns
    }

    /// Route one pub/sub message to the matching callback
    ///
    /// Returns whether a callback ran.
    pub fn deliver(&self, msg: &Msg) -> bool {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    channel = msg.get_channel_name(),
                    error = %e,
                    "Dropping undecodable message"
                );
                return false;
            }
        };

        if msg.from_pattern() {
            match msg.get_pattern::<String>() {
                Ok(pattern) => self.invoke(Some(&pattern), msg.get_channel_name(), &payload),
                Err(e) => {
                    warn!(
                        channel = msg.get_channel_name(),
                        error = %e,
                        "Dropping message with bad pattern"
                    );
                    false
                }
            }
        } else {
            self.invoke(None, msg.get_channel_name(), &payload)
        }
    }

    /// Route decoded message parts to the matching callback
    pub fn invoke(&self, pattern: Option<&str>, channel: &str, message: &str) -> bool {
        match pattern {
            Some(pattern) => match &self.on_pattern_message {
                Some(callback) if self.using_patterns => {
                    callback(pattern, channel, message);
                    true
                }
                _ => false,
            },
            None => match &self.on_message {
                Some(callback) => {
                    callback(channel, message);
                    true
                }
                None => false,
            },
        }
    }
}

impl fmt::Debug for SubscriptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionContext")
            .field("channels", &self.channels)
            .field("on_message", &self.on_message.is_some())
            .field("on_pattern_message", &self.on_pattern_message.is_some())
            .field("using_patterns", &self.using_patterns)
            .finish()
    }
}
