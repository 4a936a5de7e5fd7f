//! Subcommand handlers

use std::sync::Arc;
use std::time::Duration;

use redis::AsyncCommands;
use redpool::{
    ConfigError, DatabaseError, PoolRole, RedisDatabase, RedisMessenger, RedisProperties,
};
use serde::Serialize;

use crate::pools::{self, PoolSpec};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("{unhealthy} of {total} pools are unhealthy")]
    Unhealthy { unhealthy: usize, total: usize },
}

/// Connection options shared by every subcommand
pub struct Target {
    pub pools: Vec<PoolSpec>,
    pub uri: Option<String>,
    pub database: Option<u32>,
}

impl Target {
    /// Build and connect the registry described by the flags and environment
    pub fn connect(&self) -> Result<RedisDatabase, CliError> {
        let mut properties = RedisProperties::from_env()?;
        if let Some(database) = self.database {
            properties.database = database;
        }

        let registry = pools::registry(&self.pools)?;
        let registry = match &self.uri {
            Some(uri) => registry.connect_with_uri(properties, uri)?,
            None => registry.connect(properties)?,
        };
        Ok(registry)
    }
}

pub async fn ping(database: &RedisDatabase) -> Result<(), CliError> {
    let report = database.health_check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let unhealthy = report.iter().filter(|health| !health.healthy).count();
    if unhealthy > 0 {
        return Err(CliError::Unhealthy {
            unhealthy,
            total: report.len(),
        });
    }
    Ok(())
}

pub async fn publish(
    database: &RedisDatabase,
    channel: String,
    message: String,
) -> Result<(), CliError> {
    let receivers = database
        .messaging()?
        .dispatch(channel.clone(), message)
        .outcome()
        .await?;
    tracing::info!(channel = %channel, receivers, "Published");
    println!("{receivers}");
    Ok(())
}

#[derive(Serialize)]
struct Delivery<'a> {
    pattern: Option<&'a str>,
    channel: &'a str,
    message: &'a str,
}

/// Prints each delivery as one JSON line
struct Printer {
    channels: Vec<String>,
    patterns: bool,
}

impl Printer {
    fn print(&self, delivery: &Delivery<'_>) {
        match serde_json::to_string(delivery) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "Failed to render message"),
        }
    }
}

impl RedisMessenger for Printer {
    fn channels(&self) -> Vec<String> {
        self.channels.clone()
    }

    fn on_message(&self, channel: &str, message: &str) {
        self.print(&Delivery {
            pattern: None,
            channel,
            message,
        });
    }

    fn on_pattern_message(&self, pattern: &str, channel: &str, message: &str) {
        self.print(&Delivery {
            pattern: Some(pattern),
            channel,
            message,
        });
    }

    fn using_patterns(&self) -> bool {
        self.patterns
    }
}

pub async fn subscribe(
    database: &RedisDatabase,
    channels: Vec<String>,
    patterns: bool,
    duration: Option<Duration>,
) -> Result<(), CliError> {
    let messaging = database.messaging()?;
    let handle = messaging.add_messenger(Arc::new(Printer { channels, patterns }))?;
    handle.wait_until_subscribed(Duration::from_secs(5)).await?;
    tracing::info!(id = handle.id(), "Listening, press Ctrl-C to stop");

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = deadline => {}
        _ = tokio::signal::ctrl_c() => {}
        state = handle.closed() => {
            tracing::warn!(state = ?state, "Subscription ended");
            return Err(DatabaseError::SubscriptionTerminated(handle.id()).into());
        }
    }

    handle.unsubscribe();
    Ok(())
}

pub async fn get(database: &RedisDatabase, key: String) -> Result<(), CliError> {
    let mut lease = database.select_pool(PoolRole::ReadOnly)?.acquire().await?;
    let value: Option<String> = lease.get(&key).await.map_err(DatabaseError::from)?;
    match value {
        Some(value) => println!("{value}"),
        None => tracing::info!(key = %key, "Key not found"),
    }
    Ok(())
}

pub async fn set(
    database: &RedisDatabase,
    key: String,
    value: String,
    ttl: Option<Duration>,
) -> Result<(), CliError> {
    let mut lease = database.select_pool(PoolRole::Writable)?.acquire().await?;
    let result: redis::RedisResult<()> = match ttl {
        Some(ttl) => lease.set_ex(&key, value, ttl.as_secs().max(1)).await,
        None => lease.set(&key, value).await,
    };
    result.map_err(DatabaseError::from)?;
    tracing::info!(key = %key, pool = %lease.pool_name(), "Stored");
    Ok(())
}
