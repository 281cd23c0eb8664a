//! This module contains the configuration for the consumer

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest batch a single pull may request
pub const MAX_BATCH_SIZE: u8 = 10;

pub const ENV_SUBSCRIPTION: &str = "PUBSUB_SUBSCRIPTION";
pub const ENV_BATCH_SIZE: &str = "PUBSUB_BATCH_SIZE";
pub const ENV_HANDLER_TIMEOUT_MS: &str = "PUBSUB_HANDLER_TIMEOUT_MS";
pub const ENV_POLLING_INTERVAL_MS: &str = "PUBSUB_POLLING_INTERVAL_MS";

/// What happens to a handler invocation that missed its deadline
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Stop waiting and leave the handler task running in the background.
    ///
    /// Its eventual result is discarded and the message is never acknowledged.
    #[default]
    Detach,
    /// Abort the handler task at its next await point.
    Abort,
}

/// Configuration for the consumer
///
/// # Examples
///
/// ```rust
/// use pubsub_consumer::{ConsumerConfig, TimeoutAction};
/// use std::time::Duration;
///
/// let config = ConsumerConfig::new("projects/acme/subscriptions/orders")
///     .with_batch_size(10)
///     .with_handler_timeout(Duration::from_secs(30))
///     .with_polling_interval(Duration::from_millis(250))
///     .with_timeout_action(TimeoutAction::Abort);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Subscription to pull from. Required.
    pub subscription: String,
    /// Maximum number of messages requested per pull
    ///
    /// Must be between 1 and 10.
    /// Default: 1
    pub batch_size: u8,
    /// Time budget for a single handler invocation
    ///
    /// `None` or zero disables the deadline.
    /// Default: none
    #[serde(rename = "handler_timeout_ms", with = "millis::optional")]
    pub handler_timeout: Option<Duration>,
    /// Delay between the end of one cycle and the next pull
    ///
    /// Default: 0
    #[serde(rename = "polling_interval_ms", with = "millis")]
    pub polling_interval: Duration,
    /// Default: [`TimeoutAction::Detach`]
    pub timeout_action: TimeoutAction,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            subscription: String::new(),
            batch_size: 1,
            handler_timeout: None,
            polling_interval: Duration::ZERO,
            timeout_action: TimeoutAction::Detach,
        }
    }
}

impl ConsumerConfig {
    /// A configuration for `subscription` with every other option at its default
    pub fn new(subscription: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            ..Default::default()
        }
    }

    /// Set the batch size (builder pattern)
    pub fn with_batch_size(mut self, batch_size: u8) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the handler timeout (builder pattern)
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Set the polling interval (builder pattern)
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Set what happens to timed out handlers (builder pattern)
    pub fn with_timeout_action(mut self, action: TimeoutAction) -> Self {
        self.timeout_action = action;
        self
    }

    /// The handler deadline, with a zero timeout normalized to none
    pub fn effective_handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout.filter(|t| !t.is_zero())
    }

    /// Check the subscription is set and the batch size is within `1..=10`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subscription.is_empty() {
            return Err(ConfigError::MissingSubscription);
        }

        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ConfigError::BatchSizeOutOfRange {
                batch_size: self.batch_size,
            });
        }

        Ok(())
    }

    /// Load the configuration from `PUBSUB_*` environment variables.
    ///
    /// Unset variables keep their defaults. The result is not validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(subscription) = lookup(ENV_SUBSCRIPTION) {
            config.subscription = subscription;
        }
        if let Some(batch_size) = parse_env(&lookup, ENV_BATCH_SIZE)? {
            config.batch_size = batch_size;
        }
        if let Some(ms) = parse_env::<u64, _>(&lookup, ENV_HANDLER_TIMEOUT_MS)? {
            config.handler_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_env::<u64, _>(&lookup, ENV_POLLING_INTERVAL_MS)? {
            config.polling_interval = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parse_env<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
    }
}

/// Serde helpers storing durations as whole milliseconds
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod optional {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}
