//! ConsumerConfig - consumer の設定
//!
//! デフォルト値は元の挙動（上限なし・timeout なし・即時再接続）に合わせています。
//! 上限や backoff を入れたい場合だけ値を設定してください。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::builder::BuildError;

pub const ENV_MAX_CONCURRENCY: &str = "COURIER_MAX_CONCURRENCY";
pub const ENV_MESSAGE_TIMEOUT_MS: &str = "COURIER_MESSAGE_TIMEOUT_MS";
pub const ENV_RECONNECT_BACKOFF_MS: &str = "COURIER_RECONNECT_BACKOFF_MS";
pub const ENV_CONSUMER_TAG_PREFIX: &str = "COURIER_CONSUMER_TAG_PREFIX";
pub const ENV_PAYLOAD_POOL_CAPACITY: &str = "COURIER_PAYLOAD_POOL_CAPACITY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Consumer tag is `{prefix}{queue}`.
    pub consumer_tag_prefix: String,

    /// Upper bound on messages processed at once. `None` = unbounded.
    pub max_concurrency: Option<usize>,

    /// Per-message handler deadline. `None` = wait forever.
    pub message_timeout_ms: Option<u64>,

    /// Delay before re-opening a failed delivery stream. `0` = immediately.
    pub reconnect_backoff_ms: u64,

    /// Idle `TaskParam` instances kept for reuse.
    pub payload_pool_capacity: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_tag_prefix: "consumer.".to_string(),
            max_concurrency: None,
            message_timeout_ms: None,
            reconnect_backoff_ms: 0,
            payload_pool_capacity: 64,
        }
    }
}

impl ConsumerConfig {
    /// Read overrides from `COURIER_*` environment variables.
    pub fn from_env() -> Result<Self, BuildError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ConsumerConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BuildError> {
        let mut config = Self::default();

        if let Some(prefix) = lookup(ENV_CONSUMER_TAG_PREFIX) {
            config.consumer_tag_prefix = prefix;
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENCY) {
            config.max_concurrency = Some(parse(ENV_MAX_CONCURRENCY, &raw)?);
        }
        if let Some(raw) = lookup(ENV_MESSAGE_TIMEOUT_MS) {
            config.message_timeout_ms = Some(parse(ENV_MESSAGE_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_RECONNECT_BACKOFF_MS) {
            config.reconnect_backoff_ms = parse(ENV_RECONNECT_BACKOFF_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_PAYLOAD_POOL_CAPACITY) {
            config.payload_pool_capacity = parse(ENV_PAYLOAD_POOL_CAPACITY, &raw)?;
        }
        Ok(config)
    }

    pub fn with_consumer_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.consumer_tag_prefix = prefix.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout_ms = Some(millis_ceil(timeout));
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff_ms = millis_ceil(backoff);
        self
    }

    pub fn with_payload_pool_capacity(mut self, capacity: usize) -> Self {
        self.payload_pool_capacity = capacity;
        self
    }

    pub fn consumer_tag(&self, queue: &str) -> String {
        format!("{}{}", self.consumer_tag_prefix, queue)
    }

    pub fn message_timeout(&self) -> Option<Duration> {
        self.message_timeout_ms.map(Duration::from_millis)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        if self.max_concurrency == Some(0) {
            return Err(BuildError::InvalidConcurrency);
        }
        if self.message_timeout_ms == Some(0) {
            return Err(BuildError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Whole milliseconds, rounded up so a non-zero duration never becomes 0.
fn millis_ceil(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, BuildError> {
    raw.trim().parse().map_err(|_| BuildError::InvalidEnv {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_unbounded_immediate_behaviour() {
        let config = ConsumerConfig::default();
        assert_eq!(config.consumer_tag("tasks"), "consumer.tasks");
        assert_eq!(config.max_concurrency, None);
        assert_eq!(config.message_timeout(), None);
        assert_eq!(config.reconnect_backoff(), Duration::ZERO);
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = ConsumerConfig::from_lookup(lookup(&[
            (ENV_MAX_CONCURRENCY, "8"),
            (ENV_MESSAGE_TIMEOUT_MS, "1500"),
            (ENV_RECONNECT_BACKOFF_MS, " 250 "),
            (ENV_CONSUMER_TAG_PREFIX, "worker-a."),
        ]))
        .unwrap();

        assert_eq!(config.max_concurrency, Some(8));
        assert_eq!(config.message_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.reconnect_backoff(), Duration::from_millis(250));
        assert_eq!(config.consumer_tag("q"), "worker-a.q");
        assert_eq!(config.payload_pool_capacity, 64);
    }

    #[test]
    fn unparsable_env_values_are_reported() {
        let err = ConsumerConfig::from_lookup(lookup(&[(ENV_MAX_CONCURRENCY, "lots")])).unwrap_err();
        assert!(matches!(
            err,
            BuildError::InvalidEnv { key, value } if key == ENV_MAX_CONCURRENCY && value == "lots"
        ));
    }

    #[test]
    fn sub_millisecond_durations_round_up() {
        let config = ConsumerConfig::default()
            .with_message_timeout(Duration::from_micros(500))
            .with_reconnect_backoff(Duration::from_micros(1_500));

        assert_eq!(config.message_timeout(), Some(Duration::from_millis(1)));
        assert_eq!(config.reconnect_backoff(), Duration::from_millis(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = ConsumerConfig::default().with_message_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(BuildError::InvalidTimeout)));
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: ConsumerConfig =
            serde_json::from_str(r#"{ "max_concurrency": 4 }"#).unwrap();
        assert_eq!(config.max_concurrency, Some(4));
        assert_eq!(config.consumer_tag_prefix, "consumer.");
    }
}
