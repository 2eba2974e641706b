//! Executor configuration.
//!
//! Defaults mirror the reference retry behaviour (3 retries, 1s/2s/4s). Every
//! knob can be overridden from the environment for container deployments.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const ENV_MAX_RETRIES: &str = "FLOW_MAX_RETRIES";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "FLOW_RETRY_BASE_DELAY_MS";
pub const ENV_MAX_CONCURRENCY: &str = "FLOW_MAX_CONCURRENCY";
pub const ENV_NODE_TIMEOUT_MS: &str = "FLOW_NODE_TIMEOUT_MS";

/// Bounded exponential back-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor applied per further retry.
    pub multiplier: u32,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Tuning knobs for the executor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub retry: RetryPolicy,
    /// Maximum processors running at once within a batch; `None` is unbounded.
    pub max_concurrency: Option<usize>,
    /// Time limit for a single attempt; exceeding it counts as a transient failure.
    pub node_timeout: Option<Duration>,
}

impl ExecutorConfig {
    /// Defaults overridden by `FLOW_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(retries) = parse_var::<u32>(&lookup, ENV_MAX_RETRIES) {
            config.retry.max_retries = retries;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_RETRY_BASE_DELAY_MS) {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_var::<usize>(&lookup, ENV_MAX_CONCURRENCY) {
            config.max_concurrency = (limit > 0).then_some(limit);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_NODE_TIMEOUT_MS) {
            config.node_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_backoff_is_one_two_four_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(3),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            (ENV_MAX_RETRIES, "5"),
            (ENV_RETRY_BASE_DELAY_MS, "250"),
            (ENV_MAX_CONCURRENCY, "4"),
            (ENV_NODE_TIMEOUT_MS, "0"),
        ]
        .into_iter()
        .collect();

        let config = ExecutorConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.max_concurrency, Some(4));
        assert_eq!(config.node_timeout, None);
    }

    #[test]
    fn bad_env_values_fall_back_to_defaults() {
        let config = ExecutorConfig::from_lookup(|k| {
            (k == ENV_MAX_RETRIES).then(|| "lots".to_string())
        });
        assert_eq!(config, ExecutorConfig::default());
    }
}
