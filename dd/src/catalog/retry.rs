//! Retry with exponential backoff for origin listings

use std::time::Duration;

use metricstore::{Connector, ConnectorError, Source};
use rand::Rng;
use tracing::{debug, warn};

use crate::config::RefreshConfig;

/// How one refresh retries its listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
    pub timeout: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::from(&RefreshConfig::default())
    }
}

impl From<&RefreshConfig> for RefreshPolicy {
    fn from(config: &RefreshConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

impl RefreshPolicy {
    /// Delay before retry number `retry` (1-based), without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Base delay plus up to a quarter of random jitter, capped at `max_backoff`
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let spread = (base.as_millis() / 4) as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::rng().random_range(0..=spread)
        };
        (base + Duration::from_millis(jitter)).min(self.max_backoff)
    }
}

/// List an origin's sources, retrying transient failures
///
/// Each attempt is bounded by the policy timeout. Non-retryable errors
/// end the loop at once.
pub async fn list_with_retry(
    origin: &str,
    connector: &dyn Connector,
    policy: &RefreshPolicy,
) -> Result<Vec<Source>, ConnectorError> {
    let mut attempt = 1;
    loop {
        debug!(%origin, attempt, attempts = policy.attempts, "list_with_retry: attempt");
        let result = match tokio::time::timeout(policy.timeout, connector.list()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::Timeout(policy.timeout)),
        };

        match result {
            Ok(sources) => return Ok(sources),
            Err(e) if e.is_retryable() && attempt < policy.attempts => {
                let delay = policy.delay(attempt);
                warn!(%origin, attempt, error = %e, ?delay, "Origin listing failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
