use std::time::Duration;

use serde::Deserialize;

/// Engine and collection tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retries a transaction may make after its first attempt (default: 5)
    pub max_retries: u32,

    /// Maximum operations in one multi-item transaction (default: 100)
    pub max_transaction_items: usize,

    /// Batch-get calls made before unprocessed keys become an error (default: 8)
    pub batch_get_max_attempts: u32,

    /// Base delay between batch-get continuation calls, doubled on each
    /// attempt (default: 25ms)
    pub batch_get_backoff_ms: u64,

    /// Use strongly consistent reads for gets, queries and scans (default: false)
    pub consistent_reads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_transaction_items: 100,
            batch_get_max_attempts: 8,
            batch_get_backoff_ms: 25,
            consistent_reads: false,
        }
    }
}

impl EngineConfig {
    /// Set the retry limit
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the maximum number of operations per transaction
    pub fn max_transaction_items(mut self, items: usize) -> Self {
        self.max_transaction_items = items;
        self
    }

    /// Set the number of batch-get attempts
    pub fn batch_get_max_attempts(mut self, attempts: u32) -> Self {
        self.batch_get_max_attempts = attempts.max(1);
        self
    }

    /// Set the base batch-get backoff
    pub fn batch_get_backoff(mut self, backoff: Duration) -> Self {
        self.batch_get_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable strongly consistent reads
    pub fn consistent_reads(mut self, enabled: bool) -> Self {
        self.consistent_reads = enabled;
        self
    }

    /// Delay before batch-get attempt `attempt` (1-based; the first retry
    /// is attempt 1).
    pub fn batch_get_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(self.batch_get_backoff_ms.saturating_mul(factor))
    }
}
