use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;

/// Tuning knobs of a [`crate::CmdRepo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    /// Wait before the first resend of an unacknowledged batch.
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,

    /// Upper bound for the exponential resend backoff.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Resends allowed before `tick` reports a timeout, unlimited when absent.
    #[serde(default)]
    pub max_resend_attempts: Option<u32>,

    /// Mergeable cmds created within this window fold into their predecessor.
    #[serde(default = "default_merge_window_ms")]
    pub merge_window_ms: u64,

    /// Most cmds submitted in one batch.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_submit_timeout_ms() -> u64 {
    5_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_merge_window_ms() -> u64 {
    800
}

fn default_max_batch() -> usize {
    32
}

impl RepoConfig {
    /// Backoff before resend number `attempts + 1`.
    pub fn backoff_ms(&self, attempts: u32) -> u64 {
        let factor = 1u64.checked_shl(attempts.min(63)).unwrap_or(u64::MAX);
        self.submit_timeout_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms.max(self.submit_timeout_ms))
    }
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            submit_timeout_ms: default_submit_timeout_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_resend_attempts: None,
            merge_window_ms: default_merge_window_ms(),
            max_batch: default_max_batch(),
        }
    }
}

/// Millisecond time source, injectable so timing is testable.
pub trait Clock {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Rc<Cell<i64>>);

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self(Rc::new(Cell::new(now_ms)))
    }

    pub fn set(&self, now_ms: i64) {
        self.0.set(now_ms);
    }

    pub fn advance(&self, ms: i64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{ "submitTimeoutMs": 1000, "maxResendAttempts": 3 }"#;

        let config: RepoConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.submit_timeout_ms, 1_000);
        assert_eq!(config.max_resend_attempts, Some(3));
        assert_eq!(config.merge_window_ms, 800);
        assert_eq!(config.max_batch, 32);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let config = RepoConfig::default();
        assert_eq!(config.backoff_ms(0), 5_000);
        assert_eq!(config.backoff_ms(1), 10_000);
        assert_eq!(config.backoff_ms(3), 40_000);
        assert_eq!(config.backoff_ms(4), 60_000);
        assert_eq!(config.backoff_ms(200), 60_000);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(10);
        let handle = clock.clone();
        handle.advance(5);
        assert_eq!(clock.now_ms(), 15);
    }
}
