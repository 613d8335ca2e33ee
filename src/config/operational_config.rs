//! Operational toggles: dry-run, testing mode, and reconciliation tunables.

use std::env;

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Process-wide toggles read once at startup and threaded through the
/// application layer; `domain::strategy` never reads these itself.
#[derive(Debug, Clone)]
pub struct OperationalConfig {
    /// When set, Actions are computed and logged but never submitted to the
    /// Broker Gateway or written to the Cycle Store.
    pub dry_run_mode: bool,
    /// When set, buy limit prices are inflated 5% above ask to force
    /// immediate fills against a simulated order book.
    pub testing_mode: bool,
    /// Relaxes broker-credential validation for integration tests run
    /// against a local mock exchange.
    pub integration_test_mode: bool,
    /// Minimum seconds between dispatched actions for the same symbol.
    pub order_cooldown_seconds: u64,
    /// Age threshold, in minutes, past which an open order is considered
    /// stale by the Stale-Order Canceller and Consistency Checker.
    pub stale_order_threshold_minutes: i64,
    /// Age threshold, in seconds, past which a stuck market sell is
    /// re-examined by the Stale-Order Canceller.
    pub stuck_market_sell_timeout_seconds: i64,
}

impl OperationalConfig {
    pub fn from_env() -> Self {
        Self {
            dry_run_mode: env_flag("DRY_RUN_MODE"),
            testing_mode: env_flag("TESTING_MODE"),
            integration_test_mode: env_flag("INTEGRATION_TEST_MODE"),
            order_cooldown_seconds: env::var("ORDER_COOLDOWN_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            stale_order_threshold_minutes: env::var("STALE_ORDER_THRESHOLD_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            stuck_market_sell_timeout_seconds: env::var("STUCK_MARKET_SELL_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(75),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_accepts_common_truthy_spellings() {
        assert!(matches!("true".to_lowercase().as_str(), "1" | "true" | "yes" | "on"));
        assert!(matches!("ON".to_lowercase().as_str(), "1" | "true" | "yes" | "on"));
    }

    #[test]
    fn defaults_match_spec_thresholds() {
        // Mirrors the values consulted when the env vars are absent.
        let cfg = OperationalConfig {
            dry_run_mode: false,
            testing_mode: false,
            integration_test_mode: false,
            order_cooldown_seconds: 5,
            stale_order_threshold_minutes: 5,
            stuck_market_sell_timeout_seconds: 75,
        };
        assert_eq!(cfg.order_cooldown_seconds, 5);
        assert_eq!(cfg.stuck_market_sell_timeout_seconds, 75);
    }
}
