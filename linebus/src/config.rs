//! Configuration for GPIO event delivery.
//!
//! Parses environment variables selecting the debounce strategy and the
//! poller wait timeout.

use std::time::Duration;

use crate::event::debounce::DebounceStrategy;
use crate::tracing::prelude::*;

/// Environment variable selecting the debounce strategy.
pub const DEBOUNCE_STRATEGY_VAR: &str = "LINEBUS_GPIO_DEBOUNCE_STRATEGY";

/// Environment variable holding the poller wait timeout in milliseconds.
pub const POLL_TIMEOUT_VAR: &str = "LINEBUS_GPIO_POLL_TIMEOUT_MS";

const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Event delivery configuration parsed from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConfig {
    /// How raw line events are debounced before reaching listeners.
    pub debounce_strategy: DebounceStrategy,

    /// Upper bound on one poller wait. Also bounds how long `stop` takes
    /// to be observed.
    pub poll_timeout: Duration,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            debounce_strategy: DebounceStrategy::default(),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
        }
    }
}

impl EventConfig {
    /// Parse configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LINEBUS_GPIO_DEBOUNCE_STRATEGY`: `SOFTWARE_LEADING_EDGE` (default),
    ///   `SOFTWARE_TRAILING_EDGE`, `SOFTWARE_STABILITY` or `HARDWARE`,
    ///   case-insensitive
    /// - `LINEBUS_GPIO_POLL_TIMEOUT_MS`: poll timeout (default: 100, clamped
    ///   to 1-10000)
    pub fn from_env() -> Self {
        let debounce_strategy = match std::env::var(DEBOUNCE_STRATEGY_VAR) {
            Ok(value) => value.trim().parse().unwrap_or_else(|_| {
                warn!(
                    value = %value,
                    "Unknown debounce strategy, using {}",
                    DebounceStrategy::default()
                );
                DebounceStrategy::default()
            }),
            Err(_) => DebounceStrategy::default(),
        };

        let timeout_ms = std::env::var(POLL_TIMEOUT_VAR)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_POLL_TIMEOUT_MS)
            .clamp(1, 10_000);

        Self {
            debounce_strategy,
            poll_timeout: Duration::from_millis(timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_when_not_set() {
        std::env::remove_var(DEBOUNCE_STRATEGY_VAR);
        std::env::remove_var(POLL_TIMEOUT_VAR);

        let config = EventConfig::from_env();
        assert_eq!(config, EventConfig::default());
        assert_eq!(
            config.debounce_strategy,
            DebounceStrategy::SoftwareLeadingEdge
        );
    }

    #[test]
    #[serial]
    fn test_strategy_parsed_case_insensitive() {
        std::env::set_var(DEBOUNCE_STRATEGY_VAR, "software_trailing_edge");
        assert_eq!(
            EventConfig::from_env().debounce_strategy,
            DebounceStrategy::SoftwareTrailingEdge
        );

        std::env::set_var(DEBOUNCE_STRATEGY_VAR, "HARDWARE");
        assert_eq!(
            EventConfig::from_env().debounce_strategy,
            DebounceStrategy::Hardware
        );

        std::env::set_var(DEBOUNCE_STRATEGY_VAR, "bogus");
        assert_eq!(
            EventConfig::from_env().debounce_strategy,
            DebounceStrategy::SoftwareLeadingEdge
        );
        std::env::remove_var(DEBOUNCE_STRATEGY_VAR);
    }

    #[test]
    #[serial]
    fn test_poll_timeout_clamped() {
        std::env::set_var(POLL_TIMEOUT_VAR, "0");
        assert_eq!(EventConfig::from_env().poll_timeout, Duration::from_millis(1));

        std::env::set_var(POLL_TIMEOUT_VAR, "99999");
        assert_eq!(
            EventConfig::from_env().poll_timeout,
            Duration::from_millis(10_000)
        );
        std::env::remove_var(POLL_TIMEOUT_VAR);
    }
}
