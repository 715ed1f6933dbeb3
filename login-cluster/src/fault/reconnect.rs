use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::FaultToleranceConfig;

/// A request for the reconnect worker
#[derive(Debug, Clone)]
pub struct ReconnectRequest {
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

impl ReconnectRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            requested_at: Utc::now(),
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based):
/// `initial * multiplier^(attempt-1)` capped at `max_backoff`, plus jitter.
pub fn backoff_delay(config: &FaultToleranceConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(64) as i32;
    let raw = config.initial_backoff.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let base = Duration::try_from_secs_f64(raw.min(config.max_backoff.as_secs_f64()))
        .unwrap_or(config.max_backoff);

    let jitter_ms = config.backoff_jitter.as_millis() as u64;
    if jitter_ms == 0 {
        base
    } else {
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FaultToleranceConfig {
        FaultToleranceConfig {
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
            backoff_jitter: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = config();

        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&config, 4), Duration::from_secs(8));
        assert_eq!(backoff_delay(&config, 5), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 40), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let config = FaultToleranceConfig {
            backoff_jitter: Duration::from_millis(50),
            ..config()
        };

        for _ in 0..20 {
            let delay = backoff_delay(&config, 1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1050));
        }
    }

    #[test]
    fn multiplier_of_one_is_flat() {
        let config = FaultToleranceConfig {
            backoff_multiplier: 1.0,
            ..config()
        };

        assert_eq!(backoff_delay(&config, 1), backoff_delay(&config, 6));
    }
}
