// Shared fixtures for the behavior suites
use std::time::Duration;

pub use trendwatch_core::TrendsConfig;

/// Configuration with every pacing delay zeroed, for suites that run on
/// the real clock.
pub fn unpaced_config() -> TrendsConfig {
    TrendsConfig {
        base_delay: Duration::ZERO,
        inter_kind_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        quota_limit: 1_000,
        ..TrendsConfig::default()
    }
}
