//! Migrator configuration.

use std::time::Duration;

use serde::Deserialize;

/// Settings for a migration run. Durations are held in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Serialize runs across instances through the lock table.
    pub locking: bool,
    /// How long to wait for the lock before giving up.
    pub lock_timeout_ms: u64,
    /// Age after which a held lock is considered abandoned. Lock stamps
    /// have one-second resolution, so anything shorter counts as a second.
    pub lock_lease_ms: u64,
    /// Initial delay between lock attempts; doubles up to two seconds.
    pub lock_poll_interval_ms: u64,
    /// Render and trace pending SQL without executing or logging it.
    pub dry_run: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            locking: true,
            lock_timeout_ms: 60_000,
            lock_lease_ms: 300_000,
            lock_poll_interval_ms: 200,
            dry_run: false,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl MigratorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables locking.
    #[must_use]
    pub const fn locking(mut self, locking: bool) -> Self {
        self.locking = locking;
        self
    }

    /// Sets the lock wait timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = millis(timeout);
        self
    }

    /// Sets the lock lease.
    #[must_use]
    pub fn lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease_ms = millis(lease);
        self
    }

    /// Sets the initial lock poll interval.
    #[must_use]
    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval_ms = millis(interval);
        self
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Lock wait timeout.
    #[must_use]
    pub const fn lock_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Lock lease, at least one second.
    #[must_use]
    pub fn lock_lease_duration(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ms).max(Duration::from_secs(1))
    }

    /// Initial lock poll interval, at least one millisecond.
    #[must_use]
    pub fn lock_poll_interval_duration(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MigratorConfig::default();
        assert!(config.locking);
        assert!(!config.dry_run);
        assert_eq!(config.lock_timeout_duration(), Duration::from_secs(60));
        assert_eq!(config.lock_lease_duration(), Duration::from_secs(300));
        assert_eq!(
            config.lock_poll_interval_duration(),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: MigratorConfig =
            serde_json::from_str(r#"{"lock_timeout_ms": 5000, "dry_run": true}"#).unwrap();
        assert_eq!(config.lock_timeout_duration(), Duration::from_secs(5));
        assert!(config.dry_run);
        assert!(config.locking);
        assert_eq!(config.lock_lease_ms, 300_000);
    }

    #[test]
    fn test_builder() {
        let config = MigratorConfig::new()
            .locking(false)
            .lock_timeout(Duration::from_secs(3))
            .lock_poll_interval(Duration::from_millis(25));
        assert!(!config.locking);
        assert_eq!(config.lock_timeout_ms, 3_000);
        assert_eq!(config.lock_poll_interval_ms, 25);
    }

    #[test]
    fn test_sub_second_durations_survive() {
        let config = MigratorConfig::new()
            .lock_timeout(Duration::from_millis(1_500))
            .lock_lease(Duration::from_millis(900));
        assert_eq!(config.lock_timeout_duration(), Duration::from_millis(1_500));
        assert_eq!(config.lock_lease_duration(), Duration::from_secs(1));

        let config = MigratorConfig::new().lock_timeout(Duration::from_millis(250));
        assert_eq!(config.lock_timeout_duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_durations_are_clamped() {
        let config = MigratorConfig::new()
            .lock_lease(Duration::ZERO)
            .lock_poll_interval(Duration::ZERO);
        assert_eq!(config.lock_lease_duration(), Duration::from_secs(1));
        assert_eq!(config.lock_poll_interval_duration(), Duration::from_millis(1));
    }
}
