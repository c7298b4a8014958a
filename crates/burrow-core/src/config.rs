//! Configuration types for BurrowDB
//!
//! This module defines the engine configuration and its defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When the persistence log is fsynced
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPolicy {
    /// Sync after every commit (safest, slowest)
    Always,
    /// Sync from the maintenance thread once per tick
    EverySecond,
    /// Never sync explicitly; leave it to the OS
    Never,
}

/// Engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbConfig {
    /// Fsync policy for the persistence log
    pub sync_policy: SyncPolicy,
    /// Interval between maintenance passes (expiration sweep, auto
    /// shrink check, deferred sync)
    pub maintenance_interval: Duration,
    /// Disable automatic log shrinking
    pub auto_shrink_disabled: bool,
    /// Auto-shrink when the log has grown by this percentage over its
    /// size after the last shrink
    pub auto_shrink_percentage: u64,
    /// Never auto-shrink a log smaller than this many bytes
    pub auto_shrink_min_size: u64,
    /// Disable the background maintenance thread entirely
    pub background_maintenance: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            sync_policy: SyncPolicy::EverySecond,
            maintenance_interval: Duration::from_secs(1),
            auto_shrink_disabled: false,
            auto_shrink_percentage: 100,
            auto_shrink_min_size: 32 * 1024 * 1024, // 32 MB
            background_maintenance: true,
        }
    }
}

impl DbConfig {
    /// Config with no background thread, for callers that drive
    /// maintenance themselves
    #[must_use]
    pub fn manual() -> Self {
        Self {
            background_maintenance: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.sync_policy, SyncPolicy::EverySecond);
        assert!(!config.auto_shrink_disabled);
        assert!(config.background_maintenance);
    }

    #[test]
    fn test_manual_config() {
        assert!(!DbConfig::manual().background_maintenance);
    }
}
