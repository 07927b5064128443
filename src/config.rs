use std::path::PathBuf;
use std::time::Duration;

use crate::kv::SqliteBackend;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    /// How often mounted cards re-read their collections.
    pub poll_interval: Duration,
    /// Age at which a pending universal posting is activated without review.
    pub auto_approve_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: SqliteBackend::default_path(),
            poll_interval: Duration::from_millis(1000),
            auto_approve_after: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Apply overrides on top of the defaults; `None` keeps the default.
    pub fn with_overrides(
        db_path: Option<PathBuf>,
        poll_ms: Option<u64>,
        auto_approve_secs: Option<u64>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            db_path: db_path.unwrap_or(defaults.db_path),
            // A zero interval would spin the poll loop
            poll_interval: poll_ms
                .map(|ms| Duration::from_millis(ms.max(50)))
                .unwrap_or(defaults.poll_interval),
            auto_approve_after: auto_approve_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.auto_approve_after),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dashboard_timings() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.auto_approve_after, Duration::from_secs(10));
        assert!(config.db_path.ends_with("campus2career.db"));
    }

    #[test]
    fn overrides_replace_defaults() {
        let config = Config::with_overrides(Some(PathBuf::from("/tmp/x.db")), Some(2000), Some(0));
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.auto_approve_after, Duration::ZERO);
    }

    #[test]
    fn poll_interval_has_a_floor() {
        let config = Config::with_overrides(None, Some(0), None);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }
}
