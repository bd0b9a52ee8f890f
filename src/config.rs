// Runtime configuration resolved from the command line

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Tuning applied to every physical pool a plugin opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_size: u32,
    /// `0` disables the idle floor
    pub min_idle: u32,
    pub idle_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl PoolSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn min_idle(&self) -> Option<u32> {
        (self.min_idle > 0).then_some(self.min_idle.min(self.max_size))
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 1,
            idle_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Everything the server needs to start
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub pool: PoolSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults() {
        let settings = PoolSettings::default();

        assert_eq!(settings.max_size, 10);
        assert_eq!(settings.min_idle(), Some(1));
        assert_eq!(settings.idle_timeout(), Duration::from_secs(30));
        assert_eq!(settings.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_min_idle_zero_disables_floor() {
        let settings = PoolSettings {
            min_idle: 0,
            ..PoolSettings::default()
        };
        assert_eq!(settings.min_idle(), None);

        let settings = PoolSettings {
            max_size: 2,
            min_idle: 5,
            ..PoolSettings::default()
        };
        assert_eq!(settings.min_idle(), Some(2));
    }
}
