//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

/// Worker loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Minimum spacing between reclamation passes.
    pub reclaim_interval: Duration,
    /// How long the worker blocks on the queue when no reclamation is owed.
    pub idle_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reclaim_interval: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(1000),
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bind address.
    pub listen: String,
    /// Bind port.
    pub port: u16,
    /// Capacity of the per-client event fan-out channel.
    pub broadcast_capacity: usize,
    pub worker: WorkerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: 8188,
            broadcast_capacity: 256,
            worker: WorkerConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen: std::env::var("PROMPTD_LISTEN").unwrap_or(defaults.listen),
            port: env_parse("PROMPTD_PORT", defaults.port),
            broadcast_capacity: env_parse("PROMPTD_BROADCAST_CAPACITY", defaults.broadcast_capacity),
            worker: WorkerConfig {
                reclaim_interval: Duration::from_secs_f64(env_parse(
                    "PROMPTD_RECLAIM_INTERVAL_SECS",
                    defaults.worker.reclaim_interval.as_secs_f64(),
                )),
                idle_timeout: Duration::from_secs_f64(env_parse(
                    "PROMPTD_IDLE_TIMEOUT_SECS",
                    defaults.worker.idle_timeout.as_secs_f64(),
                )),
            },
        }
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServiceConfig::default();
        assert_eq!(config.port, 8188);
        assert!(config.worker.reclaim_interval < config.worker.idle_timeout);
    }
}
