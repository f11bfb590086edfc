use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{DetourError, Result};
use crate::pool::PoolConfig;
use crate::proxy::{ExecutorConfig, ProbeConfig};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// State persistence configuration
    pub storage: StorageConfig,
    /// Executor retry/fallback configuration
    pub executor: ExecutorSettings,
    /// Endpoint probing configuration
    pub probe: ProbeSettings,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path of the JSON state document (default: detour-state.json)
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Maximum proxied attempts per logical request
    pub max_attempts: u32,
    /// Pause between proxied attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Per-attempt timeout for proxied dispatches in seconds
    pub proxy_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Echo URL endpoints fetch during a probe round
    pub url: String,
    /// Per-probe timeout in seconds
    pub timeout_secs: u64,
    /// Concurrent probes in flight
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config {
            storage: StorageConfig {
                path: get_env_or("DETOUR_STORAGE_PATH", "detour-state.json"),
            },
            executor: ExecutorSettings {
                max_attempts: get_env_or("DETOUR_MAX_ATTEMPTS", "3").parse().unwrap_or(3),
                retry_delay_ms: get_env_or("DETOUR_RETRY_DELAY_MS", "1000")
                    .parse()
                    .unwrap_or(1000),
                proxy_timeout_secs: get_env_or("DETOUR_PROXY_TIMEOUT_SECS", "15")
                    .parse()
                    .unwrap_or(15),
            },
            probe: ProbeSettings {
                url: get_env_or("DETOUR_PROBE_URL", "https://api.ipify.org"),
                timeout_secs: get_env_or("DETOUR_PROBE_TIMEOUT_SECS", "10")
                    .parse()
                    .unwrap_or(10),
                workers: get_env_or("DETOUR_PROBE_WORKERS", "4").parse().unwrap_or(4),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        };

        validate_probe_url(&config.probe.url)?;
        Ok(config)
    }

    /// Executor configuration derived from the environment settings
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_attempts: self.executor.max_attempts,
            retry_delay: Duration::from_millis(self.executor.retry_delay_ms),
            proxy_timeout: Duration::from_secs(self.executor.proxy_timeout_secs),
        }
    }

    /// Probe configuration derived from the environment settings
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            url: self.probe.url.clone(),
            timeout: Duration::from_secs(self.probe.timeout_secs),
            workers: self.probe.workers,
        }
    }

    /// Pool configuration derived from the environment settings
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::default()
    }
}

fn validate_probe_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| {
        DetourError::InvalidConfig(format!("DETOUR_PROBE_URL must be a valid URL: {}", e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(DetourError::InvalidConfig(format!(
            "DETOUR_PROBE_URL has unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(DetourError::InvalidConfig(
            "DETOUR_PROBE_URL must include a host".into(),
        ));
    }

    Ok(())
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "DETOUR_STORAGE_PATH",
        "DETOUR_MAX_ATTEMPTS",
        "DETOUR_RETRY_DELAY_MS",
        "DETOUR_PROXY_TIMEOUT_SECS",
        "DETOUR_PROBE_URL",
        "DETOUR_PROBE_TIMEOUT_SECS",
        "DETOUR_PROBE_WORKERS",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.storage.path, "detour-state.json");
        assert_eq!(config.executor.max_attempts, 3);
        assert_eq!(config.executor.retry_delay_ms, 1000);
        assert_eq!(config.executor.proxy_timeout_secs, 15);
        assert_eq!(config.probe.url, "https://api.ipify.org");
        assert_eq!(config.probe.timeout_secs, 10);
        assert_eq!(config.probe.workers, 4);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "pretty");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("DETOUR_STORAGE_PATH", "/var/lib/detour/state.json");
        env::set_var("DETOUR_MAX_ATTEMPTS", "5");
        env::set_var("DETOUR_RETRY_DELAY_MS", "250");
        env::set_var("DETOUR_PROBE_URL", "https://checkip.example.com/plain");
        env::set_var("DETOUR_PROBE_WORKERS", "8");
        env::set_var("LOG_FORMAT", "json");

        let config = Config::from_env().unwrap();

        assert_eq!(config.storage.path, "/var/lib/detour/state.json");
        assert_eq!(config.executor.max_attempts, 5);
        assert_eq!(config.executor.retry_delay_ms, 250);
        assert_eq!(config.probe.url, "https://checkip.example.com/plain");
        assert_eq!(config.probe.workers, 8);
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_config_unparseable_numbers_fall_back_to_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("DETOUR_MAX_ATTEMPTS", "many");
        env::set_var("DETOUR_RETRY_DELAY_MS", "-5");

        let config = Config::from_env().unwrap();
        assert_eq!(config.executor.max_attempts, 3);
        assert_eq!(config.executor.retry_delay_ms, 1000);
    }

    #[test]
    fn test_config_invalid_probe_url() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("DETOUR_PROBE_URL", "not a url");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, DetourError::InvalidConfig(_)));

        env::set_var("DETOUR_PROBE_URL", "ftp://probe.example.com");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, DetourError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_converters() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        let executor = config.executor_config();
        assert_eq!(executor.max_attempts, 3);
        assert_eq!(executor.retry_delay, Duration::from_millis(1000));
        assert_eq!(executor.proxy_timeout, Duration::from_secs(15));

        let probe = config.probe_config();
        assert_eq!(probe.url, "https://api.ipify.org");
        assert_eq!(probe.timeout, Duration::from_secs(10));
        assert_eq!(probe.workers, 4);
    }
}
