//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default scan daemon endpoint (Dr.Web Rspamd HTTP listener).
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:8020";

/// Default CommuniGate Pro working directory.
pub const DEFAULT_CGP_PATH: &str = "/var/CommuniGate";

/// Helper configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct HelperConfig {
    /// Scan daemon endpoint: `ip:port` for TCP, anything else is a socket path.
    pub endpoint: String,
    /// CommuniGate Pro working directory (`Queue/` and `Submitted/` live here).
    pub cgp_path: PathBuf,
    /// Timeout for establishing the daemon connection.
    pub connect_timeout: Duration,
    /// Timeout for the whole scan round trip.
    pub request_timeout: Duration,
    /// Maximum number of concurrently running workers (`None` = unbounded).
    pub max_workers: Option<usize>,
    /// Listener tick used for worker maintenance between stdin events.
    pub poll_interval: Duration,
    /// How long in-flight workers may keep running after stdin closes.
    pub drain_timeout: Duration,
    /// Directory for rolling log files (`None` = stderr).
    pub log_dir: Option<PathBuf>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            cgp_path: PathBuf::from(DEFAULT_CGP_PATH),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
            max_workers: None,
            poll_interval: Duration::from_millis(50),
            drain_timeout: Duration::from_secs(5),
            log_dir: None,
        }
    }
}

impl HelperConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let endpoint = lookup("RSPAMD_SOCKET")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.endpoint);

        let cgp_path = lookup("CGP_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.cgp_path);

        let connect_timeout = parse_var(&lookup, "RSPAMD_CONNECT_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout);

        let request_timeout = parse_var(&lookup, "RSPAMD_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);

        let max_workers = match parse_var::<usize, _>(&lookup, "HELPER_MAX_WORKERS")? {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    key: "HELPER_MAX_WORKERS".into(),
                    message: "must be at least 1 (unset it for no limit)".into(),
                });
            }
            other => other,
        };

        let poll_interval = parse_var(&lookup, "HELPER_POLL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let drain_timeout = parse_var(&lookup, "HELPER_DRAIN_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.drain_timeout);

        let log_dir = lookup("HELPER_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            endpoint,
            cgp_path,
            connect_timeout,
            request_timeout,
            max_workers,
            poll_interval,
            drain_timeout,
            log_dir,
        })
    }

    /// Directory the server picks submitted messages up from.
    pub fn submitted_dir(&self) -> PathBuf {
        self.cgp_path.join("Submitted")
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
    }
}
