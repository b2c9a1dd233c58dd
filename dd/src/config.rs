//! dashd configuration types and loading

use eyre::{Context, Result};
use metricstore::{LibraryConfig, OriginConfig, create_connector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the project-local configuration file
pub const LOCAL_CONFIG: &str = "dashd.yml";

/// Main dashd configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the listener binds to
    pub bind: String,

    /// Write the process id here while running
    #[serde(rename = "pid-file")]
    pub pid_file: Option<PathBuf>,

    /// Append log output to this file instead of stderr
    #[serde(rename = "server-log")]
    pub server_log: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Graph and collection definitions
    pub library: LibraryConfig,

    /// Metric origins by name
    pub origins: BTreeMap<String, OriginConfig>,

    /// Origin refresh behaviour
    pub refresh: RefreshConfig,

    /// Shutdown timeouts
    pub shutdown: ShutdownConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:12003".to_string(),
            pid_file: None,
            server_log: None,
            log_level: None,
            library: LibraryConfig::default(),
            origins: BTreeMap::new(),
            refresh: RefreshConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration before use
    ///
    /// Parses the bind address, builds every origin's connector once and
    /// checks the refresh settings. Nothing live is touched, so reload can
    /// call this before swapping anything in.
    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        for (name, origin) in &self.origins {
            if name.is_empty() {
                return Err(eyre::eyre!("Origin names must not be empty"));
            }
            create_connector(name, &origin.connector).context(format!("Invalid origin '{}'", name))?;
        }

        if self.refresh.attempts == 0 {
            return Err(eyre::eyre!("refresh.attempts must be at least 1"));
        }
        if self.refresh.timeout_ms == 0 {
            return Err(eyre::eyre!("refresh.timeout-ms must be greater than 0"));
        }

        if let Some(level) = &self.log_level {
            crate::logging::parse_level(level)?;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .context(format!("Invalid bind address '{}'", self.bind))
    }

    /// Find the configuration file to use
    ///
    /// An explicit path always wins. Otherwise `./dashd.yml`, then
    /// `~/.config/dashd/dashd.yml`. `None` means run on defaults.
    pub fn locate(config_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = config_path {
            return Some(path.to_path_buf());
        }

        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            return Some(local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("dashd").join(LOCAL_CONFIG);
            if user_config.exists() {
                return Some(user_config);
            }
        }
        None
    }

    /// Load a located configuration; `None` gives the defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => {
                Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()))
            }
            None => {
                tracing::info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::debug!(path = %path.as_ref().display(), origins = config.origins.len(), "Loaded config");
        Ok(config)
    }
}

/// Origin refresh configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between periodic refreshes of every origin (0 disables)
    #[serde(rename = "interval-secs")]
    pub interval_secs: u64,

    /// Attempts per refresh before giving up
    pub attempts: u32,

    /// Delay before the first retry
    #[serde(rename = "backoff-ms")]
    pub backoff_ms: u64,

    /// Upper bound for the retry delay
    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    /// Time allowed for a single listing attempt
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            attempts: 3,
            backoff_ms: 500,
            max_backoff_ms: 10_000,
            timeout_ms: 30_000,
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

/// Shutdown configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time origin workers get to finish their queues
    #[serde(rename = "worker-timeout-secs")]
    pub worker_timeout_secs: u64,

    /// Time open connections get to finish
    #[serde(rename = "drain-timeout-secs")]
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            worker_timeout_secs: 10,
            drain_timeout_secs: 10,
        }
    }
}

impl ShutdownConfig {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metricstore::ConnectorConfig;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.bind, "127.0.0.1:12003");
        assert!(config.pid_file.is_none());
        assert!(config.origins.is_empty());
        assert_eq!(config.refresh.attempts, 3);
        assert_eq!(config.shutdown.drain_timeout_secs, 10);
        config.validate().unwrap();
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
bind: 0.0.0.0:8080
pid-file: /run/dashd.pid
server-log: /var/log/dashd.log
log-level: debug

library:
  path: /var/lib/dashd/library

origins:
  collectd:
    connector:
      type: file
      path: /var/lib/collectd/rrd
  graphite:
    connector:
      type: graphite
      url: http://graphite.example.net
      timeout-ms: 2000

refresh:
  interval-secs: 0
  attempts: 5
  backoff-ms: 100

shutdown:
  drain-timeout-secs: 3
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.pid_file, Some(PathBuf::from("/run/dashd.pid")));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.origins.len(), 2);
        assert!(matches!(
            config.origins["graphite"].connector,
            ConnectorConfig::Graphite { timeout_ms: 2000, .. }
        ));
        assert_eq!(config.origins["collectd"].connector.kind(), "file");
        assert_eq!(config.refresh.interval(), None);
        assert_eq!(config.refresh.attempts, 5);
        // Defaults for unspecified
        assert_eq!(config.refresh.max_backoff_ms, 10_000);
        assert_eq!(config.shutdown.worker_timeout_secs, 10);
        assert_eq!(config.shutdown.drain_timeout(), Duration::from_secs(3));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_bind() {
        let config = Config {
            bind: "not an address".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let yaml = r#"
origins:
  broken:
    connector:
      type: file
      path: /tmp
      pattern: "^(?P<source>.+)$"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.refresh.attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.yml");
        fs::write(&path, "bind: 127.0.0.1:9999\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9999");
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(path.as_path())).is_err());
    }

    #[test]
    #[serial]
    fn test_locate_prefers_explicit_then_local() {
        let temp = TempDir::new().unwrap();
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(temp.path()).unwrap();

        fs::write(LOCAL_CONFIG, "bind: 127.0.0.1:1\n").unwrap();
        let explicit = PathBuf::from("/etc/dashd/other.yml");
        assert_eq!(Config::locate(Some(explicit.as_path())), Some(explicit.clone()));
        assert_eq!(Config::locate(None), Some(PathBuf::from(LOCAL_CONFIG)));

        std::env::set_current_dir(previous).unwrap();
    }
}
