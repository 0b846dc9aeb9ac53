// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Agent configuration loading from environment variables.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Host prefixes selecting the pull strategy (matched case-insensitively).
const PULL_PREFIXES: [&str; 2] = ["http:", "https:"];

/// Separator between endpoints in a pull host list.
pub const ENDPOINT_SEPARATOR: char = '|';

/// How configuration reaches the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Persistent authenticated session; the controller pushes commands.
    Push {
        /// Controller address, or `None` to derive it from the jid.
        server: Option<String>,
    },
    /// Repeated or streaming HTTP GETs against an ordered endpoint list.
    Pull { endpoints: Vec<String> },
}

/// Conflate agent configuration
#[derive(Clone)]
pub struct AgentConfig {
    /// Identity used to authenticate (and for HTTP basic auth when pulling)
    pub jid: String,
    /// Password for `jid`
    pub password: String,
    /// Controller address, or a `|`-separated list of HTTP endpoints
    pub host: Option<String>,
    /// Software name reported by version queries
    pub software: String,
    /// Software version reported by version queries
    pub version: String,
    /// Path of the SQLite file holding the last applied configuration
    pub save_path: PathBuf,
    /// Delay before reconnecting a lost push session
    pub reconnect_delay: Duration,
    /// Period of the push session keepalive
    pub keepalive_interval: Duration,
    /// Pause between passes over the pull endpoint list
    pub poll_retry_delay: Duration,
    /// Period of the alarm drain on a push session
    pub alarm_interval: Duration,
    /// Connection and authentication timeout
    pub connect_timeout: Duration,
    /// Skip TLS certificate verification (development only)
    pub dangerous_skip_cert_verification: bool,
}

impl AgentConfig {
    /// A configuration with default timings.
    pub fn new(
        jid: impl Into<String>,
        password: impl Into<String>,
        save_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jid: jid.into(),
            password: password.into(),
            host: None,
            software: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            save_path: save_path.into(),
            reconnect_delay: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(60),
            poll_retry_delay: Duration::from_secs(1),
            alarm_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            dangerous_skip_cert_verification: false,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CONFLATE_JID`: identity to authenticate as
    /// - `CONFLATE_PASSWORD`: password for the identity
    /// - `CONFLATE_SAVE_PATH`: SQLite file for the stored configuration
    ///
    /// Optional (with defaults):
    /// - `CONFLATE_HOST`: controller address or `|`-separated HTTP endpoints (default: derived from jid)
    /// - `CONFLATE_SOFTWARE`: software name (default: crate name)
    /// - `CONFLATE_VERSION`: software version (default: crate version)
    /// - `CONFLATE_RECONNECT_DELAY_MS`: push reconnect delay (default: 5000)
    /// - `CONFLATE_KEEPALIVE_MS`: push keepalive period (default: 60000)
    /// - `CONFLATE_POLL_RETRY_MS`: pause between pull passes (default: 1000)
    /// - `CONFLATE_ALARM_INTERVAL_MS`: alarm drain period (default: 10000)
    /// - `CONFLATE_CONNECT_TIMEOUT_MS`: connect timeout (default: 10000)
    /// - `CONFLATE_SKIP_CERT_VERIFICATION`: `true` to trust any certificate (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let jid = required("CONFLATE_JID")?;
        let password = required("CONFLATE_PASSWORD")?;
        let save_path = required("CONFLATE_SAVE_PATH")?;

        let mut config = Self::new(jid, password, save_path);
        config.host = std::env::var("CONFLATE_HOST")
            .ok()
            .filter(|h| !h.trim().is_empty());
        if let Ok(software) = std::env::var("CONFLATE_SOFTWARE") {
            config.software = software;
        }
        if let Ok(version) = std::env::var("CONFLATE_VERSION") {
            config.version = version;
        }

        config.reconnect_delay = millis("CONFLATE_RECONNECT_DELAY_MS", config.reconnect_delay)?;
        config.keepalive_interval = millis("CONFLATE_KEEPALIVE_MS", config.keepalive_interval)?;
        config.poll_retry_delay = millis("CONFLATE_POLL_RETRY_MS", config.poll_retry_delay)?;
        config.alarm_interval = millis("CONFLATE_ALARM_INTERVAL_MS", config.alarm_interval)?;
        config.connect_timeout = millis("CONFLATE_CONNECT_TIMEOUT_MS", config.connect_timeout)?;

        config.dangerous_skip_cert_verification = match std::env::var(
            "CONFLATE_SKIP_CERT_VERIFICATION",
        ) {
            Ok(v) => v.parse().map_err(|_| {
                ConfigError::Invalid("CONFLATE_SKIP_CERT_VERIFICATION", "must be true or false")
            })?,
            Err(_) => false,
        };

        Ok(config)
    }

    /// Pick the delivery strategy from `host`.
    ///
    /// A host whose first endpoint starts with `http:` or `https:`
    /// (any case) selects pull; anything else selects push.
    pub fn strategy(&self) -> Strategy {
        let Some(host) = self.host.as_deref() else {
            return Strategy::Push { server: None };
        };

        let first = host.split(ENDPOINT_SEPARATOR).next().unwrap_or_default().trim();
        let is_pull = PULL_PREFIXES.iter().any(|prefix| {
            first
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        });

        if is_pull {
            Strategy::Pull {
                endpoints: host
                    .split(ENDPOINT_SEPARATOR)
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(String::from)
                    .collect(),
            }
        } else {
            Strategy::Push {
                server: Some(host.trim().to_string()),
            }
        }
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("jid", &self.jid)
            .field("password", &"***")
            .field("host", &self.host)
            .field("software", &self.software)
            .field("version", &self.version)
            .field("save_path", &self.save_path)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("poll_retry_delay", &self.poll_retry_delay)
            .field("alarm_interval", &self.alarm_interval)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn millis(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid(key, "must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const OPTIONAL: [&str; 9] = [
        "CONFLATE_HOST",
        "CONFLATE_SOFTWARE",
        "CONFLATE_VERSION",
        "CONFLATE_RECONNECT_DELAY_MS",
        "CONFLATE_KEEPALIVE_MS",
        "CONFLATE_POLL_RETRY_MS",
        "CONFLATE_ALARM_INTERVAL_MS",
        "CONFLATE_CONNECT_TIMEOUT_MS",
        "CONFLATE_SKIP_CERT_VERIFICATION",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }

        fn required(&mut self) {
            self.set("CONFLATE_JID", "agent@example.com/box");
            self.set("CONFLATE_PASSWORD", "secret");
            self.set("CONFLATE_SAVE_PATH", "/tmp/conflate.db");
            for key in OPTIONAL {
                self.remove(key);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.required();

        let config = AgentConfig::from_env().unwrap();

        assert_eq!(config.jid, "agent@example.com/box");
        assert_eq!(config.password, "secret");
        assert_eq!(config.save_path, PathBuf::from("/tmp/conflate.db"));
        assert_eq!(config.host, None);
        assert_eq!(config.software, "conflate-core");
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.keepalive_interval, Duration::from_secs(60));
        assert_eq!(config.poll_retry_delay, Duration::from_secs(1));
        assert!(!config.dangerous_skip_cert_verification);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.required();
        guard.set("CONFLATE_HOST", "controller.internal:7443");
        guard.set("CONFLATE_SOFTWARE", "memcached");
        guard.set("CONFLATE_VERSION", "1.4.0");
        guard.set("CONFLATE_RECONNECT_DELAY_MS", "250");
        guard.set("CONFLATE_KEEPALIVE_MS", "1000");
        guard.set("CONFLATE_SKIP_CERT_VERIFICATION", "true");

        let config = AgentConfig::from_env().unwrap();

        assert_eq!(config.host.as_deref(), Some("controller.internal:7443"));
        assert_eq!(config.software, "memcached");
        assert_eq!(config.version, "1.4.0");
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.keepalive_interval, Duration::from_secs(1));
        assert!(config.dangerous_skip_cert_verification);
    }

    #[test]
    fn test_config_missing_jid() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.required();
        guard.remove("CONFLATE_JID");

        let result = AgentConfig::from_env();
        assert!(matches!(result, Err(ConfigError::Missing("CONFLATE_JID"))));
    }

    #[test]
    fn test_config_invalid_duration() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.required();
        guard.set("CONFLATE_POLL_RETRY_MS", "soon");

        let result = AgentConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::Invalid("CONFLATE_POLL_RETRY_MS", _))
        ));
    }

    #[test]
    fn test_blank_host_is_unset() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.required();
        guard.set("CONFLATE_HOST", "  ");

        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.strategy(), Strategy::Push { server: None });
    }

    #[test]
    fn test_strategy_pull_endpoints() {
        let config = AgentConfig::new("a", "p", "db")
            .with_host("HTTP://one.example/config|http://two.example/config");
        assert_eq!(
            config.strategy(),
            Strategy::Pull {
                endpoints: vec![
                    "HTTP://one.example/config".to_string(),
                    "http://two.example/config".to_string(),
                ]
            }
        );
    }

    #[test]
    fn test_strategy_https_is_pull() {
        let config = AgentConfig::new("a", "p", "db").with_host("https://cfg.example/");
        assert!(matches!(config.strategy(), Strategy::Pull { .. }));
    }

    #[test]
    fn test_strategy_push() {
        let config = AgentConfig::new("a", "p", "db").with_host("controller.internal");
        assert_eq!(
            config.strategy(),
            Strategy::Push {
                server: Some("controller.internal".to_string())
            }
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = AgentConfig::new("agent@example.com", "hunter2", "db");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
    }
}
