//! Server configuration loaded from environment variables.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use actors::{PoolConfig, QueueConfig};
use api::RouterConfig;
use db::DbConfig;

/// Errors from reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("ROAM_HEARTBEAT_SECS ({heartbeat}s) must be shorter than ROAM_LEASE_TTL_SECS ({ttl}s)")]
    HeartbeatTooSlow { heartbeat: u64, ttl: u64 },
}

/// Where leased jobs run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// A child process per job.
    Process,
    /// A tokio task inside the server.
    Task,
}

impl FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "process" => Ok(ExecutorKind::Process),
            "task" => Ok(ExecutorKind::Task),
            other => Err(format!("expected \"process\" or \"task\", got {other:?}")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected \"text\" or \"json\", got {other:?}")),
        }
    }
}

/// Server configuration.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub db: DbConfig,
    pub workers: usize,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub lease_wait: Duration,
    pub exec_timeout: Duration,
    pub max_attempts: u32,
    pub executor: ExecutorKind,
    /// Address-space ceiling for job processes, in megabytes.
    pub memory_limit_mb: Option<u64>,
    pub max_output_events: u64,
    pub request_timeout: Duration,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8000,
            db: DbConfig::default(),
            workers: 4,
            lease_ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            lease_wait: Duration::from_secs(5),
            exec_timeout: Duration::from_secs(300),
            max_attempts: 3,
            executor: ExecutorKind::Process,
            memory_limit_mb: None,
            max_output_events: 10_000,
            request_timeout: Duration::from_secs(30),
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                     | Default    |
    /// |-----------------------------|------------|
    /// | `ROAM_HOST`                 | `0.0.0.0`  |
    /// | `ROAM_PORT`                 | `8000`     |
    /// | `ROAM_DB_ENDPOINT`          | `mem://`   |
    /// | `ROAM_DB_NAMESPACE`         | `roam`     |
    /// | `ROAM_DB_DATABASE`          | `main`     |
    /// | `ROAM_WORKERS`              | `4`        |
    /// | `ROAM_LEASE_TTL_SECS`       | `30`       |
    /// | `ROAM_HEARTBEAT_SECS`       | `10`       |
    /// | `ROAM_LEASE_WAIT_SECS`      | `5`        |
    /// | `ROAM_EXEC_TIMEOUT_SECS`    | `300`      |
    /// | `ROAM_MAX_ATTEMPTS`         | `3`        |
    /// | `ROAM_EXECUTOR`             | `process`  |
    /// | `ROAM_MEMORY_LIMIT_MB`      | unset      |
    /// | `ROAM_MAX_OUTPUT_EVENTS`    | `10000`    |
    /// | `ROAM_REQUEST_TIMEOUT_SECS` | `30`       |
    /// | `ROAM_LOG_FORMAT`           | `text`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let env = Env { lookup: &lookup };

        let mut db = defaults.db.clone();
        if let Some(endpoint) = env.string("ROAM_DB_ENDPOINT") {
            db = db.with_endpoint(endpoint);
        }
        if let Some(namespace) = env.string("ROAM_DB_NAMESPACE") {
            db = db.with_namespace(namespace);
        }
        if let Some(database) = env.string("ROAM_DB_DATABASE") {
            db = db.with_database(database);
        }

        let config = Self {
            host: env.parse("ROAM_HOST")?.unwrap_or(defaults.host),
            port: env.parse("ROAM_PORT")?.unwrap_or(defaults.port),
            db,
            workers: env.parse("ROAM_WORKERS")?.unwrap_or(defaults.workers),
            lease_ttl: env.secs("ROAM_LEASE_TTL_SECS")?.unwrap_or(defaults.lease_ttl),
            heartbeat_interval: env
                .secs("ROAM_HEARTBEAT_SECS")?
                .unwrap_or(defaults.heartbeat_interval),
            lease_wait: env.secs("ROAM_LEASE_WAIT_SECS")?.unwrap_or(defaults.lease_wait),
            exec_timeout: env
                .secs("ROAM_EXEC_TIMEOUT_SECS")?
                .unwrap_or(defaults.exec_timeout),
            max_attempts: env.parse("ROAM_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            executor: env.parse("ROAM_EXECUTOR")?.unwrap_or(defaults.executor),
            memory_limit_mb: env.parse("ROAM_MEMORY_LIMIT_MB")?,
            max_output_events: env
                .parse("ROAM_MAX_OUTPUT_EVENTS")?
                .unwrap_or(defaults.max_output_events),
            request_timeout: env
                .secs("ROAM_REQUEST_TIMEOUT_SECS")?
                .unwrap_or(defaults.request_timeout),
            log_format: env.parse("ROAM_LOG_FORMAT")?.unwrap_or(defaults.log_format),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the worker pool cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("ROAM_LEASE_TTL_SECS", self.lease_ttl),
            ("ROAM_HEARTBEAT_SECS", self.heartbeat_interval),
            ("ROAM_LEASE_WAIT_SECS", self.lease_wait),
            ("ROAM_EXEC_TIMEOUT_SECS", self.exec_timeout),
            ("ROAM_REQUEST_TIMEOUT_SECS", self.request_timeout),
        ];
        if let Some((key, _)) = periods.into_iter().find(|(_, period)| period.is_zero()) {
            return Err(ConfigError::Invalid {
                key,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.heartbeat_interval >= self.lease_ttl {
            return Err(ConfigError::HeartbeatTooSlow {
                heartbeat: self.heartbeat_interval.as_secs(),
                ttl: self.lease_ttl.as_secs(),
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                key: "ROAM_WORKERS",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn queue(&self) -> QueueConfig {
        QueueConfig::default()
            .with_lease_ttl(self.lease_ttl)
            .with_max_attempts(self.max_attempts)
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig::default()
            .with_size(self.workers)
            .with_lease_wait(self.lease_wait)
            .with_heartbeat_interval(self.heartbeat_interval)
            .with_exec_timeout(self.exec_timeout)
            .with_max_output_events(self.max_output_events)
    }

    pub fn router(&self) -> RouterConfig {
        RouterConfig::default().with_request_timeout(self.request_timeout)
    }

    pub fn memory_limit_bytes(&self) -> Option<u64> {
        self.memory_limit_mb.map(|mb| mb.saturating_mul(1024 * 1024))
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Set and non-blank.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|value| {
                value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn secs(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_secs))
    }
}
