use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub workflow: WorkflowConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = WorkflowConfig::default();
        let workflow = WorkflowConfig {
            cas_retry_limit: numeric_var("VERIFY_CAS_RETRY_LIMIT", defaults.cas_retry_limit)?,
            profile_write_timeout_ms: numeric_var(
                "VERIFY_PROFILE_WRITE_TIMEOUT_MS",
                defaults.profile_write_timeout_ms,
            )?,
            sweep_interval_secs: numeric_var(
                "VERIFY_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            )?,
            max_upload_bytes: numeric_var("VERIFY_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            notifier_buffer: numeric_var("VERIFY_NOTIFIER_BUFFER", defaults.notifier_buffer)?,
        };

        if workflow.cas_retry_limit == 0 {
            return Err(ConfigError::OutOfRange {
                key: "VERIFY_CAS_RETRY_LIMIT",
            });
        }
        if workflow.notifier_buffer == 0 {
            return Err(ConfigError::OutOfRange {
                key: "VERIFY_NOTIFIER_BUFFER",
            });
        }

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            workflow,
        })
    }
}

fn numeric_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs for the verification workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Attempts a slot write makes before giving up on a contended slot.
    pub cas_retry_limit: u32,
    pub profile_write_timeout_ms: u64,
    /// Period of the background extraction sweep; zero disables it.
    pub sweep_interval_secs: u64,
    pub max_upload_bytes: usize,
    /// Snapshots buffered per case before a slow viewer is considered lagging.
    pub notifier_buffer: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            cas_retry_limit: 8,
            profile_write_timeout_ms: 5_000,
            sweep_interval_secs: 60,
            max_upload_bytes: 10 * 1024 * 1024,
            notifier_buffer: 64,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
    OutOfRange { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a non-negative integer, found '{value}'")
            }
            ConfigError::OutOfRange { key } => write!(f, "{key} must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::OutOfRange { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "VERIFY_CAS_RETRY_LIMIT",
            "VERIFY_PROFILE_WRITE_TIMEOUT_MS",
            "VERIFY_SWEEP_INTERVAL_SECS",
            "VERIFY_MAX_UPLOAD_BYTES",
            "VERIFY_NOTIFIER_BUFFER",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.workflow, WorkflowConfig::default());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn workflow_overrides_are_parsed() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("VERIFY_CAS_RETRY_LIMIT", "3");
        env::set_var("VERIFY_SWEEP_INTERVAL_SECS", "0");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.workflow.cas_retry_limit, 3);
        assert_eq!(config.workflow.sweep_interval_secs, 0);
        reset_env();
    }

    #[test]
    fn rejects_non_numeric_and_zero_values() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("VERIFY_PROFILE_WRITE_TIMEOUT_MS", "soon");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidNumber {
                key: "VERIFY_PROFILE_WRITE_TIMEOUT_MS",
                ..
            })
        ));

        reset_env();
        env::set_var("VERIFY_CAS_RETRY_LIMIT", "0");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::OutOfRange {
                key: "VERIFY_CAS_RETRY_LIMIT"
            })
        ));
        reset_env();
    }
}
