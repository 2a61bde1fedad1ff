use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::workflows::admissions::{FeePolicyError, InstallmentChoice, WorkflowConfig};

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

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            workflow: load_workflow()?,
        })
    }
}

fn load_workflow() -> Result<WorkflowConfig, ConfigError> {
    let mut workflow = WorkflowConfig::default();

    if let Some(rate) = parse_var::<u32>("ADMISSIONS_DEPOSIT_RATE_BPS")? {
        workflow.fees.deposit_rate_bps = rate;
    }
    if let Some(max_in_flight) = parse_var::<usize>("ADMISSIONS_BATCH_MAX_IN_FLIGHT")? {
        if max_in_flight == 0 {
            return Err(ConfigError::InvalidNumber {
                var: "ADMISSIONS_BATCH_MAX_IN_FLIGHT",
                value: "0".to_string(),
            });
        }
        workflow.batch.max_in_flight = max_in_flight;
    }
    if let Some(interval_ms) = parse_var::<u64>("ADMISSIONS_BATCH_INTERVAL_MS")? {
        workflow.batch.dispatch_interval = Duration::from_millis(interval_ms);
    }
    if let Ok(raw) = env::var("ADMISSIONS_DEFAULT_INSTALLMENTS") {
        workflow.default_installments = InstallmentChoice::from_key(&raw)
            .ok_or(ConfigError::InvalidInstallmentChoice(raw))?;
    }

    workflow.fees.validate().map_err(ConfigError::FeePolicy)?;
    Ok(workflow)
}

fn parse_var<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
        Err(_) => Ok(None),
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

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { var: &'static str, value: String },
    InvalidInstallmentChoice(String),
    FeePolicy(FeePolicyError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "{var} must be a positive integer, got '{value}'")
            }
            ConfigError::InvalidInstallmentChoice(value) => write!(
                f,
                "ADMISSIONS_DEFAULT_INSTALLMENTS must be 'full' or 'split', got '{value}'"
            ),
            ConfigError::FeePolicy(err) => write!(f, "invalid fee policy: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::FeePolicy(err) => Some(err),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidInstallmentChoice(_) => None,
        }
    }
}
