use crate::dispatch::allocator::DispatchPolicy;
use crate::dispatch::necessity::SatisfactionBasis;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

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
    pub dispatch: DispatchSettings,
    pub catalog: CatalogSource,
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
        let span_timings = env::var("APP_LOG_SPANS")
            .map(|raw| matches!(raw.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                span_timings,
            },
            dispatch: DispatchSettings::from_env()?,
            catalog: CatalogSource {
                zones_csv: env::var("DISPATCH_ZONES_CSV").ok().map(PathBuf::from),
                resources_csv: env::var("DISPATCH_RESOURCES_CSV").ok().map(PathBuf::from),
            },
        })
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
    /// Emit a close event with busy/idle timings for every span.
    pub span_timings: bool,
}

/// Allocation engine knobs sourced from `DISPATCH_*` variables.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub solver_timeout: Duration,
    pub solver_workers: usize,
    pub satisfaction_basis: SatisfactionBasis,
    pub critical_infra_floor: u32,
    pub necessity_epsilon: f64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        let policy = DispatchPolicy::default();
        Self {
            solver_timeout: Duration::from_millis(2_000),
            solver_workers: 2,
            satisfaction_basis: policy.satisfaction_basis,
            critical_infra_floor: policy.critical_infra_floor,
            necessity_epsilon: policy.necessity_epsilon,
        }
    }
}

impl DispatchSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let solver_timeout = match env::var("DISPATCH_SOLVER_TIMEOUT_MS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .ok_or(ConfigError::InvalidNumber {
                    variable: "DISPATCH_SOLVER_TIMEOUT_MS",
                    value: raw,
                })?,
            Err(_) => defaults.solver_timeout,
        };

        let solver_workers = match env::var("DISPATCH_SOLVER_WORKERS") {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|workers| *workers > 0)
                .ok_or(ConfigError::InvalidNumber {
                    variable: "DISPATCH_SOLVER_WORKERS",
                    value: raw,
                })?,
            Err(_) => defaults.solver_workers,
        };

        let satisfaction_basis = match env::var("DISPATCH_SATISFACTION_BASIS") {
            Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "necessity" => SatisfactionBasis::Necessity,
                "fixed" | "fixed_demand" => SatisfactionBasis::FixedDemand,
                _ => return Err(ConfigError::InvalidSatisfactionBasis(raw)),
            },
            Err(_) => defaults.satisfaction_basis,
        };

        let critical_infra_floor = match env::var("DISPATCH_CRITICAL_FLOOR") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|floor| *floor > 0)
                .ok_or(ConfigError::InvalidNumber {
                    variable: "DISPATCH_CRITICAL_FLOOR",
                    value: raw,
                })?,
            Err(_) => defaults.critical_infra_floor,
        };

        let necessity_epsilon = match env::var("DISPATCH_NECESSITY_EPSILON") {
            Ok(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|eps| (0.0..1.0).contains(eps))
                .ok_or(ConfigError::InvalidNumber {
                    variable: "DISPATCH_NECESSITY_EPSILON",
                    value: raw,
                })?,
            Err(_) => defaults.necessity_epsilon,
        };

        Ok(Self {
            solver_timeout,
            solver_workers,
            satisfaction_basis,
            critical_infra_floor,
            necessity_epsilon,
        })
    }

    /// Engine policy carrying these settings over the default rule table.
    pub fn policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            satisfaction_basis: self.satisfaction_basis,
            critical_infra_floor: self.critical_infra_floor,
            necessity_epsilon: self.necessity_epsilon,
            ..DispatchPolicy::default()
        }
    }
}

/// Where the zone and resource catalog is read from at startup.
#[derive(Debug, Clone, Default)]
pub struct CatalogSource {
    pub zones_csv: Option<PathBuf>,
    pub resources_csv: Option<PathBuf>,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost {
        source: std::net::AddrParseError,
    },
    InvalidNumber {
        variable: &'static str,
        value: String,
    },
    InvalidSatisfactionBasis(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable, value } => {
                write!(f, "{variable} has an invalid value '{value}'")
            }
            ConfigError::InvalidSatisfactionBasis(value) => write!(
                f,
                "DISPATCH_SATISFACTION_BASIS must be 'necessity' or 'fixed_demand', got '{value}'"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidSatisfactionBasis(_) => None,
        }
    }
}
