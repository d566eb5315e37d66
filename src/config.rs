//! Configuration loading and validation.
//!
//! Follows the env-first, typed-defaults pattern: every field has a sane
//! default so `fleetctl` runs against a local Redis/SQLite without any
//! configuration at all, but every field is also overridable via the
//! environment variables named in the external-interfaces section of the
//! design.

use std::time::Duration;

/// Top-level fleetctl configuration, shared by the supervisor and every
/// child worker (each process re-derives it from its own environment).
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: std::path::PathBuf,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    pub control_plane: ControlPlaneConfig,
    pub sweeper: SweeperConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// Override for the history queue list name, `REDIS_HISTORY_QUEUE_NAME`.
    pub history_queue_name: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub host: String,
    pub port: u16,
}

impl ControlPlaneConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL a freshly spawned child uses to fetch its own config.
    pub fn internal_base_url(&self) -> String {
        let host = if self.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            &self.host
        };
        format!("http://{host}:{}", self.port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub inactivity_timeout: Duration,
    pub check_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
    pub sample_rate: f64,
}

impl Config {
    /// Load configuration from environment variables, applying the defaults
    /// recognized at the external interface boundary.
    pub fn load() -> crate::Result<Self> {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("fleetctl"))
            .unwrap_or_else(|| std::path::PathBuf::from("./data"));
        std::fs::create_dir_all(&data_dir)?;

        let redis = RedisConfig {
            url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            history_queue_name: env_or("REDIS_HISTORY_QUEUE_NAME", "chat_history_queue"),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| {
                format!("sqlite://{}", data_dir.join("fleetctl.db").display())
            }),
        };

        let control_plane = ControlPlaneConfig {
            host: env_or("MANAGER_HOST", "0.0.0.0"),
            port: env_u16("MANAGER_PORT", 8080),
        };

        let sweeper = SweeperConfig {
            inactivity_timeout: Duration::from_secs(env_u64("AGENT_INACTIVITY_TIMEOUT", 1800)),
            check_interval: Duration::from_secs(env_u64(
                "AGENT_INACTIVITY_CHECK_INTERVAL",
                300,
            )),
        };

        let telemetry = TelemetryConfig {
            service_name: env_or("OTEL_SERVICE_NAME", "fleetctl"),
            otlp_endpoint: std::env::var("FLEETCTL_OTLP_ENDPOINT").ok(),
            sample_rate: std::env::var("FLEETCTL_TRACE_SAMPLE_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
        };

        Ok(Self {
            data_dir,
            redis,
            database,
            control_plane,
            sweeper,
            telemetry,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_base_url_rewrites_wildcard_host() {
        let cfg = ControlPlaneConfig {
            host: "0.0.0.0".into(),
            port: 9000,
        };
        assert_eq!(cfg.internal_base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn internal_base_url_keeps_explicit_host() {
        let cfg = ControlPlaneConfig {
            host: "manager.internal".into(),
            port: 9000,
        };
        assert_eq!(cfg.internal_base_url(), "http://manager.internal:9000");
    }
}
