//! Environment variable loading
//!
//! | Variable | Default |
//! |----------|---------|
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | `8080` |
//! | `TLS_CERT_PATH`, `TLS_KEY_PATH` | unset |
//! | `CORS_ALLOWED_ORIGINS` | unset |
//! | `RATE_LIMIT_REQUESTS_PER_SECOND` | `60` |
//! | `RATE_LIMIT_BURST_SIZE` | `10` |
//! | `MAX_WEBSOCKET_CONNECTIONS` | unlimited |
//! | `MAX_CONNECTIONS_PER_IP` | `100` |
//! | `OUTBOUND_WARN_DEPTH` | `1024` |
//! | `IDLE_TIMEOUT_SECONDS` | `300` |
//! | `PROVIDER` | `simulated` |
//! | `PROVIDER_ENDPOINT`, `PROVIDER_API_KEY`, `PROVIDER_TIMEOUT_MS` | unset |
//! | `SIMULATED_INTERVAL_MS` | `80` |

use std::error::Error;
use std::path::PathBuf;

use zeroize::Zeroizing;

use super::utils::{env_var, parse_env, parse_optional_env};
use super::{
    DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_SECONDS, DEFAULT_MAX_CONNECTIONS_PER_IP, DEFAULT_PORT,
    DEFAULT_RATE_LIMIT_BURST_SIZE, DEFAULT_RATE_LIMIT_REQUESTS_PER_SECOND,
};
use crate::core::provider::{DEFAULT_SIMULATED_INTERVAL_MS, ProviderKind, ProviderSettings};
use crate::core::session::DEFAULT_OUTBOUND_WARN_DEPTH;

/// Values read from the process environment, before YAML overrides
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub host: String,
    pub port: u16,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: u32,
    pub outbound_warn_depth: usize,
    pub idle_timeout_seconds: u64,
    pub provider: ProviderSettings,
}

impl EnvConfig {
    pub fn load() -> Result<Self, Box<dyn Error>> {
        let kind = match env_var("PROVIDER") {
            Some(name) => name.parse::<ProviderKind>()?,
            None => ProviderKind::default(),
        };

        Ok(Self {
            host: env_var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_env("PORT", DEFAULT_PORT)?,
            tls_cert_path: env_var("TLS_CERT_PATH").map(PathBuf::from),
            tls_key_path: env_var("TLS_KEY_PATH").map(PathBuf::from),
            cors_allowed_origins: env_var("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: parse_env(
                "RATE_LIMIT_REQUESTS_PER_SECOND",
                DEFAULT_RATE_LIMIT_REQUESTS_PER_SECOND,
            )?,
            rate_limit_burst_size: parse_env(
                "RATE_LIMIT_BURST_SIZE",
                DEFAULT_RATE_LIMIT_BURST_SIZE,
            )?,
            max_websocket_connections: parse_optional_env("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: parse_env(
                "MAX_CONNECTIONS_PER_IP",
                DEFAULT_MAX_CONNECTIONS_PER_IP,
            )?,
            outbound_warn_depth: parse_env("OUTBOUND_WARN_DEPTH", DEFAULT_OUTBOUND_WARN_DEPTH)?,
            idle_timeout_seconds: parse_env(
                "IDLE_TIMEOUT_SECONDS",
                DEFAULT_IDLE_TIMEOUT_SECONDS,
            )?,
            provider: ProviderSettings {
                kind,
                endpoint: env_var("PROVIDER_ENDPOINT"),
                api_key: env_var("PROVIDER_API_KEY").map(Zeroizing::new),
                timeout_ms: parse_optional_env("PROVIDER_TIMEOUT_MS")?,
                simulated_interval_ms: parse_env(
                    "SIMULATED_INTERVAL_MS",
                    DEFAULT_SIMULATED_INTERVAL_MS,
                )?,
            },
        })
    }
}
