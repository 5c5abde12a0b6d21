//! Configuration module for the relay server
//!
//! Configuration comes from `.env` files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use transcribe_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use crate::core::provider::ProviderSettings;
use crate::core::session::DEFAULT_OUTBOUND_WARN_DEPTH;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_SECOND: u32 = 60;
pub const DEFAULT_RATE_LIMIT_BURST_SIZE: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 300;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Groups listener settings, security limits, relay tuning and the
/// transcription provider selection.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Security settings
    /// `"*"` for any origin, a comma-separated list, or `None` for same-origin only
    pub cors_allowed_origins: Option<String>,
    /// Rate limiting is disabled when this is >= 100000
    pub rate_limit_requests_per_second: u32,
    pub rate_limit_burst_size: u32,
    /// `None` means unlimited
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: u32,

    // Relay settings
    pub outbound_warn_depth: usize,
    pub idle_timeout_seconds: u64,

    pub provider: ProviderSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: DEFAULT_RATE_LIMIT_REQUESTS_PER_SECOND,
            rate_limit_burst_size: DEFAULT_RATE_LIMIT_BURST_SIZE,
            max_websocket_connections: None,
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
            outbound_warn_depth: DEFAULT_OUTBOUND_WARN_DEPTH,
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECONDS,
            provider: ProviderSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or validation fails
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, with environment variables as the base
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read or parsed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded in main.rs, so it is already part of the environment here
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_relay_limits(
            self.outbound_warn_depth,
            self.idle_timeout_seconds,
            self.max_connections_per_ip,
        )?;
        validation::validate_rate_limit(
            self.rate_limit_requests_per_second,
            self.rate_limit_burst_size,
        )?;
        validation::validate_provider(&self.provider)?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}
