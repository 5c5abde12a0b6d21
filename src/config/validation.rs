use std::error::Error;
use std::path::PathBuf;

use crate::core::provider::{ProviderKind, ProviderSettings};

/// TLS needs both a certificate and a key, or neither
pub fn validate_tls_paths(
    cert_path: &Option<PathBuf>,
    key_path: &Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    match (cert_path, key_path) {
        (Some(_), None) => Err("TLS certificate path is set but the key path is missing".into()),
        (None, Some(_)) => Err("TLS key path is set but the certificate path is missing".into()),
        _ => Ok(()),
    }
}

pub fn validate_relay_limits(
    outbound_warn_depth: usize,
    idle_timeout_seconds: u64,
    max_connections_per_ip: u32,
) -> Result<(), Box<dyn Error>> {
    if outbound_warn_depth == 0 {
        return Err("outbound_warn_depth must be greater than 0".into());
    }
    if idle_timeout_seconds == 0 {
        return Err("idle_timeout_seconds must be greater than 0".into());
    }
    if max_connections_per_ip == 0 {
        return Err("max_connections_per_ip must be greater than 0".into());
    }
    Ok(())
}

pub fn validate_rate_limit(requests_per_second: u32, burst_size: u32) -> Result<(), Box<dyn Error>> {
    if requests_per_second == 0 {
        return Err("rate_limit_requests_per_second must be greater than 0".into());
    }
    if burst_size == 0 {
        return Err("rate_limit_burst_size must be greater than 0".into());
    }
    Ok(())
}

/// The `http` provider needs an absolute http(s) endpoint
pub fn validate_provider(settings: &ProviderSettings) -> Result<(), Box<dyn Error>> {
    if settings.kind != ProviderKind::Http {
        return Ok(());
    }

    let endpoint = settings
        .endpoint
        .as_deref()
        .ok_or("PROVIDER_ENDPOINT is required when PROVIDER=http")?;

    let url = url::Url::parse(endpoint)
        .map_err(|e| format!("Invalid provider endpoint '{endpoint}': {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("Provider endpoint must use http or https, got '{other}'").into()),
    }
}
