use std::error::Error;
use std::path::PathBuf;

use zeroize::Zeroizing;

use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{ServerConfig, TlsConfig, validation};
use crate::core::provider::ProviderKind;

/// Merge environment values (base) with YAML overrides
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, Box<dyn Error>> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();
    let relay = yaml.relay.unwrap_or_default();
    let provider_yaml = yaml.provider.unwrap_or_default();

    // TLS: an explicit `enabled: false` in YAML switches off env-provided paths
    let (cert_path, key_path) = match server.tls {
        Some(tls) if tls.enabled == Some(false) => (None, None),
        Some(tls) => (
            tls.cert_path.map(PathBuf::from).or(env.tls_cert_path),
            tls.key_path.map(PathBuf::from).or(env.tls_key_path),
        ),
        None => (env.tls_cert_path, env.tls_key_path),
    };
    validation::validate_tls_paths(&cert_path, &key_path)?;
    let tls = match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => Some(TlsConfig {
            cert_path,
            key_path,
        }),
        _ => None,
    };

    let mut provider = env.provider;
    if let Some(kind) = provider_yaml.kind {
        provider.kind = kind.parse::<ProviderKind>()?;
    }
    if let Some(endpoint) = provider_yaml.endpoint {
        provider.endpoint = Some(endpoint);
    }
    if let Some(api_key) = provider_yaml.api_key {
        provider.api_key = Some(Zeroizing::new(api_key));
    }
    if let Some(timeout_ms) = provider_yaml.timeout_ms {
        provider.timeout_ms = Some(timeout_ms);
    }
    if let Some(interval) = provider_yaml.simulated_interval_ms {
        provider.simulated_interval_ms = interval;
    }

    Ok(ServerConfig {
        host: server.host.unwrap_or(env.host),
        port: server.port.unwrap_or(env.port),
        tls,
        cors_allowed_origins: security.cors_allowed_origins.or(env.cors_allowed_origins),
        rate_limit_requests_per_second: security
            .rate_limit_requests_per_second
            .unwrap_or(env.rate_limit_requests_per_second),
        rate_limit_burst_size: security
            .rate_limit_burst_size
            .unwrap_or(env.rate_limit_burst_size),
        max_websocket_connections: security
            .max_websocket_connections
            .or(env.max_websocket_connections),
        max_connections_per_ip: security
            .max_connections_per_ip
            .unwrap_or(env.max_connections_per_ip),
        outbound_warn_depth: relay.outbound_warn_depth.unwrap_or(env.outbound_warn_depth),
        idle_timeout_seconds: relay
            .idle_timeout_seconds
            .unwrap_or(env.idle_timeout_seconds),
        provider,
    })
}
