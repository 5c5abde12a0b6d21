use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override the corresponding environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8080
///   tls:
///     enabled: true
///     cert_path: "/etc/relay/cert.pem"
///     key_path: "/etc/relay/key.pem"
///
/// security:
///   cors_allowed_origins: "https://app.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
///
/// relay:
///   outbound_warn_depth: 1024
///   idle_timeout_seconds: 300
///
/// provider:
///   kind: "http"
///   endpoint: "https://stt.example.com/v1/stream"
///   api_key: "your-api-key"
///   timeout_ms: 10000
///   simulated_interval_ms: 80
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub security: Option<SecurityYaml>,
    pub relay: Option<RelayYaml>,
    pub provider: Option<ProviderYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Security settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// `"*"` or a comma-separated list of origins
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

/// Relay tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    /// Outbound buffer depth that triggers a slow-consumer warning
    pub outbound_warn_depth: Option<usize>,
    pub idle_timeout_seconds: Option<u64>,
}

/// Transcription provider from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProviderYaml {
    /// `simulated` or `http`
    pub kind: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub simulated_interval_ms: Option<u64>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9090
  tls:
    enabled: true
    cert_path: "/tmp/cert.pem"
    key_path: "/tmp/key.pem"

security:
  cors_allowed_origins: "*"
  rate_limit_requests_per_second: 5
  max_connections_per_ip: 2

relay:
  outbound_warn_depth: 64
  idle_timeout_seconds: 30

provider:
  kind: "http"
  endpoint: "https://stt.example.com/stream"
  api_key: "secret"
  timeout_ms: 2500
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.as_ref().unwrap();
        assert_eq!(server.host, Some("127.0.0.1".to_string()));
        assert_eq!(server.port, Some(9090));
        let tls = server.tls.as_ref().unwrap();
        assert_eq!(tls.enabled, Some(true));
        assert_eq!(tls.cert_path, Some("/tmp/cert.pem".to_string()));

        let security = config.security.as_ref().unwrap();
        assert_eq!(security.cors_allowed_origins, Some("*".to_string()));
        assert_eq!(security.rate_limit_requests_per_second, Some(5));
        assert_eq!(security.rate_limit_burst_size, None);
        assert_eq!(security.max_connections_per_ip, Some(2));

        let relay = config.relay.as_ref().unwrap();
        assert_eq!(relay.outbound_warn_depth, Some(64));
        assert_eq!(relay.idle_timeout_seconds, Some(30));

        let provider = config.provider.as_ref().unwrap();
        assert_eq!(provider.kind, Some("http".to_string()));
        assert_eq!(provider.timeout_ms, Some(2500));
        assert_eq!(provider.simulated_interval_ms, None);
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.security.is_none());
        assert!(config.relay.is_none());
        assert!(config.provider.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "provider:\n  kind: simulated\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.provider.unwrap().kind,
            Some("simulated".to_string())
        );
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/relay.yaml");
        let result = YamlConfig::from_file(&path);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "server: [unclosed").unwrap();

        let result = YamlConfig::from_file(&config_path);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML config")
        );
    }
}
