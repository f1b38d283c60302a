//! Configuration loading from files and the environment.

use crate::config::GatewayConfig;
use crate::error::ConfigError;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML
    Yaml,
    /// TOML
    Toml,
    /// JSON
    Json,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Parse configuration content in this format
    pub fn parse(self, content: &str) -> Result<GatewayConfig, ConfigError> {
        match self {
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string())),
            Self::Toml => toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string())),
            Self::Json => serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string())),
        }
    }
}

/// Builds a [`GatewayConfig`] from defaults, an optional file and the environment
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_overrides: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader with no file and environment overrides enabled
    pub fn new() -> Self {
        Self {
            file: None,
            env_overrides: true,
        }
    }

    /// Read configuration from this file
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Enable or disable `GATEWAY_*` environment overrides
    #[must_use]
    pub fn with_env_overrides(mut self, enabled: bool) -> Self {
        self.env_overrides = enabled;
        self
    }

    /// Load, override and validate the configuration
    pub async fn load(&self) -> Result<GatewayConfig, ConfigError> {
        let mut config = match &self.file {
            Some(path) => {
                let format = ConfigFormat::from_path(path)?;
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Io {
                        path: path.clone(),
                        source,
                    })?;
                info!(path = %path.display(), ?format, "Loading configuration file");
                format.parse(&content)?
            }
            None => {
                debug!("No configuration file given, using defaults");
                GatewayConfig::default()
            }
        };

        if self.env_overrides {
            apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        }

        config.validate()?;
        Ok(config)
    }
}

/// Apply `GATEWAY_*` overrides using the given variable lookup
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("GATEWAY_HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("GATEWAY_PORT") {
        match port.parse() {
            Ok(port) => config.server.port = port,
            Err(_) => warn!(value = %port, "Ignoring invalid GATEWAY_PORT"),
        }
    }
    if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(secret) = lookup("GATEWAY_AUTH_SECRET").filter(|s| !s.is_empty()) {
        config.auth.secret = Some(SecretString::new(secret));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::{LoadBalancingStrategy, RateLimitStrategy};
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    const YAML: &str = r#"
server:
  port: 8080
routes:
  - name: users
    pathPrefix: /api/users
    strategy: weighted
    timeoutMs: 2000
    instances:
      - url: http://localhost:3002
        weight: 3
      - url: http://localhost:4002
rateLimit:
  strategy: sliding_window
  windowMs: 1000
  maxRequests: 5
"#;

    #[test]
    fn test_format_detection() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.TOML")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")).unwrap(), ConfigFormat::Json);
        assert!(matches!(
            ConfigFormat::from_path(Path::new("a.ini")),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_parse_yaml() {
        let config = ConfigFormat::Yaml.parse(YAML).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.routes.len(), 1);
        let route = &config.routes[0];
        assert_eq!(route.strategy, LoadBalancingStrategy::Weighted);
        assert_eq!(route.instances[0].weight, 3);
        assert_eq!(route.instances[1].weight, 1);
        assert_eq!(route.health_check_path, "/health");
        assert_eq!(config.rate_limit.strategy, RateLimitStrategy::SlidingWindow);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let content = r#"
[cache]
enabled = false
ttlMs = 1000

[[routes]]
name = "news"
pathPrefix = "/api/news"
instances = [{ url = "http://localhost:3005" }]
"#;
        let config = ConfigFormat::Toml.parse(content).unwrap();
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl_ms, 1000);
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.routes[0].name, "news");
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            ConfigFormat::Json.parse("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("GATEWAY_HOST", "127.0.0.1"),
            ("GATEWAY_PORT", "9000"),
            ("GATEWAY_LOG_LEVEL", "debug"),
            ("GATEWAY_AUTH_SECRET", "s3cret"),
        ]
        .into_iter()
        .collect();
        let mut config = GatewayConfig::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(ToString::to_string));

        assert_eq!(config.server.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.auth.secret.as_ref().map(|s| s.expose_secret().as_str()),
            Some("s3cret")
        );
    }

    #[test]
    fn test_invalid_port_override_ignored() {
        let mut config = GatewayConfig::default();
        apply_env_overrides(&mut config, |k| (k == "GATEWAY_PORT").then(|| "nope".to_string()));
        assert_eq!(config.server.port, 3000);
    }

    #[tokio::test]
    async fn test_load_defaults_without_file() {
        let config = ConfigLoader::new()
            .with_env_overrides(false)
            .load()
            .await
            .unwrap();
        assert_eq!(config.routes.len(), 6);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/gateway.yaml")
            .with_env_overrides(false)
            .load()
            .await;
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[tokio::test]
    async fn test_load_file_from_disk() {
        let path = std::env::temp_dir().join(format!("gateway-config-{}.yaml", std::process::id()));
        tokio::fs::write(&path, YAML).await.unwrap();
        let config = ConfigLoader::new()
            .with_file(&path)
            .with_env_overrides(false)
            .load()
            .await
            .unwrap();
        let _ = tokio::fs::remove_file(&path).await;
        assert_eq!(config.routes[0].name, "users");
    }
}
