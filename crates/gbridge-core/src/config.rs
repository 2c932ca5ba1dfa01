use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gbridge_transform::ModelMap;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Runtime configuration, loaded from a JSON file and overlaid with CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub openai_api_key: String,
    pub openai_base_url: String,
    /// Gemini model id to backend model id.
    pub model_mapping: HashMap<String, String>,
    pub default_openai_model: String,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log every translated request/response body.
    pub enable_detailed_logs: bool,
    pub enable_access_logs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Optional outbound proxy for backend egress.
    pub proxy: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            model_mapping: HashMap::new(),
            default_openai_model: "gpt-3.5-turbo".to_string(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            log_level: "info".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_detailed_logs: false,
            enable_access_logs: true,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout_secs: 5,
            request_timeout_secs: 600,
            stream_idle_timeout_secs: 120,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

/// Optional layer applied over the file config (CLI flags, env).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub log_level: Option<String>,
}

impl BridgeConfig {
    /// Load `path`. A missing file yields the defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn overlay(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(key) = overrides.openai_api_key {
            self.openai_api_key = key;
        }
        if let Some(base_url) = overrides.openai_base_url {
            self.openai_base_url = base_url;
        }
        if let Some(level) = overrides.log_level {
            self.server.log_level = level;
        }
    }

    /// Checks that cannot be expressed by serde defaults.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.openai_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "openai_base_url",
                message: "must not be empty".to_string(),
            });
        }
        if self.default_openai_model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "default_openai_model",
                message: "must not be empty".to_string(),
            });
        }
        if self.upstream.stream_idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "upstream.stream_idle_timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn model_map(&self) -> ModelMap {
        ModelMap::new(self.model_mapping.clone(), self.default_openai_model.clone())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config = BridgeConfig::from_json(
            r#"{
                "openai_api_key": "sk-test",
                "model_mapping": {"gemini-2.5-pro": "gpt-4"},
                "server": {"port": 9000},
                "logging": {"enable_detailed_logs": true}
            }"#,
        )
        .unwrap();

        assert_eq!(config.openai_api_key, "sk-test");
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(config.default_openai_model, "gpt-3.5-turbo");
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert!(config.logging.enable_detailed_logs);
        assert!(config.logging.enable_access_logs);
        assert_eq!(config.upstream.stream_idle_timeout(), Duration::from_secs(120));
        assert_eq!(config.model_map().resolve("models/gemini-2.5-pro"), "gpt-4");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = BridgeConfig::load(Path::new("/nonexistent/gbridge/config.json")).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = std::env::temp_dir().join(format!(
            "gbridge-config-test-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "{ not json").unwrap();
        let result = BridgeConfig::load(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut config = BridgeConfig::default();
        config.overlay(ConfigOverrides {
            port: Some(8080),
            openai_api_key: Some("sk-cli".to_string()),
            ..ConfigOverrides::default()
        });

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.openai_api_key, "sk-cli");
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn validate_rejects_empty_base_url() {
        let config = BridgeConfig {
            openai_base_url: " ".to_string(),
            ..BridgeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "openai_base_url",
                ..
            })
        ));
        assert!(BridgeConfig::default().validate().is_ok());
    }
}
