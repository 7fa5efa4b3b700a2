use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use toolgate_agent::{ModelConfig, OrchestratorConfig};
use toolgate_mcp::config::validate_servers;
use toolgate_mcp::{ServerConfig, SupervisorConfig};

/// Environment variable consulted when the config file has no API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Contents of `toolgate.toml`.
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub server: HttpConfig,
    /// Tool servers, in priority order for name collisions.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// `[server]` section: where the HTTP front door listens.
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Browser origins allowed to call the API; empty disables CORS.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}

impl GatewayConfig {
    /// Read, parse and validate a config file, taking the API key from
    /// `ANTHROPIC_API_KEY` when the file leaves it empty.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("Invalid config file '{}'", path.display()))?;
        config.apply_api_key_fallback(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_api_key_fallback(&mut self, env_key: Option<String>) {
        if self.model.api_key.is_empty() {
            if let Some(key) = env_key.filter(|k| !k.trim().is_empty()) {
                self.model.api_key = key;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.orchestrator.validate()?;
        self.supervisor.validate()?;
        validate_servers(&self.servers)?;
        if self.server.port == 0 {
            anyhow::bail!("server.port must not be 0");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use toolgate_mcp::TransportConfig;

    const SAMPLE: &str = r#"
[model]
model_id = "claude-3-5-sonnet-20240620"
max_tokens = 1024

[orchestrator]
max_turns = 8
system_prompt = "You are a helpful assistant."

[supervisor]
call_timeout_ms = 5000

[server]
port = 9000
allowed_origins = ["http://localhost:5173"]

[[servers]]
name = "calculator"
command = "python"
args = ["calculator_server.py"]

[[servers]]
name = "search"
address = "127.0.0.1:7000"
timeout_ms = 2000
"#;

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = GatewayConfig::load(file.path()).await.unwrap();
        assert_eq!(config.model.max_tokens, 1024);
        assert_eq!(config.orchestrator.max_turns, 8);
        assert_eq!(config.orchestrator.deadline_secs, 120);
        assert_eq!(config.supervisor.call_timeout_ms, 5000);
        assert_eq!(config.supervisor.connect_timeout_ms, 30_000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.allowed_origins, vec!["http://localhost:5173"]);

        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].name, "calculator");
        assert!(matches!(
            config.servers[0].transport,
            TransportConfig::Stdio { .. }
        ));
        assert!(matches!(
            config.servers[1].transport,
            TransportConfig::Tcp { .. }
        ));
        assert_eq!(config.servers[1].timeout_ms, Some(2000));
    }

    #[tokio::test]
    async fn test_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = GatewayConfig::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GatewayConfig::parse("").unwrap();
        assert!(config.servers.is_empty());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.orchestrator.max_turns, 20);
    }

    #[test]
    fn test_duplicate_server_names_rejected() {
        let raw = r#"
[[servers]]
name = "calc"
address = "127.0.0.1:1"

[[servers]]
name = "calc"
address = "127.0.0.1:2"
"#;
        let err = GatewayConfig::parse(raw).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_zero_turns_rejected() {
        assert!(GatewayConfig::parse("[orchestrator]\nmax_turns = 0").is_err());
    }

    #[test]
    fn test_api_key_fallback() {
        let mut config = GatewayConfig::parse("").unwrap();
        config.apply_api_key_fallback(Some("sk-env".into()));
        assert_eq!(config.model.api_key, "sk-env");

        let mut config = GatewayConfig::parse("[model]\napi_key = \"sk-file\"").unwrap();
        config.apply_api_key_fallback(Some("sk-env".into()));
        assert_eq!(config.model.api_key, "sk-file");

        let mut config = GatewayConfig::parse("").unwrap();
        config.apply_api_key_fallback(Some("  ".into()));
        assert!(config.model.api_key.is_empty());
    }
}
