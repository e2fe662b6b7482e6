//! TOML configuration for an agent process
//!
//! Secrets are never stored in the file. Sections that need credentials name
//! the environment variables holding them, and those are read at use time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub agent: AgentSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    /// Known peer agents: agent id to base URL
    #[serde(default)]
    pub peers: BTreeMap<String, String>,
    pub log_agent: Option<LogAgentSection>,
    pub vtex: Option<VtexSection>,
}

/// Agent identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// Agent identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Human readable name
    pub name: String,
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Capabilities advertised on /status, /capabilities and registration
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn default_agent_type() -> String {
    "generic".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl ServerSection {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::InvalidConfig(format!("Invalid listen address: {e}")))
    }
}

/// Request/reply timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolSection {
    /// Request timeout when the caller gives none
    #[serde(default = "default_request_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Per-call timeout of the HTTP transport
    #[serde(default = "default_transport_timeout_ms")]
    pub transport_timeout_ms: u64,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_request_timeout_ms(),
            transport_timeout_ms: default_transport_timeout_ms(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_transport_timeout_ms() -> u64 {
    10_000
}

impl ProtocolSection {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }
}

/// Runtime scheduling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSection {
    /// Background task period
    #[serde(default = "default_background_interval_ms")]
    pub background_interval_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            background_interval_ms: default_background_interval_ms(),
        }
    }
}

fn default_background_interval_ms() -> u64 {
    30_000
}

impl RuntimeSection {
    pub fn background_interval(&self) -> Duration {
        Duration::from_millis(self.background_interval_ms)
    }
}

/// LogAgent registry and monitoring service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogAgentSection {
    pub base_url: String,
    /// Environment variable containing the API key
    pub api_key_env: Option<String>,
    /// Relay messages for receivers missing from `[peers]` through LogAgent
    #[serde(default)]
    pub relay: bool,
}

/// VTEX commerce platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VtexSection {
    pub store_url: String,
    /// Environment variable containing the app key
    pub app_key_env: String,
    /// Environment variable containing the app token
    pub app_token_env: String,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid agent ID format: {0}")]
    InvalidAgentId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgentConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_agent_id(&self.agent.id)?;

        if self.protocol.default_timeout_ms == 0 || self.protocol.transport_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Protocol timeouts must be greater than zero".to_string(),
            ));
        }

        if self.runtime.background_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "runtime.background_interval_ms must be greater than zero".to_string(),
            ));
        }

        for (peer_id, base_url) in &self.peers {
            validate_agent_id(peer_id)?;
            validate_url(&format!("peers.{peer_id}"), base_url)?;
        }

        if let Some(log_agent) = &self.log_agent {
            validate_url("log_agent.base_url", &log_agent.base_url)?;
        }

        if let Some(vtex) = &self.vtex {
            validate_url("vtex.store_url", &vtex.store_url)?;
        }

        Ok(())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// LogAgent API key from its environment variable, if configured and set
    pub fn get_log_agent_api_key(&self) -> Option<String> {
        self.log_agent
            .as_ref()
            .and_then(|section| Self::get_env_var_optional(section.api_key_env.as_ref()))
    }

    /// VTEX app key and token from their environment variables
    pub fn get_vtex_credentials(&self) -> Result<(String, String), ConfigError> {
        let vtex = self
            .vtex
            .as_ref()
            .ok_or_else(|| ConfigError::InvalidConfig("No [vtex] section configured".to_string()))?;

        Ok((
            Self::get_env_var_required(&vtex.app_key_env)?,
            Self::get_env_var_required(&vtex.app_token_env)?,
        ))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[agent]
id = "test-agent"
name = "Test Agent"
agent_type = "testing"
description = "A test agent"
capabilities = ["greet", "calculate"]

[server]
host = "127.0.0.1"
port = 0

[runtime]
background_interval_ms = 1000
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate agent ID format
pub fn validate_agent_id(agent_id: &str) -> Result<(), ConfigError> {
    let valid_chars = agent_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if agent_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidAgentId(format!(
            "Agent ID '{agent_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(value)
        .map_err(|e| ConfigError::InvalidConfig(format!("{field}: invalid URL '{value}': {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::InvalidConfig(format!(
            "{field}: unsupported URL scheme '{scheme}'"
        ))),
    }
}
