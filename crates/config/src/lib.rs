//! Configuration loading, validation, and management for RustedBridge.
//!
//! Loads configuration from `~/.rustedbridge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use rustedbridge_core::rpc::{ClientInfo, PROTOCOL_VERSION};
use rustedbridge_core::worker::WorkerSpec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.rustedbridge/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Reasoning-component provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model name, or deployment name for Azure
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Log filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub docker: DockerConfig,

    /// Workers the bridge discovers and calls, in presentation order
    #[serde(default = "default_workers")]
    pub workers: Vec<WorkerSpec>,
}

fn default_provider() -> String {
    "azure".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_log_level() -> String {
    "info".into()
}

fn default_workers() -> Vec<WorkerSpec> {
    vec![
        WorkerSpec::new(
            "Kadaster",
            "eai-kadaster-service",
            "Query the Kadaster (Dutch Land Registry) for property ownership, cadastral data \
             and building information. Use for questions about properties, owners, buildings \
             and land use.",
        ),
        WorkerSpec::new(
            "CBS",
            "eai-cbs-service",
            "Query CBS (Statistics Netherlands) for demographics, population, income and \
             unemployment. Use for statistical questions.",
        ),
        WorkerSpec::new(
            "Rijkswaterstaat",
            "eai-rijkswaterstaat-service",
            "Query Rijkswaterstaat for infrastructure, roads, bridges, water bodies and water \
             levels. Use for infrastructure questions.",
        ),
    ]
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("log_level", &self.log_level)
            .field("providers", &self.providers)
            .field("agent", &self.agent)
            .field("protocol", &self.protocol)
            .field("docker", &self.docker)
            .field("workers", &self.workers)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL; for Azure, the resource endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Azure `api-version` query parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Orchestration loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Round trips between the reasoning component and the workers
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Replaces the built-in system instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Operations that take a `query` argument instead of `location_id`
    #[serde(default = "default_discovery_tools")]
    pub discovery_tools: Vec<String>,
}

fn default_max_iterations() -> u32 {
    5
}

pub fn default_discovery_tools() -> Vec<String> {
    vec![
        "find_location".into(),
        "find_address".into(),
        "find_area".into(),
        "find_place".into(),
    ]
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: None,
            discovery_tools: default_discovery_tools(),
        }
    }
}

impl AgentSettings {
    /// The configured system instruction, or the built-in one.
    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

/// Handshake parameters announced to every worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    #[serde(default = "default_client_name")]
    pub client_name: String,

    #[serde(default = "default_client_version")]
    pub client_version: String,
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.into()
}
fn default_client_name() -> String {
    ClientInfo::default().name
}
fn default_client_version() -> String {
    ClientInfo::default().version
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            client_name: default_client_name(),
            client_version: default_client_version(),
        }
    }
}

impl ProtocolConfig {
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            name: self.client_name.clone(),
            version: self.client_version.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker Engine API socket
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

fn default_socket_path() -> String {
    "/var/run/docker.sock".into()
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

/// Built-in instruction for the reasoning component.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an expert assistant with access to Dutch geospatial data served by independent \
data services. Each service is offered to you as one tool; pick the service, then pick \
one of its operations with the `tool` field.

Known locations:
- LOC001: Amsterdam (Damrak 1)
- LOC002: Utrecht (Oudegracht 231)
- LOC003: Rotterdam (Coolsingel 40)

Rules:
1. Use the available tools to gather every fact you report.
2. Do not guess and do not answer from general knowledge.
3. If a tool fails or returns an error, say that the data is unavailable.
4. If the tools return nothing useful, answer exactly: \
\"I was unable to retrieve that information from the available data sources.\"
5. Cite the source of each fact as: - **Field**: Value (Source: Service > tool_name)
6. Use a find_* operation with a `query` when you do not know the location id.";

impl AppConfig {
    /// Load configuration from the default path (~/.rustedbridge/config.toml)
    /// and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_overrides(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply environment overrides and re-validate.
    pub fn load_with_overrides(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    ///
    /// - `RUSTEDBRIDGE_API_KEY`, `AZURE_OPENAI_API_KEY`, `OPENAI_API_KEY` fill
    ///   `api_key` when the file left it empty (first one set wins)
    /// - `AZURE_OPENAI_ENDPOINT` switches to the `azure` provider at that endpoint
    /// - `AZURE_OPENAI_DEPLOYMENT_NAME` / `RUSTEDBRIDGE_MODEL` set the model
    /// - `AZURE_OPENAI_API_VERSION` sets the Azure api-version
    /// - `RUSTEDBRIDGE_PROVIDER`, `RUSTEDBRIDGE_MAX_ITERATIONS`, `DOCKER_HOST`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.api_key.is_none() {
            self.api_key = lookup("RUSTEDBRIDGE_API_KEY")
                .or_else(|| lookup("AZURE_OPENAI_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(endpoint) = lookup("AZURE_OPENAI_ENDPOINT") {
            self.default_provider = "azure".into();
            self.providers.entry("azure".into()).or_default().api_url = Some(endpoint);
        }

        if let Some(version) = lookup("AZURE_OPENAI_API_VERSION") {
            self.providers.entry("azure".into()).or_default().api_version = Some(version);
        }

        if let Some(deployment) = lookup("AZURE_OPENAI_DEPLOYMENT_NAME") {
            self.default_model = deployment;
        }

        if let Some(provider) = lookup("RUSTEDBRIDGE_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("RUSTEDBRIDGE_MODEL") {
            self.default_model = model;
        }

        if let Some(raw) = lookup("RUSTEDBRIDGE_MAX_ITERATIONS") {
            match raw.parse() {
                Ok(n) => self.agent.max_iterations = n,
                Err(_) => tracing::warn!(value = %raw, "Ignoring invalid RUSTEDBRIDGE_MAX_ITERATIONS"),
            }
        }

        if let Some(host) = lookup("DOCKER_HOST") {
            match host.strip_prefix("unix://") {
                Some(path) => self.docker.socket_path = path.to_string(),
                None => tracing::warn!(host = %host, "Only unix:// DOCKER_HOST values are supported"),
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".rustedbridge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for worker in &self.workers {
            if worker.name.trim().is_empty() {
                return Err(ConfigError::ValidationError("worker name must not be empty".into()));
            }
            // The dotted fallback form splits "Worker.operation" on the first dot
            if worker.name.contains('.') {
                return Err(ConfigError::ValidationError(format!(
                    "worker name '{}' must not contain '.'",
                    worker.name
                )));
            }
            if !seen.insert(worker.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate worker name '{}'",
                    worker.name
                )));
            }
            if worker.container.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "worker '{}' has no container",
                    worker.name
                )));
            }
            if worker.command.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "worker '{}' has an empty command",
                    worker.name
                )));
            }
        }

        Ok(())
    }

    /// Look up a configured worker by selector name.
    pub fn worker(&self, name: &str) -> Option<&WorkerSpec> {
        self.workers.iter().find(|w| w.name == name)
    }

    /// Render the configuration as TOML with secrets removed.
    pub fn redacted_toml(&self) -> String {
        let mut copy = self.clone();
        if copy.api_key.is_some() {
            copy.api_key = Some("[REDACTED]".into());
        }
        for provider in copy.providers.values_mut() {
            if provider.api_key.is_some() {
                provider.api_key = Some("[REDACTED]".into());
            }
        }
        toml::to_string_pretty(&copy).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            log_level: default_log_level(),
            providers: HashMap::new(),
            agent: AgentSettings::default(),
            protocol: ProtocolConfig::default(),
            docker: DockerConfig::default(),
            workers: default_workers(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
