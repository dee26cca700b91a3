//! Provider router: builds the configured reasoning backends and picks one.

use std::collections::HashMap;
use std::sync::Arc;

use rustedbridge_config::{AppConfig, ProviderConfig};
use rustedbridge_core::error::ProviderError;
use rustedbridge_core::provider::Provider;

use crate::openai_compat::{DEFAULT_AZURE_API_VERSION, OpenAiCompatProvider};

/// Named providers plus the default selection.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// The provider named by `name`, or the default one.
    pub fn select(&self, name: Option<&str>) -> Result<Arc<dyn Provider>, ProviderError> {
        let name = name.unwrap_or(&self.default_provider);
        self.get(name).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "provider '{name}' is not configured (for azure, set AZURE_OPENAI_ENDPOINT or providers.azure.api_url)"
            ))
        })
    }

    pub fn default_name(&self) -> &str {
        &self.default_provider
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// Every `[providers.<name>]` table is registered, and the default provider
/// is registered from top-level settings when it has no table. An Azure
/// provider without an endpoint is skipped with a warning.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        if let Some(provider) = build_one(name, provider_config, config) {
            router.register(name.clone(), provider);
        }
    }

    if router.get(&config.default_provider).is_none() {
        if let Some(provider) = build_one(&config.default_provider, &ProviderConfig::default(), config) {
            router.register(config.default_provider.clone(), provider);
        }
    }

    router
}

fn build_one(name: &str, provider_config: &ProviderConfig, config: &AppConfig) -> Option<Arc<dyn Provider>> {
    let api_key = provider_config
        .api_key
        .clone()
        .or_else(|| config.api_key.clone())
        .unwrap_or_default();

    if name == "azure" {
        let Some(endpoint) = provider_config.api_url.as_deref() else {
            tracing::warn!("Azure provider has no endpoint configured, skipping");
            return None;
        };
        let deployment = provider_config
            .default_model
            .as_deref()
            .unwrap_or(&config.default_model);
        let api_version = provider_config
            .api_version
            .as_deref()
            .unwrap_or(DEFAULT_AZURE_API_VERSION);
        return Some(Arc::new(OpenAiCompatProvider::azure(
            endpoint,
            deployment,
            api_version,
            api_key,
        )));
    }

    let base_url = provider_config
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(name));
    Some(Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)))
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
