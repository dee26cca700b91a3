//! Subcommand implementations and the wiring they share.

pub mod ask;
pub mod call;
pub mod catalog;
pub mod config_cmd;
pub mod serve;
pub mod status;

use std::sync::Arc;

use rustedbridge_agent::OrchestrationLoop;
use rustedbridge_catalog::CatalogCache;
use rustedbridge_config::AppConfig;
use rustedbridge_core::event::EventBus;
use rustedbridge_transport::{DockerConnector, SessionConfig, WorkerClient};

/// A client that reaches workers through the Docker Engine.
pub fn worker_client(config: &AppConfig) -> WorkerClient {
    let session = SessionConfig {
        protocol_version: config.protocol.protocol_version.clone(),
        client: config.protocol.client_info(),
    };
    WorkerClient::new(Arc::new(DockerConnector::new(&config.docker.socket_path)), session)
}

pub fn catalog_cache(config: &AppConfig, event_bus: Arc<EventBus>) -> Arc<CatalogCache> {
    Arc::new(CatalogCache::new(worker_client(config), config.workers.clone()).with_event_bus(event_bus))
}

/// The orchestration loop with the configured provider, model and budget.
pub fn orchestrator(
    config: &AppConfig,
    max_iterations: Option<u32>,
) -> Result<OrchestrationLoop, Box<dyn std::error::Error>> {
    let router = rustedbridge_providers::build_from_config(config);
    let provider = router.select(None)?;
    tracing::debug!(provider = %provider.name(), model = %config.default_model, "Provider selected");

    let event_bus = Arc::new(EventBus::default());
    let catalog = catalog_cache(config, event_bus.clone());

    Ok(OrchestrationLoop::new(
        provider,
        catalog,
        &config.default_model,
        config.agent.system_prompt(),
        event_bus,
    )
    .with_temperature(config.default_temperature)
    .with_max_tokens(config.default_max_tokens)
    .with_max_iterations(max_iterations.unwrap_or(config.agent.max_iterations))
    .with_discovery_tools(config.agent.discovery_tools.clone()))
}
