//! `rustedbridge serve` — Expose the agent as a JSON-RPC worker on stdio.

use std::sync::Arc;

use rustedbridge_agent::AgentServer;
use rustedbridge_config::AppConfig;
use tokio::io::BufReader;

pub async fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let orchestrator = super::orchestrator(config, None)?;
    let server = AgentServer::new(Arc::new(orchestrator));

    server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    Ok(())
}
