//! `rustedbridge call` — One tool call against one worker.

use rustedbridge_config::AppConfig;
use rustedbridge_core::error::ResolutionError;
use serde_json::Value;

pub async fn run(
    config: &AppConfig,
    worker: &str,
    tool: &str,
    args: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let spec = config
        .worker(worker)
        .ok_or_else(|| ResolutionError::UnknownWorker(worker.to_string()))?;
    let arguments = parse_arguments(args)?;

    let client = super::worker_client(config);
    let outcome = client.call_tool(spec, tool, arguments).await;

    println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
    if !outcome.is_success() {
        return Err(format!("{worker} > {tool} did not succeed").into());
    }
    Ok(())
}

/// Arguments must be a JSON object.
fn parse_arguments(args: &str) -> Result<Value, ResolutionError> {
    match serde_json::from_str::<Value>(args) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(ResolutionError::InvalidArguments(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(ResolutionError::InvalidArguments(e.to_string())),
    }
}
