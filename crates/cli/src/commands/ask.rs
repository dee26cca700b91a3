//! `rustedbridge ask` — Answer one question.

use rustedbridge_agent::Termination;
use rustedbridge_config::AppConfig;

pub async fn run(
    config: &AppConfig,
    question: &str,
    max_iterations: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.api_key.is_none() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    AZURE_OPENAI_API_KEY     (with AZURE_OPENAI_ENDPOINT)");
        eprintln!("    OPENAI_API_KEY");
        eprintln!("    RUSTEDBRIDGE_API_KEY     (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let orchestrator = super::orchestrator(config, max_iterations)?;

    eprint!("  Thinking...");
    let outcome = orchestrator.run(question).await;
    eprint!("\r              \r");

    println!("{}", outcome.answer);

    eprintln!();
    eprintln!(
        "  [{}] {} iteration(s), {} tool call(s)",
        outcome.termination,
        outcome.iterations,
        outcome.invocations.len()
    );
    for record in &outcome.invocations {
        let target = match (&record.worker, &record.operation) {
            (Some(worker), Some(operation)) => format!("{worker} > {operation}"),
            _ => record.proposed.clone(),
        };
        let mark = if record.success { "ok" } else { "failed" };
        eprintln!("    #{} {target}: {mark}", record.iteration);
    }
    if let Some(reason) = &outcome.reasoning_error {
        eprintln!("  Reasoning error: {reason}");
    }

    if outcome.termination == Termination::ReasoningFailed {
        return Err("the reasoning component failed".into());
    }
    Ok(())
}
