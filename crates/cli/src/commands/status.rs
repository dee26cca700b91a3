//! `rustedbridge status` — Show configured workers and their container state.

use rustedbridge_config::AppConfig;
use rustedbridge_core::worker::WorkerState;

pub async fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("RustedBridge Status");
    println!("===================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Provider:     {}", config.default_provider);
    println!("  Model:        {}", config.default_model);
    println!("  Iterations:   {}", config.agent.max_iterations);
    println!("  Docker:       {}", config.docker.socket_path);
    println!("  API key:      {}", if config.api_key.is_some() { "set" } else { "missing" });
    println!();

    let client = super::worker_client(config);
    let mut running = 0;
    for worker in &config.workers {
        match client.inspect(worker).await {
            Ok(WorkerState::Running) => {
                running += 1;
                println!("  ✅ {:<16} {} (running)", worker.name, worker.container);
            }
            Ok(state) => println!("  ⚠️  {:<16} {} ({state})", worker.name, worker.container),
            Err(e) => println!("  ❌ {:<16} {} ({e})", worker.name, worker.container),
        }
    }
    println!();
    println!("  {running}/{} workers running", config.workers.len());

    Ok(())
}
