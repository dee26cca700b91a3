//! `rustedbridge catalog` — Discover every worker's tools.

use std::sync::Arc;

use rustedbridge_config::AppConfig;
use rustedbridge_core::event::EventBus;

pub async fn run(config: &AppConfig, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let cache = super::catalog_cache(config, Arc::new(EventBus::default()));
    let catalog = cache.get_catalog().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&catalog.selector_schemas())?);
        return Ok(());
    }

    println!("Worker Catalog");
    println!("==============");
    for worker in &config.workers {
        match catalog.entry(&worker.name) {
            Some(entry) => {
                println!();
                println!("  {} ({}) — {} tool(s)", worker.name, worker.container, entry.tools.len());
                for tool in &entry.tools {
                    println!("    - {}: {}", tool.name, first_line(&tool.description));
                }
            }
            None => {
                println!();
                println!("  {} ({}) — unavailable, skipped", worker.name, worker.container);
            }
        }
    }
    println!();
    println!("  {}/{} workers available", catalog.len(), config.workers.len());

    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}
