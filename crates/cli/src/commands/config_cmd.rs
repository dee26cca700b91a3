//! `rustedbridge config` — Show the effective configuration.

use std::path::Path;

use rustedbridge_config::AppConfig;

/// Print the configuration after env overrides, secrets redacted.
pub fn show(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config.redacted_toml());
    Ok(())
}

pub fn path(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path.display());
    if !config_path.exists() {
        eprintln!("  (file does not exist; defaults are in effect)");
    }
    Ok(())
}
