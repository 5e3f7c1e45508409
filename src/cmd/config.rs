//! Configuration view and validation commands (`testboard config`).

use std::path::Path;

use anyhow::{Context, Result, bail};

use testboard::config::AppConfig;

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    config: &AppConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("testboard configuration");
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {}; using defaults", config_path.display());
            }
            println!();
            println!("Effective values (with env overrides):");
            println!();
            print!("{}", toml::to_string_pretty(config)?);
            println!();
            println!(
                "GITHUB_TOKEN: {}",
                if config.github.token.is_some() { "set" } else { "not set" }
            );
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                bail!("{} already exists", config_path.display());
            }
            let content = toml::to_string_pretty(&AppConfig::default())?;
            std::fs::write(config_path, content)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("Created {}", config_path.display());
        }
    }
    Ok(())
}
