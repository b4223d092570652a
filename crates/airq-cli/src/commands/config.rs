//! Config command implementation.

use anyhow::{Context, Result};

use crate::cli::ConfigAction;
use crate::config::Config;

pub fn cmd_config(action: ConfigAction, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
            if content.trim().is_empty() {
                println!("# No configuration set ({})", Config::path().display());
            } else {
                print!("{}", content);
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::path().display());
        }
        ConfigAction::Init => {
            let path = Config::path();
            if path.exists() {
                println!("Config already exists: {}", path.display());
            } else {
                Config::default().save()?;
                println!("Created {}", path.display());
            }
        }
    }
    Ok(())
}
