//! Configuration commands.

use std::path::Path;

use super::ConfigAction;
use crate::config::{self, Config};

/// Show, locate or save the effective configuration
pub fn cmd_config(config: &Config, explicit: Option<&Path>, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(config)?);
            if let Err(e) = config.validate() {
                eprintln!("\nWarning: {}", e);
            }
        }
        ConfigAction::Path => match explicit.map(Path::to_path_buf).or_else(config::config_path) {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("could not determine config directory"),
        },
        ConfigAction::Save => {
            config.validate()?;
            let path = match explicit {
                Some(path) => {
                    config::save_to(config, path)?;
                    path.to_path_buf()
                }
                None => config::save(config)?,
            };
            println!("Saved config to {}", path.display());
        }
    }
    Ok(())
}
