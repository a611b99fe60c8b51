//! `datastore config`

use anyhow::{Context, Result};

use crate::cli::types::ConfigCommands;
use crate::domain::models::Config;

pub fn execute(command: &ConfigCommands, config: &Config, json_mode: bool) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let rendered = if json_mode {
                serde_json::to_string_pretty(config).context("Failed to render configuration")?
            } else {
                serde_yaml::to_string(config).context("Failed to render configuration")?
            };
            println!("{rendered}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_config_omits_password() {
        let mut config = Config::default();
        config.database.password = Some("s3cret".to_string());
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("s3cret"));
        assert!(yaml.contains("localhost:9092"));
    }
}
