//! `simroute config`: show or validate the effective configuration.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the merged configuration as YAML
    Show,
    /// Check the configuration and report the first problem
    Validate,
}

#[derive(Debug, serde::Serialize)]
pub struct ConfigShowOutput {
    pub config: Config,
}

impl CommandOutput for ConfigShowOutput {
    fn to_human(&self) -> String {
        let mut shown = self.config.clone();
        if shown.classifier.api_key.is_some() {
            shown.classifier.api_key = Some("<redacted>".to_string());
        }
        serde_yaml::to_string(&shown).unwrap_or_default()
    }

    fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or_default();
        if let Some(key) = value.pointer_mut("/classifier/api_key") {
            *key = serde_json::Value::String("<redacted>".to_string());
        }
        value
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ConfigValidateOutput {
    pub valid: bool,
    pub message: String,
}

impl CommandOutput for ConfigValidateOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: ConfigArgs, config: Config, json_mode: bool) -> Result<()> {
    match args.command {
        ConfigCommands::Show => output(&ConfigShowOutput { config }, json_mode),
        ConfigCommands::Validate => {
            ConfigLoader::validate(&config).context("Configuration is invalid")?;
            output(
                &ConfigValidateOutput {
                    valid: true,
                    message: "Configuration is valid.".to_string(),
                },
                json_mode,
            );
        }
    }
    Ok(())
}
