//! `simroute fingerprint`: canonical form and digest of a spec file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::fingerprint::Fingerprinter;

#[derive(Args, Debug)]
pub struct FingerprintArgs {
    /// JSON or YAML simulation spec
    pub file: PathBuf,

    /// Also print the canonical text that is hashed
    #[arg(long)]
    pub canonical: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct FingerprintOutput {
    pub file: String,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,
}

impl CommandOutput for FingerprintOutput {
    fn to_human(&self) -> String {
        match self.canonical {
            Some(ref canonical) => format!("{}  {}\n{}", self.fingerprint, self.file, canonical),
            None => format!("{}  {}", self.fingerprint, self.file),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Parse a spec document. YAML is a superset of JSON, so one parser covers both.
pub fn read_spec(path: &std::path::Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

pub async fn execute(args: FingerprintArgs, config: &Config, json_mode: bool) -> Result<()> {
    let spec = read_spec(&args.file)?;
    let fingerprinter = Fingerprinter::from_config(&config.invoker);
    let fingerprint = fingerprinter.fingerprint(&spec)?;
    let canonical = if args.canonical {
        Some(fingerprinter.canonicalize(&spec)?)
    } else {
        None
    };

    output(
        &FingerprintOutput {
            file: args.file.display().to_string(),
            fingerprint: fingerprint.as_str().to_string(),
            canonical,
        },
        json_mode,
    );
    Ok(())
}
