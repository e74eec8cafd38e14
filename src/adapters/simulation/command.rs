//! External-process simulation engine.
//!
//! Each call spawns the configured executable, writes one JSON request to its
//! stdin and reads one JSON reply from its stdout:
//!
//! ```text
//! stdin:  {"spec": {...}, "particles": 20000, "batches": 150}
//! stdout: {"estimate": 1.00231, "uncertainty_pcm": 41.7}
//! ```

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::domain::models::SimulationConfig;
use crate::domain::ports::{EngineError, SimulationEngine, SimulationOutcome};

#[derive(Serialize)]
struct EngineRequest<'a> {
    spec: &'a serde_json::Value,
    particles: u64,
    batches: u32,
}

pub struct CommandSimulationEngine {
    program: String,
    args: Vec<String>,
    timeout_secs: u64,
}

impl CommandSimulationEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            args,
            timeout_secs,
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Result<Self, EngineError> {
        let program = config
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| EngineError::NotConfigured("simulation.command is not set".to_string()))?;
        Ok(Self::new(program, config.args.clone(), config.timeout_secs))
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Parse the engine's reply: the last non-empty stdout line must be the JSON
/// outcome, so engines may print progress above it.
fn parse_outcome(stdout: &str) -> Result<SimulationOutcome, EngineError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| EngineError::MalformedOutput("empty output".to_string()))?;
    let outcome: SimulationOutcome =
        serde_json::from_str(line).map_err(|e| EngineError::MalformedOutput(e.to_string()))?;
    if !outcome.is_well_formed() {
        return Err(EngineError::MalformedOutput(format!(
            "non-finite or negative values: {line}"
        )));
    }
    Ok(outcome)
}

#[async_trait]
impl SimulationEngine for CommandSimulationEngine {
    fn name(&self) -> &str {
        &self.program
    }

    async fn run(
        &self,
        spec: &serde_json::Value,
        particles: u64,
        batches: u32,
    ) -> Result<SimulationOutcome, EngineError> {
        let payload = serde_json::to_vec(&EngineRequest {
            spec,
            particles,
            batches,
        })
        .map_err(|e| EngineError::Failed(format!("failed to encode request: {e}")))?;

        let mut child = self.build_command().spawn().map_err(EngineError::LaunchFailed)?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Failed("failed to get stdin handle".to_string()))?;

        let result = timeout(Duration::from_secs(self.timeout_secs), async move {
            // An engine that ignores its input may exit before reading it.
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => return Err(EngineError::LaunchFailed(e)),
            }
            drop(stdin);
            child.wait_with_output().await.map_err(EngineError::LaunchFailed)
        })
        .await;

        let output = match result {
            Ok(output) => output?,
            Err(_) => {
                tracing::warn!(program = %self.program, timeout_secs = self.timeout_secs, "simulation timed out");
                return Err(EngineError::Timeout(self.timeout_secs));
            }
        };

        if !output.status.success() {
            return Err(EngineError::NonZeroExit {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let outcome = parse_outcome(&String::from_utf8_lossy(&output.stdout))?;
        tracing::debug!(
            program = %self.program,
            particles,
            batches,
            estimate = outcome.estimate,
            uncertainty_pcm = outcome.uncertainty_pcm,
            "simulation finished"
        );
        Ok(outcome)
    }
}
