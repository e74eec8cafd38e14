//! Output formatting utilities for the CLI.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use crate::domain::models::{ConvergenceState, ConvergenceStatus, RunRecord, SweepPoint};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;
    fn to_json(&self) -> serde_json::Value;
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to a maximum length, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn supports_color() -> bool {
    std::env::var_os("NO_COLOR").is_none()
        && std::env::var("TERM").map_or(true, |term| term != "dumb")
}

fn base_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );
    table
}

fn status_cell(status: Option<ConvergenceStatus>) -> Cell {
    let text = status.map_or("-", ConvergenceStatus::as_str);
    if !supports_color() {
        return Cell::new(text);
    }
    let color = match status {
        Some(ConvergenceStatus::Converged) => Color::Green,
        Some(ConvergenceStatus::Plateaued) => Color::Yellow,
        Some(ConvergenceStatus::Exhausted) => Color::Red,
        Some(ConvergenceStatus::Running) | None => Color::Reset,
    };
    Cell::new(text).fg(color)
}

/// One row per convergence iteration.
pub fn convergence_table(trace: &[ConvergenceState]) -> String {
    let mut table = base_table(&["Iter", "Particles", "Batches", "Estimate", "σ (pcm)", "Δ (pcm)", "Status"]);
    for state in trace {
        table.add_row(vec![
            Cell::new(state.iteration),
            Cell::new(state.particles),
            Cell::new(state.batches),
            Cell::new(format!("{:.5}", state.estimate)),
            Cell::new(format!("{:.1}", state.uncertainty_pcm)),
            Cell::new(state.delta_pcm.map_or_else(|| "-".to_string(), |d| format!("{d:.1}"))),
            status_cell(Some(state.status)),
        ]);
    }
    table.to_string()
}

pub fn runs_table(records: &[RunRecord]) -> String {
    let mut table = base_table(&["Run", "Fingerprint", "Estimate", "σ (pcm)", "Particles", "Status", "Created"]);
    for record in records {
        table.add_row(vec![
            Cell::new(record.run_id),
            Cell::new(record.fingerprint.short()),
            Cell::new(format!("{:.5}", record.estimate)),
            Cell::new(format!("{:.1}", record.uncertainty_pcm)),
            Cell::new(record.particles),
            status_cell(record.convergence),
            Cell::new(record.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    table.to_string()
}

pub fn sweep_table(parameter: &str, points: &[SweepPoint]) -> String {
    let mut table = base_table(&[parameter, "Estimate", "σ (pcm)", "Fingerprint"]);
    for point in points {
        table.add_row(vec![
            Cell::new(truncate(&point.value.to_string(), 24)),
            Cell::new(format!("{:.5}", point.estimate)),
            Cell::new(format!("{:.1}", point.uncertainty_pcm)),
            Cell::new(point.fingerprint.short()),
        ]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long parameter value", 10), "a long ...");
        assert_eq!(truncate("σσσσσσ", 5), "σσ...");
    }
}
