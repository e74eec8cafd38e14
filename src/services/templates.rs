//! Per-tool logging templates.
//!
//! Templates are opaque strings with `{name}` placeholders. Rendering is plain
//! substitution; unknown placeholders are rejected when configuration is
//! validated and left untouched if they slip through.

use std::collections::BTreeMap;

use crate::domain::models::AgentKind;

/// Placeholders a template may reference.
pub const PLACEHOLDERS: [&str; 4] = ["tool_name", "agent", "run_id", "iteration"];

/// Values substituted into a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub tool_name: String,
    pub agent: Option<AgentKind>,
    pub run_id: String,
    pub iteration: Option<u32>,
}

impl TemplateContext {
    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "tool_name" => Some(self.tool_name.clone()),
            "agent" => Some(self.agent.map(|a| a.to_string()).unwrap_or_default()),
            "run_id" => Some(self.run_id.clone()),
            "iteration" => Some(self.iteration.map(|i| i.to_string()).unwrap_or_default()),
            _ => None,
        }
    }
}

/// Names of every `{placeholder}` in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                names.push(&after[..close]);
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    names
}

/// Reject templates that reference anything outside [`PLACEHOLDERS`].
pub fn validate(template: &str) -> Result<(), String> {
    match placeholders(template)
        .into_iter()
        .find(|name| !PLACEHOLDERS.contains(name))
    {
        Some(unknown) => Err(format!(
            "unknown placeholder '{{{unknown}}}' (allowed: {})",
            PLACEHOLDERS.join(", ")
        )),
        None => Ok(()),
    }
}

/// Substitute known placeholders in `template`.
pub fn render(template: &str, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = &after[..close];
        match ctx.lookup(name) {
            Some(value) => out.push_str(&value),
            None => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Render the template configured for `ctx.tool_name`, if any.
pub fn render_for_tool(templates: &BTreeMap<String, String>, ctx: &TemplateContext) -> Option<String> {
    templates
        .get(&ctx.tool_name)
        .map(|template| render(template, ctx))
}
