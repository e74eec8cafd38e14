//! Spec fingerprinting.
//!
//! Canonicalizes a JSON simulation specification and hashes it with SHA-256.
//! Canonical form: mapping keys sorted recursively, integers (including
//! integral floats) rendered as exact decimals, other floats in shortest
//! round-trip scientific notation, transient fields removed at any depth.

use std::collections::BTreeSet;

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

use crate::domain::errors::{OrchestrationError, OrchestrationResult};
use crate::domain::models::{InvokerConfig, SpecFingerprint};

const SPEC_DOMAIN: &str = "simroute.spec.v1\n";
const CALL_DOMAIN: &str = "simroute.call.v1\n";
const MAX_DEPTH: usize = 64;

/// Pure, deterministic spec fingerprinter.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    transient_fields: BTreeSet<String>,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::from_config(&InvokerConfig::default())
    }
}

impl Fingerprinter {
    pub fn new<I, S>(transient_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transient_fields: transient_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &InvokerConfig) -> Self {
        Self::new(config.transient_fields.iter().cloned())
    }

    /// Fingerprint a simulation specification.
    ///
    /// The root must be a non-empty JSON object.
    pub fn fingerprint(&self, spec: &Value) -> OrchestrationResult<SpecFingerprint> {
        let canonical = self.canonicalize(spec)?;
        Ok(SpecFingerprint::from_hex(hash_hex(SPEC_DOMAIN, &canonical)))
    }

    /// Canonical text of `spec`. Exposed for diagnostics (`simroute fingerprint`).
    pub fn canonicalize(&self, spec: &Value) -> OrchestrationResult<String> {
        match spec {
            Value::Object(map) if map.is_empty() => Err(OrchestrationError::InvalidSpec(
                "specification is empty".to_string(),
            )),
            Value::Object(_) => {
                let mut out = String::new();
                self.write_canonical(spec, 0, &mut out)?;
                Ok(out)
            }
            other => Err(OrchestrationError::InvalidSpec(format!(
                "specification must be an object, got {}",
                json_type(other)
            ))),
        }
    }

    /// Dedup key for one tool call.
    ///
    /// Combines the tool name, the spec fingerprint (when the call targets a
    /// spec) and the canonical arguments, so identical calls collide and calls
    /// differing in any argument do not.
    pub fn derive_call_key(
        &self,
        tool_name: &str,
        fingerprint: Option<&SpecFingerprint>,
        args: &Value,
    ) -> OrchestrationResult<String> {
        let mut canonical = String::new();
        canonical.push_str(&encode_string(tool_name));
        canonical.push('|');
        if let Some(fingerprint) = fingerprint {
            canonical.push_str(fingerprint.as_str());
        }
        canonical.push('|');
        self.write_canonical(args, 0, &mut canonical)?;
        Ok(format!("{tool_name}:{}", hash_hex(CALL_DOMAIN, &canonical)))
    }

    /// Short digest of an arbitrary value, for event payloads.
    pub fn digest(&self, value: &Value) -> String {
        let mut canonical = String::new();
        match self.write_canonical(value, 0, &mut canonical) {
            Ok(()) => hash_hex("", &canonical)[..16].to_string(),
            // Too deep to canonicalize; fall back to the raw serialization.
            Err(_) => hash_hex("", &value.to_string())[..16].to_string(),
        }
    }

    fn write_canonical(&self, value: &Value, depth: usize, out: &mut String) -> OrchestrationResult<()> {
        if depth > MAX_DEPTH {
            return Err(OrchestrationError::InvalidSpec(format!(
                "specification nests deeper than {MAX_DEPTH} levels"
            )));
        }
        match value {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Number(n) => match normalize_number(n) {
                Some(rendered) => out.push_str(&rendered),
                None => {
                    return Err(OrchestrationError::InvalidSpec(format!(
                        "number {n} is not representable"
                    )))
                }
            },
            Value::String(s) => out.push_str(&encode_string(s)),
            Value::Array(items) => {
                out.push('[');
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    self.write_canonical(item, depth + 1, out)?;
                }
                out.push(']');
            }
            Value::Object(map) => {
                let mut keys: Vec<&String> = map
                    .keys()
                    .filter(|k| !self.transient_fields.contains(k.as_str()))
                    .collect();
                keys.sort();
                out.push('{');
                for (idx, key) in keys.into_iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    out.push_str(&encode_string(key));
                    out.push(':');
                    self.write_canonical(&map[key], depth + 1, out)?;
                }
                out.push('}');
            }
        }
        Ok(())
    }
}

/// Lossless number rendering. Integers are written exactly, so `100`, `100.0`
/// and `1e2` all become `100`; non-integral floats use the shortest
/// scientific form that round-trips (`4.5` and `4.50` become `4.5e0`).
/// Negative zero collapses to zero.
fn normalize_number(n: &Number) -> Option<String> {
    if let Some(i) = n.as_i64() {
        return Some(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Some(u.to_string());
    }
    let value = n.as_f64().filter(|f| f.is_finite())?;
    let value = if value == 0.0 { 0.0 } else { value };
    if value.fract() == 0.0 {
        // Exact decimal expansion of the integral binary value.
        Some(format!("{value:.0}"))
    } else {
        Some(format!("{value:e}"))
    }
}

fn encode_string(s: &str) -> String {
    // serde_json string escaping is deterministic.
    Value::String(s.to_string()).to_string()
}

fn hash_hex(domain: &str, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
