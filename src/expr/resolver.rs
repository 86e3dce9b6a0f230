//! Variable Resolution - `${...}` substitution in task parameters
//!
//! - `"${result.search.hits}"` (whole string) → the referenced value, type kept
//! - `"Topic: ${topic}"` (embedded) → text interpolation
//!
//! Unresolvable placeholders become `null` (whole string) or empty text
//! (embedded) and log a warning. Resolution never fails.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde_json::{Map, Value};
use tracing::warn;

use super::path::{self, Scope};

/// Pre-compiled regex for `${path}` placeholders
static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\s*([^{}]+?)\s*\}").expect("valid regex"));

/// Substitutes `${...}` placeholders against an execution scope
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableResolver;

impl VariableResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve every placeholder in a parameter map (recursively)
    pub fn resolve_variables<S: Scope + ?Sized>(
        &self,
        parameters: &Map<String, Value>,
        scope: &S,
    ) -> Map<String, Value> {
        parameters
            .iter()
            .map(|(k, v)| (k.clone(), self.resolve_value(v, scope)))
            .collect()
    }

    /// Resolve placeholders in any JSON value (maps and lists recursively)
    pub fn resolve_value<S: Scope + ?Sized>(&self, value: &Value, scope: &S) -> Value {
        match value {
            Value::String(s) => self.resolve_string(s, scope),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_value(item, scope))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(self.resolve_variables(map, scope)),
            other => other.clone(),
        }
    }

    fn resolve_string<S: Scope + ?Sized>(&self, template: &str, scope: &S) -> Value {
        // Early return: no placeholder, no regex work
        if !template.contains("${") {
            return Value::String(template.to_string());
        }

        // Whole-string placeholder keeps the referenced value's type
        if let Some(cap) = PLACEHOLDER_RE.captures(template) {
            if cap.get(0).map(|m| m.as_str().len()) == Some(template.len()) {
                return lookup(&cap[1], scope).unwrap_or(Value::Null);
            }
        }

        let mut result = String::with_capacity(template.len() + 32);
        let mut last_end = 0;
        for cap in PLACEHOLDER_RE.captures_iter(template) {
            let Some(m) = cap.get(0) else { continue };
            result.push_str(&template[last_end..m.start()]);
            if let Some(value) = lookup(&cap[1], scope) {
                result.push_str(&value_to_text(&value));
            }
            last_end = m.end();
        }
        result.push_str(&template[last_end..]);
        Value::String(result)
    }

    /// Node ids referenced through `${result.<id>...}` anywhere in a value
    pub fn references(value: &Value) -> Vec<String> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        collect_references(value, &mut seen, &mut out);
        out
    }
}

fn collect_references(value: &Value, seen: &mut FxHashSet<String>, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for cap in PLACEHOLDER_RE.captures_iter(s) {
                let Ok(segments) = path::parse(&cap[1]) else {
                    continue;
                };
                if let Some(id) = path::referenced_node(&segments) {
                    if seen.insert(id.to_string()) {
                        out.push(id.to_string());
                    }
                }
            }
        }
        Value::Array(items) => items
            .iter()
            .for_each(|item| collect_references(item, seen, out)),
        Value::Object(map) => map
            .values()
            .for_each(|item| collect_references(item, seen, out)),
        _ => {}
    }
}

fn lookup<S: Scope + ?Sized>(reference: &str, scope: &S) -> Option<Value> {
    match path::resolve(scope, reference) {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            warn!(reference, "unresolved placeholder");
            None
        }
        Err(e) => {
            warn!(reference, error = %e, "malformed placeholder");
            None
        }
    }
}

/// Text form used for embedded placeholders (strings unquoted, rest as JSON)
fn value_to_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        Value::Null => Cow::Borrowed(""),
        other => Cow::Owned(other.to_string()),
    }
}
