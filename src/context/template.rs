//! Templated-value resolution for step configs
//!
//! Strings inside a step's config may embed `{{path}}` fragments that are
//! substituted from the shared context before the plugin runs:
//!
//! - `{{results.rows[0].name}}` — dotted-path walk with array indexing
//! - `{{region|eu-west}}` — literal fallback when the path is missing
//!
//! A string that is exactly one fragment resolves to the referenced value
//! with its original JSON type; fragments embedded in longer strings
//! stringify. An unresolvable reference without a fallback is a hard error.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::PipelineContext;
use crate::error::CoreError;

/// Matches `{{ path }}` or `{{ path | default }}` fragments.
fn fragment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([^{}|]+?)\s*(?:\|\s*([^{}]*?)\s*)?\}\}")
            .unwrap_or_else(|e| unreachable!("template regex is a literal: {e}"))
    })
}

/// Recursively resolve every template fragment in `config` against `ctx`.
///
/// `step` only labels errors. Maps and arrays are walked; non-string leaves
/// pass through untouched.
pub fn resolve_templates(
    config: &Value,
    ctx: &PipelineContext,
    step: &str,
) -> Result<Value, CoreError> {
    match config {
        Value::String(s) => resolve_string(s, ctx, step),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_templates(item, ctx, step)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_templates(v, ctx, step)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, ctx: &PipelineContext, step: &str) -> Result<Value, CoreError> {
    let re = fragment_re();

    // Whole-string fragment: keep the referenced value's type.
    if let Some(caps) = re.captures(s) {
        if caps
            .get(0)
            .map(|m| m.start() == 0 && m.end() == s.len())
            .unwrap_or(false)
        {
            let path = caps
                .get(1)
                .map(|m| m.as_str())
                .unwrap_or_default();
            return match ctx.resolve_path(path) {
                Some(value) => Ok(value.clone()),
                None => match caps.get(2) {
                    Some(fallback) => Ok(Value::String(fallback.as_str().to_string())),
                    None => Err(CoreError::UnresolvedReference {
                        step: step.to_string(),
                        reference: path.to_string(),
                    }),
                },
            };
        }
    }

    if !re.is_match(s) {
        return Ok(Value::String(s.to_string()));
    }

    // Embedded fragments: substitute stringified values.
    let mut result = String::with_capacity(s.len());
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        result.push_str(&s[last..whole.start()]);
        let path = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        match ctx.resolve_path(path) {
            Some(value) => result.push_str(&stringify(value)),
            None => match caps.get(2) {
                Some(fallback) => result.push_str(fallback.as_str()),
                None => {
                    return Err(CoreError::UnresolvedReference {
                        step: step.to_string(),
                        reference: path.to_string(),
                    })
                }
            },
        }
        last = whole.end();
    }
    result.push_str(&s[last..]);
    Ok(Value::String(result))
}

/// Render a JSON value for embedding inside a larger string. Strings drop
/// their quotes; everything else uses compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
