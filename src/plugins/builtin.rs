//! Built-in plugins
//!
//! The small set the core ships with. Heavier inputs and outputs (CSV,
//! Excel, HTTP APIs, LLM wrappers) live outside the core and register
//! through the same contract.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{Plugin, PluginRegistry, PluginType};
use crate::context::PipelineContext;
use crate::error::CoreError;

/// Register every built-in into `registry`.
pub fn register_builtins(registry: &PluginRegistry) -> Result<(), CoreError> {
    registry.register(Arc::new(JsonFileInput))?;
    registry.register(Arc::new(FieldMapperPlugin))?;
    registry.register(Arc::new(JsonFileOutput))?;
    registry.register(Arc::new(SleepPlugin))?;
    Ok(())
}

/// Where a producing plugin writes when the step declares no output key.
fn output_key(config: &Value, fallback: &str) -> String {
    config
        .get("output_key")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

// ============================================================================
// Input.json_file
// ============================================================================

/// Reads a JSON document from disk into the context.
pub struct JsonFileInput;

#[async_trait]
impl Plugin for JsonFileInput {
    fn plugin_type(&self) -> PluginType {
        PluginType::Input
    }

    fn name(&self) -> &str {
        "json_file"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                "output_key": {"type": "string"}
            },
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        config: &Value,
        ctx: &mut PipelineContext,
    ) -> Result<(), CoreError> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let path = config["file_path"]
            .as_str()
            .ok_or_else(|| CoreError::plugin_failure("Input.json_file", "file_path missing"))?;
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            CoreError::plugin_failure("Input.json_file", format!("reading {path}: {e}"))
        })?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            CoreError::plugin_failure("Input.json_file", format!("parsing {path}: {e}"))
        })?;
        ctx.set(output_key(config, "data"), value);
        Ok(())
    }
}

// ============================================================================
// Data_Processing.field_mapper
// ============================================================================

/// Projects fields out of a context value into a new object.
///
/// Config: `source_key` names the context entry to read; `fields` maps
/// output field names to dotted paths inside that entry.
pub struct FieldMapperPlugin;

#[async_trait]
impl Plugin for FieldMapperPlugin {
    fn plugin_type(&self) -> PluginType {
        PluginType::DataProcessing
    }

    fn name(&self) -> &str {
        "field_mapper"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_key": {"type": "string"},
                "fields": {
                    "type": "object",
                    "additionalProperties": {"type": "string"}
                },
                "output_key": {"type": "string"}
            },
            "required": ["source_key", "fields"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        config: &Value,
        ctx: &mut PipelineContext,
    ) -> Result<(), CoreError> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let source_key = config["source_key"].as_str().unwrap_or_default();
        let source = ctx.get(source_key).cloned().ok_or_else(|| {
            CoreError::plugin_failure(
                "Data_Processing.field_mapper",
                format!("source key '{source_key}' not in context"),
            )
        })?;
        let fields = config["fields"].as_object().cloned().unwrap_or_default();

        let mut mapped = serde_json::Map::with_capacity(fields.len());
        for (target, path) in fields {
            let path = path.as_str().unwrap_or_default();
            let value = walk_path(&source, path).ok_or_else(|| {
                CoreError::plugin_failure(
                    "Data_Processing.field_mapper",
                    format!("path '{path}' not found in '{source_key}'"),
                )
            })?;
            mapped.insert(target, value.clone());
        }
        ctx.set(output_key(config, "mapped"), Value::Object(mapped));
        Ok(())
    }
}

/// Dotted-path walk inside a single JSON value (objects by key, arrays by
/// numeric segment).
fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

// ============================================================================
// Output.json_file
// ============================================================================

/// Writes a context value to disk as pretty-printed JSON.
pub struct JsonFileOutput;

#[async_trait]
impl Plugin for JsonFileOutput {
    fn plugin_type(&self) -> PluginType {
        PluginType::Output
    }

    fn name(&self) -> &str {
        "json_file"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string"},
                "source_key": {"type": "string"},
                "output_key": {"type": "string"}
            },
            "required": ["file_path", "source_key"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        config: &Value,
        ctx: &mut PipelineContext,
    ) -> Result<(), CoreError> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let path = config["file_path"].as_str().unwrap_or_default();
        let source_key = config["source_key"].as_str().unwrap_or_default();
        let value = ctx.get(source_key).ok_or_else(|| {
            CoreError::plugin_failure(
                "Output.json_file",
                format!("source key '{source_key}' not in context"),
            )
        })?;
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| {
            CoreError::plugin_failure("Output.json_file", format!("serializing: {e}"))
        })?;
        tokio::fs::write(path, bytes).await.map_err(|e| {
            CoreError::plugin_failure("Output.json_file", format!("writing {path}: {e}"))
        })?;
        ctx.set(
            output_key(config, "saved"),
            json!({"saved": true, "path": path}),
        );
        Ok(())
    }
}

// ============================================================================
// Data_Processing.sleep
// ============================================================================

/// Waits for `duration_ms`, honoring cancellation. A test aid for timeout
/// and cancellation paths.
pub struct SleepPlugin;

#[async_trait]
impl Plugin for SleepPlugin {
    fn plugin_type(&self) -> PluginType {
        PluginType::DataProcessing
    }

    fn name(&self) -> &str {
        "sleep"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "duration_ms": {"type": "integer", "minimum": 0},
                "output_key": {"type": "string"}
            },
            "required": ["duration_ms"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        config: &Value,
        ctx: &mut PipelineContext,
    ) -> Result<(), CoreError> {
        let duration_ms = config["duration_ms"].as_u64().unwrap_or(0);
        tokio::select! {
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            _ = tokio::time::sleep(std::time::Duration::from_millis(duration_ms)) => {}
        }
        ctx.set(output_key(config, "slept"), json!({"slept_ms": duration_ms}));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = dir.path().join("in.json");
        let out_path = dir.path().join("out.json");
        std::fs::write(&in_path, r#"{"rows": [1, 2, 3]}"#).unwrap();

        let cancel = CancellationToken::new();
        let mut ctx = PipelineContext::new();

        JsonFileInput
            .execute(
                &cancel,
                &json!({"file_path": in_path.to_str().unwrap(), "output_key": "raw"}),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(ctx.resolve_path("raw.rows[2]"), Some(&json!(3)));

        JsonFileOutput
            .execute(
                &cancel,
                &json!({
                    "file_path": out_path.to_str().unwrap(),
                    "source_key": "raw",
                    "output_key": "saved"
                }),
                &mut ctx,
            )
            .await
            .unwrap();
        assert!(out_path.exists());
        assert_eq!(ctx.resolve_path("saved.saved"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_field_mapper_projects() {
        let cancel = CancellationToken::new();
        let mut ctx = PipelineContext::new();
        ctx.set("raw", json!({"user": {"name": "ada", "age": 36}, "tags": ["x"]}));

        FieldMapperPlugin
            .execute(
                &cancel,
                &json!({
                    "source_key": "raw",
                    "fields": {"who": "user.name", "first_tag": "tags.0"},
                    "output_key": "mapped"
                }),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(ctx.resolve_path("mapped.who"), Some(&json!("ada")));
        assert_eq!(ctx.resolve_path("mapped.first_tag"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn test_field_mapper_missing_path_fails() {
        let cancel = CancellationToken::new();
        let mut ctx = PipelineContext::new();
        ctx.set("raw", json!({"a": 1}));

        let err = FieldMapperPlugin
            .execute(
                &cancel,
                &json!({"source_key": "raw", "fields": {"x": "b.c"}}),
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PluginExecution { .. }));
    }

    #[tokio::test]
    async fn test_sleep_honors_cancellation() {
        let cancel = CancellationToken::new();
        let mut ctx = PipelineContext::new();
        cancel.cancel();

        let err = SleepPlugin
            .execute(&cancel, &json!({"duration_ms": 60_000}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[test]
    fn test_register_builtins() {
        let registry = PluginRegistry::new();
        register_builtins(&registry).unwrap();
        assert_eq!(registry.list().len(), 4);
        assert!(registry
            .lookup(&"Input.json_file".parse().unwrap())
            .is_ok());
    }
}
