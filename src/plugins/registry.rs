//! Typed plugin catalog
//!
//! Identity is `(type, name)`. Registration compiles the plugin's config
//! schema once; a schema that fails to compile rejects the registration.
//! After the server begins accepting work the registry is sealed — further
//! registration must go through the explicit admin path
//! (`register_runtime`), and duplicates always require an unregister first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, info};

use super::{Plugin, PluginRef, PluginType};
use crate::error::CoreError;

struct Entry {
    plugin: Arc<dyn Plugin>,
    validator: jsonschema::Validator,
}

/// Process-wide plugin catalog.
#[derive(Default)]
pub struct PluginRegistry {
    entries: RwLock<HashMap<(PluginType, String), Entry>>,
    sealed: AtomicBool,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin before the server accepts work. Fails on duplicate
    /// identity, on an uncompilable schema, or once the registry is sealed.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), CoreError> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(CoreError::Validation(format!(
                "registry is sealed; runtime registration of {} requires the admin path",
                plugin.reference()
            )));
        }
        self.insert(plugin)
    }

    /// Admin-gated runtime registration for user-uploaded plugins.
    pub fn register_runtime(&self, plugin: Arc<dyn Plugin>) -> Result<(), CoreError> {
        let reference = plugin.reference();
        self.insert(plugin)?;
        info!(plugin = %reference, "Plugin registered at runtime");
        Ok(())
    }

    fn insert(&self, plugin: Arc<dyn Plugin>) -> Result<(), CoreError> {
        let reference = plugin.reference();
        let schema = plugin.input_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            CoreError::Validation(format!("plugin {reference} has an invalid config schema: {e}"))
        })?;

        let key = (plugin.plugin_type(), plugin.name().to_string());
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CoreError::Validation("registry lock poisoned".to_string()))?;
        if entries.contains_key(&key) {
            return Err(CoreError::Validation(format!(
                "plugin {reference} is already registered; unregister it first"
            )));
        }
        entries.insert(key, Entry { plugin, validator });
        debug!(plugin = %reference, "Plugin registered");
        Ok(())
    }

    pub fn unregister(&self, reference: &PluginRef) -> Result<(), CoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CoreError::Validation("registry lock poisoned".to_string()))?;
        entries
            .remove(&(reference.plugin_type, reference.name.clone()))
            .ok_or_else(|| CoreError::PluginNotFound(reference.to_string()))?;
        Ok(())
    }

    /// Freeze startup-time registration. Called once the transport starts.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn lookup(&self, reference: &PluginRef) -> Result<Arc<dyn Plugin>, CoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CoreError::Validation("registry lock poisoned".to_string()))?;
        entries
            .get(&(reference.plugin_type, reference.name.clone()))
            .map(|e| Arc::clone(&e.plugin))
            .ok_or_else(|| CoreError::PluginNotFound(reference.to_string()))
    }

    pub fn list(&self) -> Vec<PluginRef> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        let mut refs: Vec<_> = entries
            .keys()
            .map(|(t, n)| PluginRef::new(*t, n.clone()))
            .collect();
        refs.sort_by_key(|r| r.to_string());
        refs
    }

    pub fn list_by_type(&self, plugin_type: PluginType) -> Vec<PluginRef> {
        self.list()
            .into_iter()
            .filter(|r| r.plugin_type == plugin_type)
            .collect()
    }

    /// Pre-execution validation: compiled schema first, then the plugin's
    /// own semantic checks. Must be called before every `execute`.
    pub fn validate(&self, reference: &PluginRef, config: &Value) -> Result<(), CoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CoreError::Validation("registry lock poisoned".to_string()))?;
        let entry = entries
            .get(&(reference.plugin_type, reference.name.clone()))
            .ok_or_else(|| CoreError::PluginNotFound(reference.to_string()))?;

        if let Err(error) = entry.validator.validate(config) {
            return Err(CoreError::ConfigInvalid {
                plugin_ref: reference.to_string(),
                reason: error.to_string(),
            });
        }
        entry.plugin.validate_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineContext;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    struct EchoPlugin;

    #[async_trait]
    impl Plugin for EchoPlugin {
        fn plugin_type(&self) -> PluginType {
            PluginType::DataProcessing
        }

        fn name(&self) -> &str {
            "echo"
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"},
                    "output_key": {"type": "string"}
                },
                "required": ["message"],
                "additionalProperties": false
            })
        }

        async fn execute(
            &self,
            _cancel: &CancellationToken,
            config: &serde_json::Value,
            ctx: &mut PipelineContext,
        ) -> Result<(), CoreError> {
            ctx.set("echo", config["message"].clone());
            Ok(())
        }
    }

    fn echo_ref() -> PluginRef {
        PluginRef::new(PluginType::DataProcessing, "echo")
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(EchoPlugin)).unwrap();
        let plugin = registry.lookup(&echo_ref()).unwrap();
        assert_eq!(plugin.name(), "echo");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(EchoPlugin)).unwrap();
        assert!(registry.register(Arc::new(EchoPlugin)).is_err());

        // after unregister it works again
        registry.unregister(&echo_ref()).unwrap();
        registry.register(Arc::new(EchoPlugin)).unwrap();
    }

    #[test]
    fn test_sealed_registry_requires_admin_path() {
        let registry = PluginRegistry::new();
        registry.seal();
        assert!(registry.register(Arc::new(EchoPlugin)).is_err());
        registry.register_runtime(Arc::new(EchoPlugin)).unwrap();
        assert!(registry.lookup(&echo_ref()).is_ok());
    }

    #[test]
    fn test_lookup_missing_is_plugin_not_found() {
        let registry = PluginRegistry::new();
        match registry.lookup(&echo_ref()) {
            Err(CoreError::PluginNotFound(name)) => {
                assert_eq!(name, "Data_Processing.echo");
            }
            other => panic!("expected PluginNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_unknown_fields() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(EchoPlugin)).unwrap();

        registry
            .validate(&echo_ref(), &json!({"message": "hi"}))
            .unwrap();

        let err = registry
            .validate(&echo_ref(), &json!({"message": "hi", "bogus": 1}))
            .unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));

        let err = registry.validate(&echo_ref(), &json!({})).unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_list_by_type() {
        let registry = PluginRegistry::new();
        registry.register(Arc::new(EchoPlugin)).unwrap();
        assert_eq!(registry.list_by_type(PluginType::DataProcessing).len(), 1);
        assert!(registry.list_by_type(PluginType::Output).is_empty());
    }
}
