//! Plugin Boundary
//!
//! A plugin is any unit implementing [`Plugin`]: a typed name, a JSON-schema
//! describing its config, an optional semantic validator and an async
//! execute operation. Plugins are process-wide singletons registered at
//! startup and looked up by `(type, name)`.
//!
//! Plugins communicate exclusively through the shared [`PipelineContext`]:
//! they read their inputs from it and write their result under the step's
//! output key. The executor validates the user-authored config first, then
//! injects the step's `output_key` into the config map handed to `execute`,
//! so producing plugins know where to write without a side channel.

mod builtin;
mod registry;

pub use builtin::{register_builtins, FieldMapperPlugin, JsonFileInput, JsonFileOutput, SleepPlugin};
pub use registry::PluginRegistry;

pub use crate::types::{PluginRef, PluginType};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::PipelineContext;
use crate::error::CoreError;

/// Contract every plugin satisfies.
///
/// `execute` must honor the cancellation token at its earliest safe point —
/// between I/O operations and loop iterations — and return
/// [`CoreError::Cancelled`] when it does.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn plugin_type(&self) -> PluginType;

    fn name(&self) -> &str;

    /// JSON-Schema for the config map. Declares `additionalProperties:
    /// false`; unknown fields are rejected at validation time.
    fn input_schema(&self) -> Value;

    /// Semantic checks beyond the schema (path sanity, mutually exclusive
    /// fields, ...). The registry runs the schema first, then this.
    fn validate_config(&self, _config: &Value) -> Result<(), CoreError> {
        Ok(())
    }

    /// Run the plugin. Mutates `ctx` in place; the same reference is the
    /// step's result.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        config: &Value,
        ctx: &mut PipelineContext,
    ) -> Result<(), CoreError>;

    /// `Type.name` reference for this plugin.
    fn reference(&self) -> PluginRef {
        PluginRef::new(self.plugin_type(), self.name())
    }
}

impl std::fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("plugin_type", &self.plugin_type())
            .field("name", &self.name())
            .finish()
    }
}
