//! Core error taxonomy
//!
//! Every failure the execution core can surface is one of these variants.
//! Each variant carries a stable snake_case wire code used by the HTTP
//! envelope and stored in execution records, so callers can branch on the
//! class without parsing messages.

use thiserror::Error;

/// Classified errors for the execution core
#[derive(Debug, Error)]
pub enum CoreError {
    /// Static plugin-config validation failed
    #[error("invalid config for {plugin_ref}: {reason}")]
    ConfigInvalid { plugin_ref: String, reason: String },

    /// A `{{reference}}` in a step config did not resolve against the context
    #[error("unresolved reference '{reference}' in step '{step}'")]
    UnresolvedReference { step: String, reference: String },

    /// A step names a plugin the registry does not know
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    /// The plugin itself returned an error
    #[error("plugin '{plugin_ref}' failed: {message}")]
    PluginExecution {
        plugin_ref: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A step, job or simulation exceeded its time budget
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Explicit cancellation or shutdown
    #[error("cancelled")]
    Cancelled,

    /// Persistence I/O failure; the system is degraded, not corrupted
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Marker applied to executions found `running` at boot
    #[error("orphaned_by_restart")]
    OrphanedByRestart,

    /// User-supplied payload failed validation at the transport boundary
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl CoreError {
    /// Stable wire code for this error class.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigInvalid { .. } => "config_invalid",
            CoreError::UnresolvedReference { .. } => "unresolved_reference",
            CoreError::PluginNotFound(_) => "plugin_not_found",
            CoreError::PluginExecution { .. } => "plugin_execution_error",
            CoreError::Timeout(_) => "timeout",
            CoreError::Cancelled => "cancelled",
            CoreError::StorageUnavailable(_) => "storage_unavailable",
            CoreError::OrphanedByRestart => "orphaned_by_restart",
            CoreError::Validation(_) => "validation_error",
            CoreError::NotFound(_) => "not_found",
        }
    }

    /// Shorthand for wrapping a plugin-returned error without a source chain.
    pub fn plugin_failure(plugin_ref: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::PluginExecution {
            plugin_ref: plugin_ref.into(),
            message: message.into(),
            source: None,
        }
    }
}

impl From<crate::storage::StoreError> for CoreError {
    fn from(err: crate::storage::StoreError) -> Self {
        match err {
            crate::storage::StoreError::NotFound(what) => CoreError::NotFound(what),
            crate::storage::StoreError::Conflict(what) => CoreError::Validation(what),
            other => CoreError::StorageUnavailable(other.to_string()),
        }
    }
}
