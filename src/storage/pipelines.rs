//! Stored pipeline definitions, keyed by name

use super::{Store, StoreError};
use crate::types::Pipeline;

impl Store {
    pub fn save_pipeline(&self, pipeline: &Pipeline) -> Result<(), StoreError> {
        Self::put(&self.pipelines, pipeline.name.as_bytes(), pipeline)
    }

    pub fn load_pipeline(&self, name: &str) -> Result<Option<Pipeline>, StoreError> {
        Self::get(&self.pipelines, name.as_bytes())
    }

    pub fn list_pipelines(&self) -> Result<Vec<Pipeline>, StoreError> {
        Self::scan(&self.pipelines)
    }

    pub fn delete_pipeline(&self, name: &str) -> Result<(), StoreError> {
        self.pipelines
            .remove(name.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(format!("pipeline {name}")))?;
        Ok(())
    }
}
