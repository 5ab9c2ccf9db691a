//! Shared execution context
//!
//! A `PipelineContext` lives for exactly one pipeline run. Steps communicate
//! by mutating it in place: each plugin receives `&mut PipelineContext`,
//! writes its output under the step's `output_key`, and later steps read it
//! back directly or through `{{key}}` template references in their configs.

mod template;

pub use template::resolve_templates;

use serde_json::{Map, Value};

/// Process-local mapping from string keys to JSON values, mutated in place
/// across the steps of a single run. Never shared across runs.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    values: Map<String, Value>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self { values: Map::new() }
    }

    /// Seed a context from an initial JSON object. Non-object values are
    /// ignored (a pipeline starting from a bare scalar has no addressable
    /// keys).
    pub fn seeded(initial: &Value) -> Self {
        match initial {
            Value::Object(map) => Self {
                values: map.clone(),
            },
            _ => Self::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolve a dotted path with optional array indexing:
    /// `results.rows[0].name` walks objects by key and arrays by index.
    pub fn resolve_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let (root_key, root_index) = split_index(first)?;
        let mut current = self.values.get(root_key)?;
        if let Some(idx) = root_index {
            current = current.as_array()?.get(idx)?;
        }
        for segment in segments {
            let (key, index) = split_index(segment)?;
            current = current.as_object()?.get(key)?;
            if let Some(idx) = index {
                current = current.as_array()?.get(idx)?;
            }
        }
        Some(current)
    }

    /// Merge another object into this context, overwriting on collision.
    pub fn merge(&mut self, other: Map<String, Value>) {
        for (k, v) in other {
            self.values.insert(k, v);
        }
    }

    /// The context as a JSON object, for execution records.
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.values
    }
}

/// Split `foo[3]` into `("foo", Some(3))`; plain keys pass through.
/// Malformed brackets return None so the caller treats the path as
/// unresolvable rather than guessing.
fn split_index(segment: &str) -> Option<(&str, Option<usize>)> {
    match segment.find('[') {
        None => Some((segment, None)),
        Some(open) => {
            let close = segment.find(']')?;
            if close != segment.len() - 1 || close <= open + 1 {
                return None;
            }
            let idx: usize = segment[open + 1..close].parse().ok()?;
            Some((&segment[..open], Some(idx)))
        }
    }
}
