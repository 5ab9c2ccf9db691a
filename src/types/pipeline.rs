//! Pipeline definitions: plugin references, steps and the pipeline itself

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Plugin Type
// ============================================================================

/// Closed set of plugin categories.
///
/// The wire spelling matches the pipeline definition format
/// (`Input`, `Data_Processing`, `AIModels`, ...).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PluginType {
    Input,
    #[serde(rename = "Data_Processing")]
    DataProcessing,
    #[serde(rename = "AIModels")]
    AiModels,
    Output,
    Ontology,
    DigitalTwin,
    #[serde(rename = "ML")]
    Ml,
    Storage,
    Monitoring,
}

impl PluginType {
    /// Wire spelling used in `Type.name` references.
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Input => "Input",
            PluginType::DataProcessing => "Data_Processing",
            PluginType::AiModels => "AIModels",
            PluginType::Output => "Output",
            PluginType::Ontology => "Ontology",
            PluginType::DigitalTwin => "DigitalTwin",
            PluginType::Ml => "ML",
            PluginType::Storage => "Storage",
            PluginType::Monitoring => "Monitoring",
        }
    }

    /// Parse the wire spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Input" => Some(PluginType::Input),
            "Data_Processing" => Some(PluginType::DataProcessing),
            "AIModels" => Some(PluginType::AiModels),
            "Output" => Some(PluginType::Output),
            "Ontology" => Some(PluginType::Ontology),
            "DigitalTwin" => Some(PluginType::DigitalTwin),
            "ML" => Some(PluginType::Ml),
            "Storage" => Some(PluginType::Storage),
            "Monitoring" => Some(PluginType::Monitoring),
            _ => None,
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Plugin Reference
// ============================================================================

/// A `Type.name` reference into the plugin registry.
///
/// Serialized as the dotted string (`"Input.csv_reader"`); the first `.`
/// separates the type from the name, so plugin names may themselves contain
/// dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginRef {
    pub plugin_type: PluginType,
    pub name: String,
}

impl PluginRef {
    pub fn new(plugin_type: PluginType, name: impl Into<String>) -> Self {
        Self {
            plugin_type,
            name: name.into(),
        }
    }
}

impl fmt::Display for PluginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.plugin_type, self.name)
    }
}

impl FromStr for PluginRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (type_part, name_part) = s
            .split_once('.')
            .ok_or_else(|| format!("plugin ref '{s}' is not of the form Type.name"))?;
        let plugin_type = PluginType::parse(type_part)
            .ok_or_else(|| format!("unknown plugin type '{type_part}' in ref '{s}'"))?;
        if name_part.is_empty() {
            return Err(format!("plugin ref '{s}' has an empty name"));
        }
        Ok(PluginRef {
            plugin_type,
            name: name_part.to_string(),
        })
    }
}

impl Serialize for PluginRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PluginRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Steps & Pipelines
// ============================================================================

/// Atomic unit of a pipeline: one plugin invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step name, unique within the pipeline for reporting
    pub name: String,
    /// `Type.name` reference resolved against the registry at execution time
    pub plugin_ref: PluginRef,
    /// Opaque configuration map; strings may carry `{{ref}}` templates
    #[serde(default)]
    pub config: serde_json::Value,
    /// Context keys that must exist before this step runs
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Context key the plugin must have written when the step completes
    #[serde(default)]
    pub output_key: Option<String>,
}

/// Declarative sequence of steps sharing one context per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_ref_round_trip() {
        let r: PluginRef = "Input.csv_reader".parse().unwrap();
        assert_eq!(r.plugin_type, PluginType::Input);
        assert_eq!(r.name, "csv_reader");
        assert_eq!(r.to_string(), "Input.csv_reader");
    }

    #[test]
    fn test_plugin_ref_name_may_contain_dots() {
        let r: PluginRef = "Ontology.query.sparql".parse().unwrap();
        assert_eq!(r.name, "query.sparql");
    }

    #[test]
    fn test_plugin_ref_rejects_malformed() {
        assert!("csv_reader".parse::<PluginRef>().is_err());
        assert!("Bogus.name".parse::<PluginRef>().is_err());
        assert!("Input.".parse::<PluginRef>().is_err());
    }

    #[test]
    fn test_step_deserializes_from_pipeline_json() {
        let step: Step = serde_json::from_value(serde_json::json!({
            "name": "read",
            "plugin_ref": "Input.json_file",
            "config": {"file_path": "/tmp/in.json"},
            "output_key": "raw_data"
        }))
        .unwrap();
        assert_eq!(step.plugin_ref.to_string(), "Input.json_file");
        assert_eq!(step.output_key.as_deref(), Some("raw_data"));
        assert!(step.inputs.is_empty());
    }

    #[test]
    fn test_plugin_type_wire_spellings() {
        assert_eq!(
            serde_json::to_string(&PluginType::DataProcessing).unwrap(),
            "\"Data_Processing\""
        );
        assert_eq!(serde_json::to_string(&PluginType::AiModels).unwrap(), "\"AIModels\"");
        assert_eq!(serde_json::to_string(&PluginType::Ml).unwrap(), "\"ML\"");
    }
}
