//! Per-function parameter schemas used for `schema_valid_rate`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Maps a function name to its parameter schema.
pub type ToolSchemas = HashMap<String, ToolSchema>;

/// `{"properties": {"<param>": {"type": "..."}}}`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ToolSchema {
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PropertySchema {
    #[serde(default, rename = "type")]
    pub param_type: Option<ParamType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Any other declared type name (e.g. `null`); not checked.
    #[serde(other)]
    Unknown,
}

impl ParamType {
    /// Returns `None` when this type is not checked at all.
    fn accepts(self, value: &Value) -> Option<bool> {
        let accepted = match self {
            // Dates and times travel as strings in JSON, so any string is accepted.
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Unknown => return None,
        };
        Some(accepted)
    }
}

impl ToolSchema {
    /// Checks every argument whose name is declared in `properties`.
    ///
    /// Arguments the schema doesn't know about are skipped: extraneous keys
    /// are already penalized by parameter name precision.
    pub fn validate(&self, arguments: &Map<String, Value>) -> bool {
        for (key, value) in arguments {
            let Some(param_type) = self.properties.get(key).and_then(|p| p.param_type) else {
                continue;
            };
            if param_type.accepts(value) == Some(false) {
                debug!(param = %key, expected = ?param_type, "Argument does not match schema type");
                return false;
            }
        }
        true
    }
}

/// A single entry of a dataset's `tools` column.
#[derive(Debug, Deserialize)]
struct ToolDefinition {
    #[serde(default)]
    name: String,
    #[serde(default)]
    parameters: Option<ToolParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolParameters {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

/// Builds [`ToolSchemas`] from a dataset's `tools` column.
///
/// Datasets stored with a unified column layout pad every tool with `null`
/// for parameters that belong to other tools, so `null` properties are
/// dropped. Tools without a name, and entries that are not tool objects,
/// are skipped.
pub fn extract_tool_schemas(tools: &[Value]) -> ToolSchemas {
    let mut schemas = ToolSchemas::new();
    for tool in tools {
        let definition: ToolDefinition = match serde_json::from_value(tool.clone()) {
            Ok(definition) => definition,
            Err(e) => {
                debug!(error = %e, "Skipping malformed tool definition");
                continue;
            }
        };
        if definition.name.is_empty() {
            continue;
        }
        let properties = definition
            .parameters
            .and_then(|parameters| parameters.properties)
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, property)| !property.is_null())
            .filter_map(|(key, property)| {
                serde_json::from_value::<PropertySchema>(property)
                    .ok()
                    .map(|property| (key, property))
            })
            .collect();
        schemas.insert(definition.name, ToolSchema { properties });
    }
    schemas
}
