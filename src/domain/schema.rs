// ============================================================
// Layer 3 — Schema Model
// ============================================================
// Typed, read-only view over a raw JSON-Schema document.
//
// Example document:
//   {
//     "type": ["object"],
//     "properties": {
//       "name":  {"type": ["string"], "enum": ["A", "B", "C"]},
//       "score": {"type": ["number"]},
//       "tags":  {"type": ["array"], "items": {"type": ["string"]},
//                 "configuration": {"component": {"maxSequenceLength": 8,
//                                                 "enforceSequenceLengthLimit": true}}}
//     }
//   }
//
// Property order is the document's order (serde_json is built
// with `preserve_order`), and stays fixed for the whole run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::SchemaError;

/// The kind of variable a schema node describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Object,
    Array,
    Number,
    String,
    Boolean,
    Binary,
    Enum,
}

impl SchemaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaKind::Object  => "object",
            SchemaKind::Array   => "array",
            SchemaKind::Number  => "number",
            SchemaKind::String  => "string",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Binary  => "binary",
            SchemaKind::Enum    => "enum",
        }
    }
}

/// One entry of a declarative layer list, e.g.
/// `{"name": "dense", "units": "outputSize"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl LayerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), params: Map::new() }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// `configuration.component` block of a schema node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentConfig {
    /// Encoder layers (sequences) or decoder head layers (leaves).
    pub layers: Option<Vec<LayerSpec>>,
    /// Recurrent step network used when a sequence has to be generated.
    pub decoder_layers: Option<Vec<LayerSpec>>,
    pub enforce_sequence_length_limit: bool,
    pub max_sequence_length: Option<usize>,
    pub max_embedding_table_size: Option<usize>,
}

impl ComponentConfig {
    /// Length cap applied while encoding, if enforced.
    pub fn sequence_cap(&self) -> Option<usize> {
        if self.enforce_sequence_length_limit {
            self.max_sequence_length
        } else {
            None
        }
    }
}

/// Immutable description of one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    kind:          SchemaKind,
    variable_path: String,
    properties:    Vec<(String, SchemaNode)>,
    items:         Option<Box<SchemaNode>>,
    enum_values:   Vec<String>,
    component:     ComponentConfig,
}

impl SchemaNode {
    /// Parse a whole schema document. The root's path defaults to "".
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        Self::parse(value, "")
    }

    fn parse(value: &Value, default_path: &str) -> Result<Self, SchemaError> {
        let obj = value.as_object().ok_or_else(|| SchemaError::Invalid {
            path:   default_path.to_string(),
            reason: "schema node must be a JSON object".to_string(),
        })?;

        let variable_path = obj
            .get("metadata")
            .and_then(|m| m.get("variablePath"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| default_path.to_string());

        let types = type_tags(obj.get("type"));
        let kind  = classify(&types, obj.contains_key("enum")).ok_or_else(|| {
            SchemaError::UnrecognizedKind { path: variable_path.clone(), found: types.clone() }
        })?;

        let component = match obj.get("configuration").and_then(|c| c.get("component")) {
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| SchemaError::Invalid {
                path:   variable_path.clone(),
                reason: format!("bad component configuration: {e}"),
            })?,
            None => ComponentConfig::default(),
        };

        let mut node = SchemaNode {
            kind,
            variable_path,
            properties: Vec::new(),
            items: None,
            enum_values: Vec::new(),
            component,
        };

        match kind {
            SchemaKind::Object => {
                let props = obj
                    .get("properties")
                    .and_then(Value::as_object)
                    .ok_or_else(|| SchemaError::MissingField {
                        path:  node.variable_path.clone(),
                        field: "properties",
                    })?;
                for (key, sub) in props {
                    let child_path = if node.variable_path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", node.variable_path, key)
                    };
                    node.properties.push((key.clone(), Self::parse(sub, &child_path)?));
                }
            }
            SchemaKind::Array => {
                let items = obj.get("items").ok_or_else(|| SchemaError::MissingField {
                    path:  node.variable_path.clone(),
                    field: "items",
                })?;
                let item_path = format!("{}[]", node.variable_path);
                node.items = Some(Box::new(Self::parse(items, &item_path)?));
            }
            SchemaKind::Enum => {
                let values = obj.get("enum").and_then(Value::as_array).cloned().unwrap_or_default();
                if values.is_empty() {
                    return Err(SchemaError::Invalid {
                        path:   node.variable_path.clone(),
                        reason: "enum must list at least one value".to_string(),
                    });
                }
                node.enum_values = values
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other            => other.to_string(),
                    })
                    .collect();
            }
            _ => {}
        }

        Ok(node)
    }

    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    pub fn variable_path(&self) -> &str {
        &self.variable_path
    }

    pub fn properties(&self) -> &[(String, SchemaNode)] {
        &self.properties
    }

    pub fn items(&self) -> Option<&SchemaNode> {
        self.items.as_deref()
    }

    pub fn enum_values(&self) -> &[String] {
        &self.enum_values
    }

    pub fn component(&self) -> &ComponentConfig {
        &self.component
    }

    /// Flattened identifier derived from the variable path.
    pub fn machine_path(&self) -> String {
        machine_path(&self.variable_path)
    }

    pub fn is_object(&self) -> bool {
        self.kind == SchemaKind::Object
    }

    pub fn is_array(&self) -> bool {
        self.kind == SchemaKind::Array
    }

    /// Leaf variables are everything that is neither object nor array.
    pub fn is_field(&self) -> bool {
        !self.is_object() && !self.is_array()
    }

    /// Names of the immediate leaf properties of an object.
    pub fn fields(&self) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|(_, node)| node.is_field())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Every leaf node below this one, depth first in property order.
    pub fn all_fields(&self) -> Vec<&SchemaNode> {
        match self.kind {
            SchemaKind::Object => self.properties.iter().flat_map(|(_, n)| n.all_fields()).collect(),
            SchemaKind::Array  => self.items.as_deref().map(|n| n.all_fields()).unwrap_or_default(),
            _                  => vec![self],
        }
    }
}

/// `a.b[]` → `ab_array_`: `[]` becomes `_array_`, then every
/// non-word character is dropped.
pub fn machine_path(variable_path: &str) -> String {
    variable_path
        .replace("[]", "_array_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

fn type_tags(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(a))  => a.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _                      => Vec::new(),
    }
}

fn classify(types: &[String], has_enum: bool) -> Option<SchemaKind> {
    let has = |t: &str| types.iter().any(|x| x == t);
    if has("object") {
        Some(SchemaKind::Object)
    } else if has("array") {
        Some(SchemaKind::Array)
    } else if has_enum && (has("string") || has("number") || has("integer")) {
        Some(SchemaKind::Enum)
    } else if has("number") || has("integer") {
        Some(SchemaKind::Number)
    } else if has("boolean") {
        Some(SchemaKind::Boolean)
    } else if has("string") {
        Some(SchemaKind::String)
    } else if has("binary") {
        Some(SchemaKind::Binary)
    } else {
        None
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested() -> Value {
        json!({
            "type": ["object"],
            "properties": {
                "name":  {"type": ["string"], "enum": ["A", "B", "C"]},
                "inner": {
                    "type": "object",
                    "properties": {
                        "x": {"type": ["number"]},
                        "flag": {"type": ["boolean"]}
                    }
                },
                "tokens": {"type": ["array"], "items": {"type": ["string"]}},
                "score": {"type": ["number"], "metadata": {"variablePath": "stats.score"}}
            }
        })
    }

    #[test]
    fn test_all_fields_depth_first_property_order() {
        let schema = SchemaNode::from_value(&nested()).unwrap();
        let paths: Vec<&str> = schema.all_fields().iter().map(|n| n.variable_path()).collect();
        assert_eq!(paths, vec!["name", "inner.x", "inner.flag", "tokens[]", "stats.score"]);
        // Stable under re-invocation
        let again: Vec<&str> = schema.all_fields().iter().map(|n| n.variable_path()).collect();
        assert_eq!(paths, again);
    }

    #[test]
    fn test_fields_lists_only_immediate_leaves() {
        let schema = SchemaNode::from_value(&nested()).unwrap();
        assert_eq!(schema.fields(), vec!["name", "score"]);
    }

    #[test]
    fn test_kinds_are_classified() {
        let schema = SchemaNode::from_value(&nested()).unwrap();
        let kinds: Vec<SchemaKind> = schema.properties().iter().map(|(_, n)| n.kind()).collect();
        assert_eq!(kinds, vec![SchemaKind::Enum, SchemaKind::Object, SchemaKind::Array, SchemaKind::Number]);
        assert_eq!(schema.properties()[0].1.enum_values(), &["A", "B", "C"]);
    }

    #[test]
    fn test_machine_path() {
        assert_eq!(machine_path("tokens[].word"), "tokens_array_word");
        assert_eq!(machine_path("a.b-c"), "abc");
        assert_eq!(machine_path(""), "");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = SchemaNode::from_value(&json!({"type": ["mystery"]})).unwrap_err();
        assert!(matches!(err, SchemaError::UnrecognizedKind { .. }));
    }

    #[test]
    fn test_array_without_items_is_rejected() {
        let err = SchemaNode::from_value(&json!({"type": "array"})).unwrap_err();
        assert_eq!(err, SchemaError::MissingField { path: String::new(), field: "items" });
    }

    #[test]
    fn test_component_configuration_is_parsed() {
        let schema = SchemaNode::from_value(&json!({
            "type": ["array"],
            "items": {"type": ["number"]},
            "configuration": {"component": {
                "enforceSequenceLengthLimit": true,
                "maxSequenceLength": 4,
                "layers": [{"name": "lstm", "outputSize": 8}]
            }}
        }))
        .unwrap();
        assert_eq!(schema.component().sequence_cap(), Some(4));
        let layers = schema.component().layers.as_ref().unwrap();
        assert_eq!(layers[0].name, "lstm");
        assert_eq!(layers[0].params["outputSize"], json!(8));
    }
}
