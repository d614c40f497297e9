use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use panel_framework::PanelError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOption {
    pub label: String,
    pub value: Value,
}

/// A named predicate over a resource listing, as served by the filters endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDefinition {
    /// Unique key of the filter; also the attribute it constrains.
    pub class: String,
    pub name: String,
    #[serde(default = "default_component")]
    pub component: String,
    #[serde(default)]
    pub options: Vec<FilterOption>,
    #[serde(default)]
    pub current_value: Value,
}

fn default_component() -> String {
    "select-filter".to_string()
}

impl FilterDefinition {
    pub fn select(class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            component: default_component(),
            options: Vec::new(),
            current_value: Value::String(String::new()),
        }
    }

    pub fn option(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.push(FilterOption {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    /// The value the filter starts with (and returns to on reset).
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.current_value = value.into();
        self
    }

    pub fn is_active(&self) -> bool {
        is_active_value(&self.current_value)
    }
}

/// A value constrains the listing unless it is null, empty, or an object of
/// nothing but `false` flags.
pub fn is_active_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(flags) => flags.values().any(|flag| flag != &Value::Bool(false)),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Encodes every filter's current value. No filters encode as the empty string.
pub fn encode_filters(filters: &[FilterDefinition]) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let values: Vec<Value> = filters
        .iter()
        .map(|filter| json!({ "class": filter.class, "value": filter.current_value }))
        .collect();
    STANDARD.encode(Value::Array(values).to_string())
}

/// Decodes an encoded filter string into `(class, value)` pairs.
pub fn decode_filters(encoded: &str) -> Result<Vec<(String, Value)>, PanelError> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    let invalid = |reason: String| PanelError::ValidationFailure(format!("malformed filter string: {reason}"));

    let bytes = STANDARD.decode(encoded).map_err(|e| invalid(e.to_string()))?;
    let entries: Vec<Value> = serde_json::from_slice(&bytes).map_err(|e| invalid(e.to_string()))?;
    entries
        .into_iter()
        .map(|entry| match entry {
            Value::Object(mut entry) => {
                let class = entry
                    .get("class")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| invalid("entry without a class".into()))?;
                let value = entry.remove("value").unwrap_or(Value::Null);
                Ok((class, value))
            }
            other => Err(invalid(format!("unexpected entry {other}"))),
        })
        .collect()
}
