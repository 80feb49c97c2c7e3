//! Output formatting

use serde_json::{Map, Value};

/// Output builder for formatted CLI output
pub struct Output {
    json_mode: bool,
    fields: Map<String, Value>,
    lines: Vec<String>,
}

impl Output {
    /// Create a new output builder
    pub fn new(json_mode: bool) -> Self {
        Self {
            json_mode,
            fields: Map::new(),
            lines: Vec::new(),
        }
    }

    /// Add a string field
    pub fn field(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), Value::String(value.to_string()));
        self.lines.push(format!("{}: {}", key, value));
        self
    }

    /// Add a u64 field
    pub fn field_u64(mut self, key: &str, value: u64) -> Self {
        self.fields.insert(key.to_string(), Value::Number(value.into()));
        self.lines.push(format!("{}: {}", key, value));
        self
    }

    /// Add a JSON value; strings print bare in text mode
    pub fn field_value(mut self, key: &str, value: Value) -> Self {
        match &value {
            Value::String(text) => self.lines.push(format!("{}: {}", key, text)),
            other => self.lines.push(format!("{}: {}", key, other)),
        }
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Add an optional string field, `null` in JSON when absent
    pub fn field_opt(mut self, key: &str, value: Option<String>) -> Self {
        if let Some(value) = &value {
            self.lines.push(format!("{}: {}", key, value));
        }
        self.fields
            .insert(key.to_string(), value.map_or(Value::Null, Value::String));
        self
    }

    /// Render without printing
    pub fn render(&self) -> String {
        if self.json_mode {
            serde_json::to_string_pretty(&Value::Object(self.fields.clone())).unwrap_or_default()
        } else {
            self.lines.join("\n")
        }
    }

    /// Print the output
    pub fn print(self) {
        println!("{}", self.render());
    }
}
