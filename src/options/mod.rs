//! Job option layering
//!
//! Jobs are described by one or more option mappings, possibly nested. This
//! module flattens them into dotted keys, layers them (later wins, per key)
//! and renders the result into the `key=value` text format read by the
//! server for `.job` and `.properties` files.

mod flatten;

use std::collections::BTreeMap;

use serde_json::Value;

pub use flatten::{
    flatten, merge_flat, merge_layers, option_history, options_to_value, KEY_SEPARATOR,
};

/// Flat options, ordered lexicographically by key.
pub type Options = BTreeMap<String, Value>;

/// Default separator used to join list values.
pub const DEFAULT_LIST_SEPARATOR: &str = ",";

/// Errors raised while flattening or rendering options
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("option '{key}' has unsupported {found} value (expected a scalar, list or mapping)")]
    Type { key: String, found: &'static str },

    #[error("option layer must be a mapping, got a {found}")]
    NotAMapping { found: &'static str },

    #[error("invalid option key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },
}

/// Layers option mappings and renders them to text.
#[derive(Debug, Clone)]
pub struct OptionMerger {
    separator: String,
}

impl Default for OptionMerger {
    fn default() -> Self {
        Self {
            separator: DEFAULT_LIST_SEPARATOR.to_string(),
        }
    }
}

impl OptionMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the separator used to join list values
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Flatten and merge `layers`, later layers overriding earlier ones.
    pub fn merge(&self, layers: &[Value]) -> Result<Options, OptionsError> {
        merge_layers(layers)
    }

    /// Render one value to its textual form.
    pub fn render(&self, key: &str, value: &Value) -> Result<String, OptionsError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Array(items) => {
                let rendered = items
                    .iter()
                    .map(|item| match item {
                        Value::Array(_) | Value::Object(_) | Value::Null => {
                            Err(OptionsError::Type {
                                key: key.to_string(),
                                found: flatten::kind_of(item),
                            })
                        }
                        scalar => self.render(key, scalar),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rendered.join(&self.separator))
            }
            other => Err(OptionsError::Type {
                key: key.to_string(),
                found: flatten::kind_of(other),
            }),
        }
    }

    /// Render options as `key=value` lines, sorted by key.
    ///
    /// Backslashes and line breaks inside values are escaped, so each option
    /// stays on one line and reads back unchanged.
    pub fn to_text(&self, options: &Options) -> Result<String, OptionsError> {
        let mut out = String::new();
        for (key, value) in options {
            let rendered = self.render(key, value)?;
            out.push_str(key);
            out.push('=');
            out.push_str(&escape_value(&rendered));
            out.push('\n');
        }
        Ok(out)
    }
}

fn escape_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}
