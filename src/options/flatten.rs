//! Option flattening and layering
//!
//! Implements the layered merge used for job options:
//! - Mappings: flattened into dotted keys (depth-first)
//! - Scalars and lists: override (last wins), per dotted key
//!
//! Unlike a deep merge, layering happens after flattening, so a later layer
//! that sets `proxy.user` leaves an earlier `proxy.keytab.location` intact and
//! a later scalar at `proxy` does not erase the earlier `proxy.*` keys.

use serde_json::{Map, Value};

use super::{Options, OptionsError};

/// Separator placed between the segments of a flattened key.
pub const KEY_SEPARATOR: char = '.';

/// Flatten one (possibly nested) option mapping into dotted keys.
pub fn flatten(layer: &Value) -> Result<Options, OptionsError> {
    let map = layer.as_object().ok_or(OptionsError::NotAMapping {
        found: kind_of(layer),
    })?;
    let mut out = Options::new();
    flatten_into(map, None, &mut out)?;
    Ok(out)
}

fn flatten_into(
    map: &Map<String, Value>,
    prefix: Option<&str>,
    out: &mut Options,
) -> Result<(), OptionsError> {
    for (key, value) in map {
        validate_key(key)?;
        let full_key = match prefix {
            Some(prefix) => format!("{}{}{}", prefix, KEY_SEPARATOR, key),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) => flatten_into(nested, Some(&full_key), out)?,
            Value::Array(items) => {
                if let Some(bad) = items.iter().find(|item| !is_scalar(item)) {
                    return Err(OptionsError::Type {
                        key: full_key,
                        found: kind_of(bad),
                    });
                }
                out.insert(full_key, value.clone());
            }
            Value::Null => {
                return Err(OptionsError::Type {
                    key: full_key,
                    found: "null",
                })
            }
            _ => {
                out.insert(full_key, value.clone());
            }
        }
    }
    Ok(())
}

/// Keys end up on the left of a `key=value` line.
fn validate_key(key: &str) -> Result<(), OptionsError> {
    let reason = if key.is_empty() {
        "key is empty"
    } else if key.contains(['=', ':']) {
        "key contains a '=' or ':' separator"
    } else if key.chars().any(char::is_control) {
        "key contains a line break or control character"
    } else {
        return Ok(());
    };
    Err(OptionsError::InvalidKey {
        key: key.to_string(),
        reason,
    })
}

/// Merge layers in order (first is base, last has highest precedence).
pub fn merge_layers(layers: &[Value]) -> Result<Options, OptionsError> {
    let flat = layers.iter().map(flatten).collect::<Result<Vec<_>, _>>()?;
    Ok(merge_flat(&flat))
}

/// Merge already flattened layers, later keys overriding earlier ones.
pub fn merge_flat(layers: &[Options]) -> Options {
    let mut merged = Options::new();
    for layer in layers {
        merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Every definition of `key` across `layers`, earliest first.
pub fn option_history(layers: &[Value], key: &str) -> Result<Vec<Value>, OptionsError> {
    let mut history = Vec::new();
    for layer in layers {
        if let Some(value) = flatten(layer)?.remove(key) {
            history.push(value);
        }
    }
    Ok(history)
}

/// Turn flat options back into a single-level mapping so they can be
/// layered again.
pub fn options_to_value(options: &Options) -> Value {
    Value::Object(
        options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
