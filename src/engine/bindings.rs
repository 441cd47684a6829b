//! External variable and top-level argument bindings
//!
//! Bindings arrive as JSON objects (`--ext-code '{"env": "prod"}'`, DAP
//! `launch.extCode`) and are handed to the evaluator as Jsonnet code, i.e.
//! the JSON text of each value.

use serde_json::{Map, Value};

use crate::common::{Error, Result};

/// Name → JSON value
pub type Bindings = Map<String, Value>;

/// Parse a JSON object and merge its entries into `into`
///
/// Later keys replace earlier ones, so repeated flags accumulate.
pub fn merge_code(into: &mut Bindings, unparsed: &str) -> Result<()> {
    let value: Value = serde_json::from_str(unparsed)
        .map_err(|e| Error::InvalidBindings(format!("expected a JSON object: {}", e)))?;
    merge_value(into, value)
}

/// Merge an already-parsed JSON object into `into`
pub fn merge_value(into: &mut Bindings, value: Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            into.extend(map);
            Ok(())
        }
        other => Err(Error::InvalidBindings(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

/// Convert string-only external variables (`extVars`) into bindings
pub fn ext_vars(value: &Value) -> Result<Bindings> {
    let vars = value.as_object().ok_or_else(|| {
        Error::InvalidBindings(format!(
            "unsupported value for extVars: expected a JSON object, got {}",
            json_type(value)
        ))
    })?;

    let mut bindings = Bindings::new();
    for (key, var) in vars {
        match var {
            Value::String(_) => {
                bindings.insert(key.clone(), var.clone());
            }
            other => {
                return Err(Error::InvalidBindings(format!(
                    "unsupported value for extVars.{}: expected a string, got {}",
                    key,
                    json_type(other)
                )))
            }
        }
    }
    Ok(bindings)
}

/// Jsonnet code for a bound value
pub fn to_code(value: &Value) -> String {
    value.to_string()
}

/// Jsonnet type name of a JSON value
pub fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_accumulates_and_overrides() {
        let mut bindings = Bindings::new();
        merge_code(&mut bindings, r#"{"env": "dev", "replicas": 1}"#).unwrap();
        merge_code(&mut bindings, r#"{"env": "prod"}"#).unwrap();

        assert_eq!(bindings.get("env"), Some(&json!("prod")));
        assert_eq!(bindings.get("replicas"), Some(&json!(1)));
    }

    #[test]
    fn test_merge_rejects_non_objects() {
        let mut bindings = Bindings::new();
        assert!(matches!(
            merge_code(&mut bindings, "[1, 2]"),
            Err(Error::InvalidBindings(_))
        ));
        assert!(matches!(
            merge_code(&mut bindings, "{not json"),
            Err(Error::InvalidBindings(_))
        ));
    }

    #[test]
    fn test_ext_vars_must_be_strings() {
        let ok = ext_vars(&json!({"cluster": "eu-1"})).unwrap();
        assert_eq!(ok.get("cluster"), Some(&json!("eu-1")));

        let err = ext_vars(&json!({"replicas": 3})).unwrap_err();
        assert!(err.to_string().contains("extVars.replicas"));
    }

    #[test]
    fn test_values_become_code() {
        assert_eq!(to_code(&json!("prod")), "\"prod\"");
        assert_eq!(to_code(&json!({"a": [1, true]})), r#"{"a":[1,true]}"#);
    }
}
