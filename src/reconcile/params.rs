//! Parameter Parsing
//!
//! Module arguments are typed structs. Their JSON Schema (derived with
//! `schemars`) doubles as the argument contract: it lists the accepted names and
//! the required ones, so unknown and missing parameters are reported before
//! serde ever sees the document.

use crate::error::{Error, Result};
use schemars::schema::{RootSchema, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Typed arguments of one module
pub trait ModuleArgs: DeserializeOwned + Serialize + JsonSchema {
    /// Cross-field checks (`required_if`, `required_one_of`, ...)
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// JSON Schema of a module's arguments
pub fn schema_of<T: JsonSchema>() -> RootSchema {
    schemars::schema_for!(T)
}

/// Parse and validate the argument document of `module`
pub fn parse_args<T: ModuleArgs>(module: &str, args: Value) -> Result<T> {
    let Value::Object(map) = args else {
        return Err(Error::InvalidParameter(format!(
            "arguments for {} must be an object",
            module
        )));
    };

    // null means "not set"
    let map: Map<String, Value> = map.into_iter().filter(|(_, v)| !v.is_null()).collect();

    let schema = schema_of::<T>();
    let (allowed, required) = declared_names(&schema.schema);

    let unsupported: Vec<String> = map
        .keys()
        .filter(|k| !allowed.contains(*k))
        .cloned()
        .collect();
    if !unsupported.is_empty() {
        return Err(Error::UnsupportedParameters {
            module: module.to_string(),
            names: unsupported,
        });
    }

    let missing: Vec<String> = required
        .into_iter()
        .filter(|r| !map.contains_key(r))
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingParameters(missing));
    }

    let parsed: T = serde_json::from_value(Value::Object(map))
        .map_err(|e| Error::InvalidParameter(format!("{}: {}", module, e)))?;
    parsed.validate()?;
    Ok(parsed)
}

/// Collect property names and required names, following `allOf` branches
/// that flattened structs produce
fn declared_names(schema: &SchemaObject) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut allowed = BTreeSet::new();
    let mut required = BTreeSet::new();

    if let Some(object) = &schema.object {
        allowed.extend(object.properties.keys().cloned());
        required.extend(object.required.iter().cloned());
    }
    if let Some(subschemas) = &schema.subschemas {
        for sub in subschemas.all_of.iter().flatten() {
            if let Schema::Object(obj) = sub {
                let (a, r) = declared_names(obj);
                allowed.extend(a);
                required.extend(r);
            }
        }
    }

    (allowed, required)
}

/// Fail unless `condition` holds
pub fn ensure(condition: bool, msg: impl Into<String>) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::InvalidParameter(msg.into()))
    }
}

/// `required_if`: when `active`, every `(name, value)` pair must be set
pub fn required_if(active: bool, state_desc: &str, fields: &[(&str, bool)]) -> Result<()> {
    if !active {
        return Ok(());
    }
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "{} but all of the following are missing: {}",
            state_desc,
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::State;
    use assert_matches::assert_matches;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Connection {
        api_url: String,
        #[serde(default = "default_true")]
        validate_certs: bool,
    }

    fn default_true() -> bool {
        true
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Args {
        #[serde(flatten)]
        connection: Connection,
        name: String,
        #[serde(default)]
        state: State,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    }

    impl ModuleArgs for Args {
        fn validate(&self) -> Result<()> {
            ensure(self.size != Some(0), "size must be positive")
        }
    }

    #[test]
    fn test_parse_defaults_and_flatten() {
        let args: Args = parse_args("test", json!({"api_url": "h", "name": "n", "size": null})).unwrap();
        assert_eq!(args.state, State::Present);
        assert!(args.connection.validate_certs);
        assert!(args.size.is_none());
    }

    #[test]
    fn test_parse_unknown_parameter() {
        let err = parse_args::<Args>("test", json!({"api_url": "h", "name": "n", "bogus": 1}))
            .unwrap_err();
        assert_matches!(err, Error::UnsupportedParameters { ref names, .. } if names == &vec!["bogus".to_string()]);
    }

    #[test]
    fn test_parse_missing_required() {
        let err = parse_args::<Args>("test", json!({"name": "n"})).unwrap_err();
        assert_matches!(err, Error::MissingParameters(ref m) if m == &vec!["api_url".to_string()]);
    }

    #[test]
    fn test_parse_invalid_choice() {
        let err = parse_args::<Args>("test", json!({"api_url": "h", "name": "n", "state": "gone"}))
            .unwrap_err();
        assert_matches!(err, Error::InvalidParameter(_));
    }

    #[test]
    fn test_parse_runs_validation() {
        let err = parse_args::<Args>("test", json!({"api_url": "h", "name": "n", "size": 0}))
            .unwrap_err();
        assert_eq!(err.to_string(), "size must be positive");
    }

    #[test]
    fn test_required_if() {
        assert!(required_if(false, "state is present", &[("location", false)]).is_ok());
        let err = required_if(true, "state is present", &[("location", false), ("size", true)])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "state is present but all of the following are missing: location"
        );
    }
}
