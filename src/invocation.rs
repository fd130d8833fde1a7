//! Module Invocation
//!
//! Loads the argument document of one module run. The document is a JSON or
//! YAML object, read from a file or from stdin, optionally wrapped the way
//! automation tools hand arguments to a module:
//!
//! ```json
//! {"ANSIBLE_MODULE_ARGS": {"name": "vol1", "state": "present"}}
//! ```

use crate::error::{Error, Result};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Key wrapping the arguments in automation tool envelopes
pub const ARGS_ENVELOPE: &str = "ANSIBLE_MODULE_ARGS";

/// Parse an argument document, JSON first, YAML otherwise
pub fn parse_document(text: &str) -> Result<Value> {
    let document: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(json_err) => {
            debug!("arguments are not JSON ({}), trying YAML", json_err);
            serde_yaml::from_str(text)?
        }
    };
    unwrap_envelope(document)
}

/// Strip the `ANSIBLE_MODULE_ARGS` envelope, if any
pub fn unwrap_envelope(document: Value) -> Result<Value> {
    let Value::Object(mut map) = document else {
        return Err(Error::InvalidParameter(
            "module arguments must be an object".into(),
        ));
    };
    match map.remove(ARGS_ENVELOPE) {
        Some(inner @ Value::Object(_)) if map.is_empty() => Ok(inner),
        Some(_) if !map.is_empty() => Err(Error::InvalidParameter(format!(
            "{} must be the only top-level key",
            ARGS_ENVELOPE
        ))),
        Some(_) => Err(Error::InvalidParameter(format!(
            "{} must be an object",
            ARGS_ENVELOPE
        ))),
        None => Ok(Value::Object(map)),
    }
}

/// Load arguments from `path`
pub fn load_file(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), bytes = text.len(), "loaded arguments");
    parse_document(&text)
}

/// Load arguments from any reader, typically stdin
pub fn load_reader<R: Read>(mut reader: R) -> Result<Value> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    parse_document(&text)
}
