//! Idempotence Diff
//!
//! Derives the action a module has to take from the current state of the
//! remote object and the desired parameters:
//! - create / delete decision from presence vs. `state`
//! - modified attributes from a loose, case-insensitive comparison

use crate::domain::ports::CdAction;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::debug;

use crate::error::{Error, Result};

/// Attributes that differ, with their desired values, in desired-key order
pub type Modifications = IndexMap<String, Value>;

// =============================================================================
// Reconcile Helper
// =============================================================================

/// Working parameters of one module run plus the `changed` flag
#[derive(Debug, Clone, Default)]
pub struct ReconcileHelper {
    /// Set once any decision requires a change
    pub changed: bool,
    /// Declared parameters with null values dropped
    pub parameters: Map<String, Value>,
}

impl ReconcileHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the helper from typed module arguments
    pub fn from_args<T: Serialize>(args: &T) -> Result<Self> {
        let mut helper = Self::new();
        helper.set_parameters(args)?;
        Ok(helper)
    }

    /// Copy every non-null parameter into the working map
    pub fn set_parameters<T: Serialize>(&mut self, args: &T) -> Result<&Map<String, Value>> {
        let value = serde_json::to_value(args)?;
        let Value::Object(map) = value else {
            return Err(Error::Internal(
                "module arguments must serialize to an object".into(),
            ));
        };

        self.parameters = map.into_iter().filter(|(_, v)| !v.is_null()).collect();
        Ok(&self.parameters)
    }

    /// Parameter lookup on the working map
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Parameter lookup as a string slice
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Decide between create, delete, or nothing
    ///
    /// The desired state is read from `state` in `desired`, `present` when
    /// missing.
    pub fn get_cd_action(
        &mut self,
        current: Option<&Value>,
        desired: &Map<String, Value>,
    ) -> Option<CdAction> {
        let desired_state = desired
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or("present");

        let exists = current.is_some_and(|c| !c.is_null());

        if !exists && desired_state == "absent" {
            return None;
        }
        if exists && desired_state == "present" {
            return None;
        }

        self.changed = true;
        if exists {
            Some(CdAction::Delete)
        } else {
            Some(CdAction::Create)
        }
    }

    /// Collect the attributes whose current value differs from the desired one
    ///
    /// Only keys present in both maps are compared; a null desired value is
    /// ignored. Lists are compared without regard to order or case.
    pub fn get_modified_attributes(
        &mut self,
        current: Option<&Map<String, Value>>,
        desired: &Map<String, Value>,
    ) -> Modifications {
        self.modified_attributes(current, desired, false)
    }

    /// Same as [`get_modified_attributes`](Self::get_modified_attributes), but
    /// list attributes report only the desired items missing from current
    pub fn get_modified_attributes_list_diff(
        &mut self,
        current: Option<&Map<String, Value>>,
        desired: &Map<String, Value>,
    ) -> Modifications {
        self.modified_attributes(current, desired, true)
    }

    fn modified_attributes(
        &mut self,
        current: Option<&Map<String, Value>>,
        desired: &Map<String, Value>,
        get_list_diff: bool,
    ) -> Modifications {
        let mut modified = Modifications::new();
        let Some(current) = current else {
            return modified;
        };

        for (key, desired_value) in desired {
            if desired_value.is_null() {
                continue;
            }
            let Some(current_value) = current.get(key) else {
                continue;
            };

            match (current_value, desired_value) {
                (Value::Array(cur), Value::Array(des)) => {
                    if let Some(list) = compare_lists(cur, des, get_list_diff) {
                        modified.insert(key.clone(), Value::Array(list));
                    }
                }
                _ => {
                    if loose_cmp(current_value, desired_value) != Ordering::Equal {
                        modified.insert(key.clone(), desired_value.clone());
                    }
                }
            }
        }

        if !modified.is_empty() {
            debug!(attributes = ?modified.keys().collect::<Vec<_>>(), "modified attributes");
            self.changed = true;
        }
        modified
    }

    /// Merge `desired` over `current` for `keys`
    ///
    /// Returns the merged values and whether any desired value differed.
    /// Keys absent from `current` are skipped.
    pub fn compare_and_update_values(
        current: &Map<String, Value>,
        desired: &Map<String, Value>,
        keys: &[&str],
    ) -> (Map<String, Value>, bool) {
        let mut updated = Map::new();
        let mut is_changed = false;

        for key in keys {
            let Some(current_value) = current.get(*key) else {
                continue;
            };
            match desired.get(*key) {
                Some(desired_value) if !desired_value.is_null() => {
                    if current_value != desired_value {
                        updated.insert(key.to_string(), desired_value.clone());
                        is_changed = true;
                    } else {
                        updated.insert(key.to_string(), current_value.clone());
                    }
                }
                _ => {
                    updated.insert(key.to_string(), current_value.clone());
                }
            }
        }

        (updated, is_changed)
    }

    /// Names from `required` that are missing from the working parameters
    pub fn missing_parameters(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|p| !self.parameters.contains_key(**p))
            .map(|p| p.to_string())
            .collect()
    }

    /// Fail with the names of missing parameters, if any
    pub fn require_parameters(&self, required: &[&str]) -> Result<()> {
        let missing = self.missing_parameters(required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingParameters(missing))
        }
    }
}

// =============================================================================
// Comparison Rules
// =============================================================================

/// Compare two lists ignoring order and string case
///
/// Returns `None` when both hold the same items. Otherwise returns the full
/// desired list, or with `get_list_diff` only the desired items missing from
/// current.
pub fn compare_lists(current: &[Value], desired: &[Value], get_list_diff: bool) -> Option<Vec<Value>> {
    // each desired item consumes one matching current item
    let mut unmatched: Vec<&Value> = current.iter().collect();
    let mut desired_diff = Vec::new();
    for item in desired {
        match unmatched.iter().position(|x| loose_cmp(x, item) == Ordering::Equal) {
            Some(idx) => {
                unmatched.swap_remove(idx);
            }
            None => desired_diff.push(item.clone()),
        }
    }

    if desired_diff.is_empty() && unmatched.is_empty() {
        return None;
    }
    if get_list_diff {
        Some(desired_diff)
    } else {
        Some(desired.to_vec())
    }
}

/// Loose ordering used for idempotence checks
///
/// Strings compare case-insensitively, numbers by value regardless of
/// integer/float representation, lists after lower-casing and sorting their
/// items, objects key by key. A null left-hand side sorts first.
pub fn loose_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::String(x), Value::String(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            let mut x = x.clone();
            let mut y = y.clone();
            x.sort_by(loose_cmp);
            y.sort_by(loose_cmp);
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = loose_cmp(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let ord = x.len().cmp(&y.len());
            if ord != Ordering::Equal {
                return ord;
            }
            for (key, l) in x {
                match y.get(key) {
                    Some(r) => {
                        let ord = loose_cmp(l, r);
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    None => return Ordering::Greater,
                }
            }
            Ordering::Equal
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

// =============================================================================
// Key Conversion
// =============================================================================

/// Convert `snake_case` parameter names to the `camelCase` the REST APIs use
pub fn convert_module_args_to_api(params: &Map<String, Value>, exclude: &[&str]) -> Map<String, Value> {
    params
        .iter()
        .filter(|(k, _)| !exclude.contains(&k.as_str()))
        .map(|(k, v)| (to_camel_case(k), v.clone()))
        .collect()
}

/// `export_policy_ip` -> `exportPolicyIp`
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
