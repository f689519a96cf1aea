//! Relocation of path-scoped errors into the data tree.
//!
//! Pipeline stages only see the data a resolver returns, not the error list
//! of the upstream response. [`move_errors_to_data`] therefore wraps the value
//! at each error's path in a [`FieldErrorValue`] sentinel, and the resolver of
//! that position later turns the sentinel back into a field error.

use serde_json::{Map, Value, json};

use crate::error::FieldError;
use crate::response::{ExecutionResult, GraphQLError, PathSegment};

const SENTINEL_KEY: &str = "__fieldErrorValue";

/// The original value of a position plus the errors reported for it.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldErrorValue {
    pub value: Value,
    pub errors: Vec<GraphQLError>,
}

impl FieldErrorValue {
    pub fn new(value: Value, errors: Vec<GraphQLError>) -> Self {
        FieldErrorValue { value, errors }
    }

    pub fn is_sentinel(value: &Value) -> bool {
        matches!(value, Value::Object(map) if map.len() == 1 && map.contains_key(SENTINEL_KEY))
    }

    pub fn to_value(&self) -> Value {
        let errors = serde_json::to_value(&self.errors).unwrap_or_else(|_| Value::Array(Vec::new()));
        json!({ SENTINEL_KEY: { "value": self.value, "errors": errors } })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        if !Self::is_sentinel(value) {
            return None;
        }
        let inner = &value[SENTINEL_KEY];
        Some(FieldErrorValue {
            value: inner["value"].clone(),
            errors: serde_json::from_value(inner["errors"].clone()).ok()?,
        })
    }

    /// The consolidated error thrown when the position is resolved.
    pub fn to_field_error(&self) -> FieldError {
        FieldError::from_graphql_errors(&self.errors)
    }
}

/// Returns the value unchanged, or the sentinel's error if it is one.
pub fn unwrap_field_error_value(value: Value) -> Result<Value, FieldError> {
    match FieldErrorValue::from_value(&value) {
        Some(sentinel) => Err(sentinel.to_field_error()),
        None => Ok(value),
    }
}

/// Moves every error that carries a path into the data tree. Errors without
/// a path stay in the error list.
pub fn move_errors_to_data(result: ExecutionResult) -> ExecutionResult {
    let ExecutionResult {
        data,
        errors,
        extensions,
    } = result;
    let (scoped, unscoped): (Vec<_>, Vec<_>) = errors
        .into_iter()
        .partition(|error| error.path.as_ref().is_some_and(|path| !path.is_empty()));
    if scoped.is_empty() {
        return ExecutionResult {
            data,
            errors: unscoped,
            extensions,
        };
    }

    let mut data = data.unwrap_or_else(|| Value::Object(Map::new()));
    for error in scoped {
        let path = error.path.clone().unwrap_or_default();
        let Some((last, parents)) = path.split_last() else {
            continue;
        };
        let mut node = &mut data;
        for segment in parents {
            node = child_mut(node, segment);
        }
        let slot = child_mut(node, last);
        let existing = std::mem::take(slot);
        *slot = match FieldErrorValue::from_value(&existing) {
            Some(mut sentinel) => {
                sentinel.errors.push(error);
                sentinel.to_value()
            }
            None => FieldErrorValue::new(existing, vec![error]).to_value(),
        };
    }

    ExecutionResult {
        data: Some(data),
        errors: unscoped,
        extensions,
    }
}

/// The child at `segment`, creating the container it lives in if needed.
/// Descends through sentinels into the value they wrap.
fn child_mut<'v>(node: &'v mut Value, segment: &PathSegment) -> &'v mut Value {
    let node = if FieldErrorValue::is_sentinel(node) {
        &mut node[SENTINEL_KEY]["value"]
    } else {
        node
    };
    match segment {
        PathSegment::Key(key) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            &mut node[key.as_str()]
        }
        PathSegment::Index(index) => {
            let index = *index;
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Some(items) = node.as_array_mut() {
                if items.len() <= index {
                    items.resize(index + 1, Value::Null);
                }
            }
            &mut node[index]
        }
    }
}
