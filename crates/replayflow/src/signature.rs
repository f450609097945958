//! Declared method signatures and argument binding.
//!
//! Operations, workflow entry methods, and signal handlers all declare their
//! parameters up front. Arguments arrive as JSON values (from workflow code,
//! from persisted requests, or from API callers) and are checked against the
//! declaration before any user code runs.
//!
//! # Nullability
//!
//! A parameter is either *required* (a primitive slot, null rejected) or
//! *nullable* (a boxed slot, null accepted). Integer arguments are accepted
//! by [`ParamType::Number`] slots; a float with no fractional part is
//! accepted by [`ParamType::Integer`] slots.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The JSON shape a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,
    /// Any JSON value. Still subject to the nullability check.
    Any,
}

impl ParamType {
    /// Returns `true` if a non-null value is compatible with this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ParamType::Any, _) => true,
            (ParamType::Bool, Value::Bool(_)) => true,
            (ParamType::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            (ParamType::Number, Value::Number(_)) => true,
            (ParamType::String, Value::String(_)) => true,
            (ParamType::Array, Value::Array(_)) => true,
            (ParamType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Bool => "bool",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::String => "string",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        };
        f.write_str(name)
    }
}

/// A declared parameter slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: &'static str,
    pub ty: ParamType,
    pub nullable: bool,
}

impl Parameter {
    /// A parameter that rejects null.
    pub const fn required(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
        }
    }

    /// A parameter that accepts null.
    pub const fn nullable(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
        }
    }
}

/// Argument validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("expected {expected} arguments, got {actual}")]
    Count { expected: usize, actual: usize },

    #[error("argument {index} ({name}) must not be null")]
    NullNotAllowed { index: usize, name: &'static str },

    #[error("argument {index} ({name}) expected {expected}, got {found}")]
    TypeMismatch {
        index: usize,
        name: &'static str,
        expected: ParamType,
        found: &'static str,
    },
}

/// Validate `values` against `parameters` and wrap them as [`Arguments`].
pub fn bind(parameters: &[Parameter], values: Vec<Value>) -> Result<Arguments, ArgumentError> {
    if parameters.len() != values.len() {
        return Err(ArgumentError::Count {
            expected: parameters.len(),
            actual: values.len(),
        });
    }

    for (index, (param, value)) in parameters.iter().zip(&values).enumerate() {
        if value.is_null() {
            if !param.nullable {
                return Err(ArgumentError::NullNotAllowed {
                    index,
                    name: param.name,
                });
            }
            continue;
        }
        if !param.ty.accepts(value) {
            return Err(ArgumentError::TypeMismatch {
                index,
                name: param.name,
                expected: param.ty,
                found: json_kind(value),
            });
        }
    }

    Ok(Arguments(values))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validated, ordered argument values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(Vec<Value>);

impl Arguments {
    /// Wrap values without validation.
    ///
    /// Used when the values come from a record that was validated when it
    /// was first written.
    pub fn unchecked(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Borrow the raw value at `index`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Decode the value at `index`. A missing slot decodes as null.
    pub fn decode<T: DeserializeOwned>(&self, index: usize) -> Result<T, serde_json::Error> {
        let value = self.0.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}
