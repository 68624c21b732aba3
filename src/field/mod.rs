//! Typed, observable block fields
//!
//! - `FieldSpec`: declaration (name, direction, type, default)
//! - `FieldType`: declared value type, checked on every assignment
//! - `Params`: the per-block field store with watcher registration

mod params;

pub use params::{FieldEvent, Params, Pending, WatchFn, WatcherId};

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DagError, Result};

/// Field values are JSON values; `FieldType` narrows what a field accepts.
pub type Value = serde_json::Value;

/// Prefix marking an input field when the direction is inferred.
pub const INPUT_PREFIX: &str = "in_";
/// Prefix marking an output field when the direction is inferred.
pub const OUTPUT_PREFIX: &str = "out_";

static FIELD_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("field name regex is valid")
});

/// Check a field name (identifier rules).
pub fn is_valid_field_name(name: &str) -> bool {
    FIELD_NAME.is_match(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Declared type of a field.
///
/// `Null` is accepted by every type so fields can start unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Any,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
}

impl FieldType {
    /// Whether `value` may be assigned to a field of this type.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (FieldType::Any, _) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Int, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldType::Float, Value::Number(_)) => true,
            (FieldType::Str, Value::String(_)) => true,
            (FieldType::List, Value::Array(_)) => true,
            (FieldType::Map, Value::Object(_)) => true,
            _ => false,
        }
    }

    /// Whether an output of this type may feed an input of type `dst`.
    pub fn connects_to(self, dst: FieldType) -> bool {
        self == dst || self == FieldType::Any || dst == FieldType::Any
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Any => "any",
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Str => "str",
            FieldType::List => "list",
            FieldType::Map => "map",
        };
        f.write_str(name)
    }
}

/// Declaration of one block field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: Arc<str>,
    pub direction: Direction,
    pub ty: FieldType,
    pub default: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl FieldSpec {
    pub fn input(name: &str, ty: FieldType) -> Self {
        Self::new(name, Direction::Input, ty)
    }

    pub fn output(name: &str, ty: FieldType) -> Self {
        Self::new(name, Direction::Output, ty)
    }

    /// Infer the direction from the `in_` / `out_` naming convention.
    pub fn infer(name: &str, ty: FieldType) -> Result<Self> {
        let direction = if name.starts_with(INPUT_PREFIX) {
            Direction::Input
        } else if name.starts_with(OUTPUT_PREFIX) {
            Direction::Output
        } else {
            return Err(DagError::InvalidName {
                name: name.to_string(),
            });
        };
        Ok(Self::new(name, direction, ty))
    }

    fn new(name: &str, direction: Direction, ty: FieldType) -> Self {
        Self {
            name: Arc::from(name),
            direction,
            ty,
            default: Value::Null,
            doc: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    #[inline]
    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }

    #[inline]
    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }
}
