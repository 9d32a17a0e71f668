// Copyright 2026 The Skitter Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Uniform dynamic value flowing through ports and held as worker state.
//!
//! Records, worker state, strategy configuration and deployment data all use
//! the same representation, so anything a strategy produces can travel across
//! node boundaries without a schema. `Record` fields live in a `BTreeMap`,
//! which keeps the binary encoding deterministic.

use serde_derive::{Deserialize, Serialize};

use std::{collections::BTreeMap, fmt};

/// A single Skitter value: a record flowing along a port, a piece of worker
/// state, or configuration handed to a callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// The absent value.
    Nil,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating-point number.
    Float(f64),
    /// A piece of text.
    Text(String),
    /// An ordered sequence of values.
    List(Vec<Value>),
    /// A record with named fields.
    Record(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a record value from `(name, value)` pairs.
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    /// Returns `true` for `Value::Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns the wrapped integer, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as a float; integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns the wrapped boolean, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the wrapped text, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the wrapped list, if any.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }

    /// Looks up a field of a record value.
    ///
    /// Returns `None` if the value is not a record or the field is absent.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Replaces an *existing* field of a record value.
    ///
    /// Returns `false` if the value is not a record or the field does not
    /// exist; a field update never creates new fields.
    pub fn set_field(&mut self, name: &str, value: Value) -> bool {
        match self {
            Value::Record(fields) => match fields.get_mut(name) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::List(values)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => formatter.write_str("nil"),
            Value::Bool(value) => write!(formatter, "{}", value),
            Value::Int(value) => write!(formatter, "{}", value),
            Value::Float(value) => write!(formatter, "{}", value),
            Value::Text(value) => write!(formatter, "{:?}", value),
            Value::List(values) => {
                formatter.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        formatter.write_str(", ")?;
                    }
                    write!(formatter, "{}", value)?;
                }
                formatter.write_str("]")
            }
            Value::Record(fields) => {
                formatter.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        formatter.write_str(", ")?;
                    }
                    write!(formatter, "{}: {}", name, value)?;
                }
                formatter.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn field_access() {
        let value = Value::record(vec![("total", Value::Int(60)), ("count", Value::Int(3))]);
        assert_eq!(value.field("total"), Some(&Value::Int(60)));
        assert_eq!(value.field("missing"), None);
        assert_eq!(Value::Int(1).field("total"), None);
    }

    #[test]
    fn field_update_requires_existing_field() {
        let mut value = Value::record(vec![("count", Value::Int(0))]);
        assert!(value.set_field("count", Value::Int(1)));
        assert_eq!(value.field("count"), Some(&Value::Int(1)));
        assert!(!value.set_field("missing", Value::Int(1)));
        assert!(!Value::Nil.set_field("count", Value::Int(1)));
    }

    #[test]
    fn numeric_widening() {
        assert_eq!(Value::Int(2).as_float(), Some(2.0));
        assert_eq!(Value::Float(2.5).as_float(), Some(2.5));
        assert_eq!(Value::Text("2".into()).as_float(), None);
    }

    #[test]
    fn display() {
        let value = Value::record(vec![
            ("label", Value::from("L")),
            ("values", Value::List(vec![Value::Int(1), Value::Nil])),
        ]);
        assert_eq!(value.to_string(), r#"{label: "L", values: [1, nil]}"#);
    }
}
