use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::InstanceId;

/// A property value as the application sees it.
///
/// `Object` refers to another live instance by identity; the batch writer turns
/// it into a [`WireValue::Ref`] once the referenced object has a name.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Object(InstanceId),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type label used in method parameter signatures
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Every instance reachable from this value, in visiting order
    pub fn referenced_instances(&self) -> Vec<InstanceId> {
        let mut output = Vec::new();
        self.collect_instances(&mut output);
        output
    }

    fn collect_instances(&self, output: &mut Vec<InstanceId>) {
        match self {
            Value::Object(instance) => output.push(*instance),
            Value::List(items) => {
                for item in items {
                    item.collect_instances(output);
                }
            }
            Value::Map(entries) => {
                for item in entries.values() {
                    item.collect_instances(output);
                }
            }
            _ => {}
        }
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
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<InstanceId> for Value {
    fn from(value: InstanceId) -> Self {
        Value::Object(value)
    }
}

/// A value expression as it travels in a [`SyncBatch`](crate::SyncBatch).
///
/// Literal strings and references to named objects are distinct variants, so
/// a string that happens to look like an object name is never mistaken for one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ref {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
    },
    List(Vec<WireValue>),
    Map(BTreeMap<String, WireValue>),
}

impl WireValue {
    /// Names of all objects this expression refers to
    pub fn referenced_names(&self) -> Vec<&str> {
        let mut output = Vec::new();
        self.collect_names(&mut output);
        output
    }

    fn collect_names<'a>(&'a self, output: &mut Vec<&'a str>) {
        match self {
            WireValue::Ref { name, .. } => output.push(name.as_str()),
            WireValue::List(items) => {
                for item in items {
                    item.collect_names(output);
                }
            }
            WireValue::Map(entries) => {
                for item in entries.values() {
                    item.collect_names(output);
                }
            }
            _ => {}
        }
    }
}
