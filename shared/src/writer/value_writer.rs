use std::collections::HashMap;

use crate::{
    context::{ContextId, ContextTree},
    InstanceId, Value, WireValue,
};

/// Renders application values for the peer of one endpoint context
pub struct ValueWriter<'a> {
    tree: &'a ContextTree,
    ctx: ContextId,
    aliases: &'a HashMap<InstanceId, String>,
}

impl<'a> ValueWriter<'a> {
    pub fn new(
        tree: &'a ContextTree,
        ctx: ContextId,
        aliases: &'a HashMap<InstanceId, String>,
    ) -> Self {
        Self { tree, ctx, aliases }
    }

    /// Name the peer currently knows `instance` by
    pub fn name_of(&self, instance: &InstanceId) -> Option<String> {
        if let Some(alias) = self.aliases.get(instance) {
            return Some(alias.clone());
        }
        self.tree.name_of(self.ctx, instance)
    }

    /// References without a name on this side become null
    pub fn write(&self, value: &Value) -> WireValue {
        match value {
            Value::Null => WireValue::Null,
            Value::Bool(value) => WireValue::Bool(*value),
            Value::Int(value) => WireValue::Int(*value),
            Value::Float(value) => WireValue::Float(*value),
            Value::String(value) => WireValue::Str(value.clone()),
            Value::Object(instance) => match self.name_of(instance) {
                Some(name) => WireValue::Ref {
                    name,
                    type_name: self
                        .tree
                        .record_in_chain(self.ctx, instance)
                        .map(|record| record.type_name().to_string()),
                },
                None => WireValue::Null,
            },
            Value::List(items) => {
                WireValue::List(items.iter().map(|item| self.write(item)).collect())
            }
            Value::Map(entries) => WireValue::Map(
                entries
                    .iter()
                    .map(|(key, item)| (key.clone(), self.write(item)))
                    .collect(),
            ),
        }
    }

    pub fn write_all(&self, values: &[Value]) -> Vec<WireValue> {
        values.iter().map(|value| self.write(value)).collect()
    }

    /// Comma-separated type labels of a call's arguments
    pub fn param_signature(values: &[Value]) -> String {
        values
            .iter()
            .map(|value| value.type_label())
            .collect::<Vec<_>>()
            .join(",")
    }
}
