use crate::{
    context::{ContextId, ContextTree},
    Value, WireValue,
};

use super::error::ReceiveError;

/// Turns a received value expression into an application value; references
/// must name an object visible from `ctx`
pub fn read_value(
    tree: &ContextTree,
    ctx: ContextId,
    value: &WireValue,
) -> Result<Value, ReceiveError> {
    Ok(match value {
        WireValue::Null => Value::Null,
        WireValue::Bool(value) => Value::Bool(*value),
        WireValue::Int(value) => Value::Int(*value),
        WireValue::Float(value) => Value::Float(*value),
        WireValue::Str(value) => Value::String(value.clone()),
        WireValue::Ref { name, .. } => match tree.lookup_name(ctx, name) {
            Some(instance) => Value::Object(instance),
            None => {
                return Err(ReceiveError::UnknownName { name: name.clone() });
            }
        },
        WireValue::List(items) => Value::List(
            items
                .iter()
                .map(|item| read_value(tree, ctx, item))
                .collect::<Result<_, _>>()?,
        ),
        WireValue::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), read_value(tree, ctx, item)?)))
                .collect::<Result<_, ReceiveError>>()?,
        ),
    })
}
