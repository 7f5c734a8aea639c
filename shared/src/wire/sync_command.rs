use serde::{Deserialize, Serialize};

use crate::{mode::SyncMode, WireValue};

/// Result of a remote call as it travels back to the caller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WireOutcome {
    Value(WireValue),
    Exception(String),
}

impl WireOutcome {
    pub fn is_exception(&self) -> bool {
        matches!(self, WireOutcome::Exception(_))
    }
}

/// One step of a batch.
///
/// `EnterObject` and `ExitObject` move through object paths; the other
/// commands act on the innermost open object, or on the batch as a whole for
/// results, renames and reset-state notices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncCommand {
    /// Closes every open object and switches the package names are read in
    SetPackage { name: String },
    /// Opens one path segment. With `type_name` set the segment defines a new
    /// instance of that type.
    EnterObject {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Vec<WireValue>>,
    },
    ExitObject,
    SetProperty { name: String, value: WireValue },
    MethodCall {
        method: String,
        param_signature: String,
        call_id: u32,
        args: Vec<WireValue>,
    },
    MethodResult {
        outcome: WireOutcome,
        call_id: u32,
        return_type: String,
    },
    FetchRequest { property: String },
    SetMode { mode: SyncMode },
    Rename {
        old_name: String,
        new_name: String,
        #[serde(default)]
        ack: bool,
    },
    ClearResetState { name: String },
}

impl SyncCommand {
    pub fn enter(name: &str) -> Self {
        SyncCommand::EnterObject {
            name: name.to_string(),
            type_name: None,
            args: None,
        }
    }

    pub fn define(name: &str, type_name: &str, args: Vec<WireValue>) -> Self {
        SyncCommand::EnterObject {
            name: name.to_string(),
            type_name: Some(type_name.to_string()),
            args: Some(args),
        }
    }

    pub fn set_property(name: &str, value: WireValue) -> Self {
        SyncCommand::SetProperty {
            name: name.to_string(),
            value,
        }
    }

    /// Whether this command defines a new instance
    pub fn is_definition(&self) -> bool {
        matches!(
            self,
            SyncCommand::EnterObject {
                type_name: Some(_),
                ..
            }
        )
    }

    /// Names this command refers to without defining them
    pub fn referenced_names(&self) -> Vec<&str> {
        match self {
            SyncCommand::EnterObject {
                args: Some(args), ..
            }
            | SyncCommand::MethodCall { args, .. } => args
                .iter()
                .flat_map(|arg| arg.referenced_names())
                .collect(),
            SyncCommand::SetProperty { value, .. }
            | SyncCommand::MethodResult {
                outcome: WireOutcome::Value(value),
                ..
            } => value.referenced_names(),
            _ => Vec::new(),
        }
    }
}
