use crate::{types::CallId, InstanceId, Value};

/// Receiver of a remote method invocation
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MethodTarget {
    Instance(InstanceId),
    /// Static call on a registered type
    Type(String),
}

/// What a remote method produced
#[derive(Clone, Debug, PartialEq)]
pub enum MethodOutcome {
    Value(Value),
    Exception(String),
}

impl MethodOutcome {
    pub fn is_exception(&self) -> bool {
        matches!(self, MethodOutcome::Exception(_))
    }
}

/// One discrete entry of a [`ChangeLog`](super::ChangeLog)
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeRecord {
    PropertyChange {
        instance: InstanceId,
        property: String,
        value: Value,
        /// Recorded while forwarding a peer's change to other holders
        remote_origin: bool,
    },
    NewInstance {
        instance: InstanceId,
        type_name: String,
        args: Vec<Value>,
        remote_origin: bool,
    },
    MethodCall {
        target: MethodTarget,
        method: String,
        args: Vec<Value>,
        call_id: CallId,
    },
    MethodResult {
        call_id: CallId,
        outcome: MethodOutcome,
        return_type: String,
    },
    FetchRequest {
        instance: InstanceId,
        property: String,
    },
    Rename {
        instance: InstanceId,
        old_name: String,
        new_name: String,
        is_ack: bool,
    },
    ClearResetState {
        instance: InstanceId,
    },
}

/// Discriminant under which records for one object override each other
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKey {
    Property(String),
    NewInstance,
    Fetch(String),
    Rename,
    ClearResetState,
}

impl ChangeRecord {
    /// Object the record is addressed to; `None` for type-level calls and results
    pub fn instance(&self) -> Option<InstanceId> {
        match self {
            ChangeRecord::PropertyChange { instance, .. }
            | ChangeRecord::NewInstance { instance, .. }
            | ChangeRecord::FetchRequest { instance, .. }
            | ChangeRecord::Rename { instance, .. }
            | ChangeRecord::ClearResetState { instance } => Some(*instance),
            ChangeRecord::MethodCall {
                target: MethodTarget::Instance(instance),
                ..
            } => Some(*instance),
            ChangeRecord::MethodCall { .. } | ChangeRecord::MethodResult { .. } => None,
        }
    }

    /// Override identity. Method calls and results are never coalesced.
    pub fn key(&self) -> Option<(InstanceId, ChangeKey)> {
        match self {
            ChangeRecord::PropertyChange {
                instance, property, ..
            } => Some((*instance, ChangeKey::Property(property.clone()))),
            ChangeRecord::NewInstance { instance, .. } => Some((*instance, ChangeKey::NewInstance)),
            ChangeRecord::FetchRequest { instance, property } => {
                Some((*instance, ChangeKey::Fetch(property.clone())))
            }
            ChangeRecord::Rename { instance, .. } => Some((*instance, ChangeKey::Rename)),
            ChangeRecord::ClearResetState { instance } => {
                Some((*instance, ChangeKey::ClearResetState))
            }
            ChangeRecord::MethodCall { .. } | ChangeRecord::MethodResult { .. } => None,
        }
    }

    /// Instances the record's payload refers to, excluding its own subject
    pub fn referenced_instances(&self) -> Vec<InstanceId> {
        match self {
            ChangeRecord::PropertyChange { value, .. } => value.referenced_instances(),
            ChangeRecord::NewInstance { args, .. } | ChangeRecord::MethodCall { args, .. } => {
                args.iter().flat_map(|arg| arg.referenced_instances()).collect()
            }
            ChangeRecord::MethodResult {
                outcome: MethodOutcome::Value(value),
                ..
            } => value.referenced_instances(),
            _ => Vec::new(),
        }
    }

    pub fn remote_origin(&self) -> bool {
        match self {
            ChangeRecord::PropertyChange { remote_origin, .. }
            | ChangeRecord::NewInstance { remote_origin, .. } => *remote_origin,
            _ => false,
        }
    }
}
