use thiserror::Error;

use crate::{context::ContextError, types::CallId, world::WorldError};

/// Why one inbound command was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    /// The batch could not be decoded at all
    #[error("Malformed batch: {message}")]
    Parse { message: String },

    /// A path or reference names nothing this side knows
    #[error("No synchronized object is named '{name}'")]
    UnknownName { name: String },

    /// A definition names a type without a descriptor
    #[error("Type {type_name} is not registered for synchronization")]
    UnknownType { type_name: String },

    /// The descriptor forbids peer-created instances
    #[error("Peer may not create instances of {type_name}")]
    NotCreatable { type_name: String },

    /// Command needs an open object or type
    #[error("'{command}' needs an open object")]
    NoTarget { command: &'static str },

    /// Property is unknown, static, constant or flows the other way
    #[error("Property {type_name}.{property} cannot be written by the peer")]
    PropertyNotWritable { type_name: String, property: String },

    /// Method lacks the remote-callable marker
    #[error("Method {type_name}.{method} is not remote-callable")]
    UnauthorizedCall { type_name: String, method: String },

    /// Result for a call nobody is waiting on
    #[error("No call is waiting for result {call_id}")]
    UnknownCallId { call_id: CallId },

    /// ExitObject with nothing open
    #[error("ExitObject without a matching EnterObject")]
    UnbalancedExit,

    #[error(transparent)]
    World(#[from] WorldError),

    #[error(transparent)]
    Context(#[from] ContextError),
}
