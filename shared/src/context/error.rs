use thiserror::Error;

use crate::{change::ChangeLogError, descriptor::DescriptorError, InstanceId};

use super::sync_context::ContextId;

/// Errors that can occur while registering, naming or routing instances
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// No live context with this id
    #[error("Context {context:?} does not exist")]
    ContextNotFound { context: ContextId },

    /// No context in the chain carries the requested scope name
    #[error("No context named '{scope}' in the scope chain")]
    ScopeNotFound { scope: String },

    /// The world has no live object with this identity
    #[error("Instance {instance:?} is unknown to the world")]
    InstanceNotFound { instance: InstanceId },

    /// The instance is not registered in this context or its ancestors
    #[error("Instance {instance:?} is not registered for synchronization in this scope")]
    InstanceNotRegistered { instance: InstanceId },

    /// No instance answers to this name in the scope chain
    #[error("No instance named '{name}' in this scope")]
    UnknownName { name: String },

    /// The instance is registered but has no name yet
    #[error("Instance {instance:?} has not been named yet")]
    InstanceNotNamed { instance: InstanceId },

    /// The name is bound, or was bound, to another instance
    #[error("Name '{name}' is already in use")]
    NameInUse { name: String },

    /// Fixed-name instances cannot be renamed
    #[error("Instance '{name}' has a fixed name and cannot be renamed")]
    FixedName { name: String },

    /// The operation needs a context that talks to a peer
    #[error("Context {context:?} has no peer of its own")]
    NotAnEndpoint { context: ContextId },

    /// The root context lives as long as its manager
    #[error("The root context cannot be destroyed")]
    RootContext,

    #[error(transparent)]
    ChangeLog(#[from] ChangeLogError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}
