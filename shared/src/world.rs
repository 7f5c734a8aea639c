use thiserror::Error;

use crate::{InstanceId, MethodTarget, SyncOperation, Value};

/// Errors an application world reports back to the engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    /// No live object with this identity
    #[error("Instance {instance:?} does not exist in the world")]
    InstanceNotFound { instance: InstanceId },

    /// Type has no accessor for the property
    #[error("Type {type_name} has no property '{property}'")]
    UnknownProperty { type_name: String, property: String },

    /// Value has the wrong shape for the property
    #[error("Property '{property}' cannot hold a {found} value")]
    TypeMismatch {
        property: String,
        found: &'static str,
    },

    /// The world cannot construct objects of this type
    #[error("Cannot create an instance of {type_name}: {reason}")]
    CreateFailed { type_name: String, reason: String },
}

/// Read access to the application's live objects
pub trait SyncWorldRef {
    /// Declared type of a live instance, `None` if the instance is unknown
    fn type_name(&self, instance: &InstanceId) -> Option<String>;

    fn read_property(&self, instance: &InstanceId, property: &str) -> Option<Value>;

    /// Rooted instances have a structural identity the peer can derive, so
    /// they are named but never created remotely
    fn is_rooted(&self, _instance: &InstanceId) -> bool {
        false
    }

    /// Fixed path for a rooted instance; when absent a counter name is used
    fn fixed_name(&self, _instance: &InstanceId) -> Option<String> {
        None
    }

    /// Rooted instance with this fixed path, for names the peer derived
    /// without a definition
    fn find_rooted(&self, _name: &str) -> Option<InstanceId> {
        None
    }
}

/// Write access used while applying an inbound batch.
///
/// Implementations report every mutation they perform through `op`, wrapping
/// side effects in [`SyncOperation::nested`].
pub trait SyncWorldMut: SyncWorldRef {
    fn create_instance(
        &mut self,
        op: &mut SyncOperation,
        type_name: &str,
        args: &[Value],
    ) -> Result<InstanceId, WorldError>;

    fn write_property(
        &mut self,
        op: &mut SyncOperation,
        instance: &InstanceId,
        property: &str,
        value: Value,
    ) -> Result<(), WorldError>;

    /// Runs a method on behalf of the peer. `Err` carries the exception text
    /// returned to the caller.
    fn invoke_method(
        &mut self,
        op: &mut SyncOperation,
        target: &MethodTarget,
        method: &str,
        args: &[Value],
    ) -> Result<Value, String>;
}
