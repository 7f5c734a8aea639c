use thiserror::Error;

/// Errors that can occur while declaring or merging sync descriptors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// Two descriptors for different types cannot be merged
    #[error("Cannot merge descriptor for {other} into descriptor for {type_name}")]
    TypeMismatch { type_name: String, other: String },

    /// The same property was declared twice on one descriptor
    #[error("Property '{property}' declared more than once on {type_name}")]
    DuplicateProperty { type_name: String, property: String },

    /// Flags that contradict each other on one property
    #[error("Property '{property}' on {type_name} cannot be both {first} and {second}")]
    ConflictingFlags {
        type_name: String,
        property: String,
        first: &'static str,
        second: &'static str,
    },

    /// No descriptor registered for this type with this manager
    #[error("Type {type_name} is not registered for synchronization. Must call `register_type()` first")]
    TypeNotRegistered { type_name: String },
}
