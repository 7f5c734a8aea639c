mod accessor;
mod error;
mod property_flags;
mod sync_descriptor;
mod sync_types;

pub use accessor::{AccessorTable, Getter, Setter};
pub use error::DescriptorError;
pub use property_flags::PropertyFlags;
pub use sync_descriptor::{PropertyEntry, SyncDescriptor};
pub use sync_types::SyncTypes;
