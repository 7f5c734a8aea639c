mod context_tree;
mod error;
mod instance_record;
mod listener_registry;
mod name_allocator;
mod name_index;
mod propagation;
mod sync_context;
mod sync_inst_options;

pub use context_tree::ContextTree;
pub use error::ContextError;
pub use instance_record::{InstanceRecord, RecordFlags};
pub use listener_registry::ListenerRegistry;
pub use name_index::NameIndex;
pub use sync_context::{ContextId, ContextKind, SyncContext};
pub use sync_inst_options::SyncInstOptions;
