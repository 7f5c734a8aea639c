//! # Tandem Shared
//! Object-state synchronization engine used by both peers of a tandem
//! session: sync descriptors, change logs, the scope tree of instance
//! registries, and the batch writer and reader that carry changes between
//! peers.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

mod change;
mod config;
mod context;
mod descriptor;
mod destination;
mod instance;
mod manager;
mod mode;
mod reader;
mod types;
mod value;
mod wire;
mod world;
mod writer;


pub use change::{
    ChangeKey, ChangeLog, ChangeLogError, ChangeRecord, GroupLogs, MethodOutcome, MethodTarget,
    PendingResult,
};
pub use config::SyncConfig;
pub use context::{
    ContextError, ContextId, ContextKind, ContextTree, InstanceRecord, ListenerRegistry, NameIndex,
    RecordFlags, SyncContext, SyncInstOptions,
};
pub use descriptor::{
    AccessorTable, DescriptorError, Getter, PropertyEntry, PropertyFlags, Setter, SyncDescriptor,
    SyncTypes,
};
pub use destination::{DestinationError, SyncDestination};
pub use instance::InstanceId;
pub use manager::{SyncError, SyncManager, SyncResult};
pub use mode::{SyncMode, SyncOperation, ValueChanged};
pub use reader::{read_value, BatchReader, ReceiveError, ReceiveReport};
pub use types::{CallId, HostType};
pub use value::{Value, WireValue};
pub use wire::{SyncBatch, SyncCommand, WireOutcome};
pub use world::{SyncWorldMut, SyncWorldRef, WorldError};
pub use writer::{name_segments, BatchWriter, PathStack, ValueWriter};

cfg_if! {
    if #[cfg(feature = "json")] {
        pub use wire::JsonError;
    }
}
