use thiserror::Error;

use crate::{
    change::ChangeLogError, context::ContextError, descriptor::DescriptorError,
    reader::ReceiveError, world::WorldError,
};

/// Errors surfaced by [`SyncManager`](super::SyncManager) operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    ChangeLog(#[from] ChangeLogError),

    /// The inbound batch could not be decoded
    #[error(transparent)]
    Receive(#[from] ReceiveError),

    #[error(transparent)]
    World(#[from] WorldError),
}
