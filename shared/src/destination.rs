use thiserror::Error;

use crate::wire::SyncBatch;

/// Reasons a destination could not deliver a batch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DestinationError {
    /// The peer received the batch and refused it
    #[error("Batch rejected by peer: {reason}")]
    Rejected { reason: String },

    /// No acknowledgement arrived in time; the batch may or may not have been applied
    #[error("Timed out waiting for the peer to acknowledge the batch")]
    Timeout,

    /// The peer no longer holds the session the batch was written for
    #[error("Peer session was lost")]
    SessionLost,

    #[error("Transport failure: {message}")]
    Transport { message: String },
}

impl DestinationError {
    /// Whether the peer must be rebuilt with a reset-mode initial sync
    /// instead of a plain resend
    pub fn requires_resync(&self) -> bool {
        matches!(self, DestinationError::SessionLost)
    }
}

/// Transport adapter for one peer.
///
/// `send` returns once the peer has acknowledged the batch, or with the
/// reason it was not delivered.
pub trait SyncDestination {
    fn send(&mut self, batch: &SyncBatch) -> Result<(), DestinationError>;
}

impl<D: SyncDestination + ?Sized> SyncDestination for Box<D> {
    fn send(&mut self, batch: &SyncBatch) -> Result<(), DestinationError> {
        (**self).send(batch)
    }
}
