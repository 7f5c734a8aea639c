use thiserror::Error;

/// Errors that can occur while freezing or reconciling a change group
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangeLogError {
    /// A batch for this group is already waiting for its outcome
    #[error("Change group '{group}' already has a batch in flight")]
    SendInFlight { group: String },

    /// Reconcile was called with no frozen batch
    #[error("Change group '{group}' has no batch in flight to reconcile")]
    NothingInFlight { group: String },
}
