use super::error::ReceiveError;

/// Outcome of applying one inbound batch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Commands applied without error
    pub applied: usize,
    /// One entry per rejected top-level command
    pub errors: Vec<ReceiveError>,
    /// Too many commands were rejected; the session should be rebuilt with a
    /// reset-mode initial sync
    pub needs_reset: bool,
}

impl ReceiveReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
