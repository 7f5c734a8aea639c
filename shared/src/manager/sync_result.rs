/// Outcome of one send cycle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// The batch carried at least one change for the peer
    pub any_changes: bool,
    /// Why the destination did not deliver the batch; its records were
    /// merged back and go out with the next send
    pub error_message: Option<String>,
    /// The peer lost its session and must be rebuilt with
    /// [`SyncManager::get_initial_sync`](super::SyncManager::get_initial_sync)
    pub needs_resync: bool,
}

impl SyncResult {
    pub(crate) fn delivered(any_changes: bool) -> Self {
        Self {
            any_changes,
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_message.is_none()
    }
}
