use std::sync::{Arc, RwLock};

use super::change_record::MethodOutcome;

/// Handle to the eventual outcome of a remote method invocation.
///
/// Clones share one slot; the manager fills it when the matching result
/// arrives from the peer.
#[derive(Clone, Debug, Default)]
pub struct PendingResult {
    slot: Arc<RwLock<Option<MethodOutcome>>>,
}

impl PendingResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        match self.slot.as_ref().read() {
            Ok(slot) => slot.is_some(),
            Err(_) => false,
        }
    }

    /// Outcome if it has arrived
    pub fn outcome(&self) -> Option<MethodOutcome> {
        let Ok(slot) = self.slot.as_ref().read() else {
            return None;
        };
        slot.clone()
    }

    /// Fills the slot; returns false if it was already resolved
    pub(crate) fn resolve(&self, outcome: MethodOutcome) -> bool {
        let Ok(mut slot) = self.slot.as_ref().write() else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        true
    }
}
