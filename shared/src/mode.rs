use serde::{Deserialize, Serialize};

use crate::{InstanceId, Value};

/// How a value-changed notification is interpreted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncMode {
    /// The mutation becomes an outgoing change
    Recording,
    /// Locally seeded state; feeds the initial snapshot only
    Initializing,
    /// State received during first contact; the peer already holds it
    InitializingFromPeer,
    /// A peer change being applied; only the baseline moves
    ApplyingPeerChanges,
    /// Baseline moves, nothing is recorded
    Disabled,
    /// Value is being cloned for a snapshot; ignored entirely
    CopyingPrevious,
}

impl SyncMode {
    pub fn records_outgoing(&self) -> bool {
        matches!(self, SyncMode::Recording)
    }

    pub fn updates_baseline(&self) -> bool {
        matches!(
            self,
            SyncMode::InitializingFromPeer | SyncMode::ApplyingPeerChanges | SyncMode::Disabled
        )
    }

    pub fn updates_snapshot(&self) -> bool {
        matches!(
            self,
            SyncMode::Recording
                | SyncMode::Initializing
                | SyncMode::InitializingFromPeer
                | SyncMode::ApplyingPeerChanges
        )
    }

    /// Mode used to apply the commands that follow a `SetMode` command sent
    /// by the peer with this value
    pub fn inbound_counterpart(&self) -> SyncMode {
        match self {
            SyncMode::Initializing => SyncMode::InitializingFromPeer,
            SyncMode::InitializingFromPeer => SyncMode::Disabled,
            _ => SyncMode::ApplyingPeerChanges,
        }
    }
}

/// One value-changed notification, tagged with the mode it was raised under
#[derive(Clone, Debug, PartialEq)]
pub struct ValueChanged {
    pub instance: InstanceId,
    pub property: String,
    pub value: Value,
    pub mode: SyncMode,
}

/// The logical operation a batch of mutations belongs to.
///
/// Every mutation entry point takes one of these instead of consulting ambient
/// state: the application raises notifications through [`SyncOperation::notify`]
/// and hands the operation to [`SyncManager::apply`](crate::SyncManager::apply).
/// While peer changes are applied, side effects raised inside
/// [`SyncOperation::nested`] are escalated back to [`SyncMode::Recording`],
/// because the peer may not reproduce them identically.
#[derive(Debug)]
pub struct SyncOperation {
    mode: SyncMode,
    depth: u8,
    notifications: Vec<ValueChanged>,
}

impl SyncOperation {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            depth: 0,
            notifications: Vec::new(),
        }
    }

    pub fn recording() -> Self {
        Self::new(SyncMode::Recording)
    }

    pub fn applying_peer_changes() -> Self {
        Self::new(SyncMode::ApplyingPeerChanges)
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn set_mode(&mut self, mode: SyncMode) {
        self.mode = mode;
    }

    /// Mode a notification raised right now would be recorded under
    pub fn effective_mode(&self) -> SyncMode {
        if self.mode == SyncMode::ApplyingPeerChanges && self.depth > 0 {
            SyncMode::Recording
        } else {
            self.mode
        }
    }

    pub fn notify(&mut self, instance: InstanceId, property: &str, value: Value) {
        let mode = self.effective_mode();
        self.notifications.push(ValueChanged {
            instance,
            property: property.to_string(),
            value,
            mode,
        });
    }

    /// Runs `f` one nesting level deeper
    pub fn nested<R>(&mut self, f: impl FnOnce(&mut SyncOperation) -> R) -> R {
        self.depth = self.depth.saturating_add(1);
        let output = f(self);
        self.depth -= 1;
        output
    }

    pub fn has_notification(&self, instance: &InstanceId, property: &str) -> bool {
        self.notifications
            .iter()
            .any(|change| change.instance == *instance && change.property == property)
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn take_notifications(&mut self) -> Vec<ValueChanged> {
        std::mem::take(&mut self.notifications)
    }
}
