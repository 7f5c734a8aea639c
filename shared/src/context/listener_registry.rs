use std::collections::HashMap;

use log::warn;

use crate::InstanceId;

use super::sync_context::ContextId;

/// Routes value-changed notifications to the one context that owns each
/// instance. Attached once per instance, in the owner.
#[derive(Default)]
pub struct ListenerRegistry {
    owners: HashMap<InstanceId, ContextId>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false, keeping the first owner, if a listener is already attached
    pub fn attach(&mut self, instance: InstanceId, owner: ContextId) -> bool {
        if let Some(existing) = self.owners.get(&instance) {
            if *existing != owner {
                warn!(
                    "{:?} already listened to by {:?}; ignoring attach from {:?}",
                    instance, existing, owner
                );
            }
            return false;
        }
        self.owners.insert(instance, owner);
        true
    }

    pub fn detach(&mut self, instance: &InstanceId) -> Option<ContextId> {
        self.owners.remove(instance)
    }

    pub fn owner(&self, instance: &InstanceId) -> Option<ContextId> {
        self.owners.get(instance).copied()
    }

    pub fn is_attached(&self, instance: &InstanceId) -> bool {
        self.owners.contains_key(instance)
    }

    /// Detaches every instance owned by `context`, returning them
    pub fn detach_context(&mut self, context: ContextId) -> Vec<InstanceId> {
        let instances: Vec<InstanceId> = self
            .owners
            .iter()
            .filter(|(_, owner)| **owner == context)
            .map(|(instance, _)| *instance)
            .collect();
        for instance in &instances {
            self.owners.remove(instance);
        }
        instances
    }
}
