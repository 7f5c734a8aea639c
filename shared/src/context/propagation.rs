use log::{debug, warn};

use crate::{
    change::{ChangeKey, ChangeRecord},
    descriptor::PropertyFlags,
    mode::{SyncMode, SyncOperation, ValueChanged},
    InstanceId, Value,
};

use super::{context_tree::ContextTree, sync_context::ContextId};

impl ContextTree {
    /// Drains the operation's notifications and routes each one
    pub fn process_operation(&mut self, op: &mut SyncOperation, origin: Option<ContextId>) {
        for change in op.take_notifications() {
            self.process_notification(&change, origin);
        }
    }

    /// Interprets one value-changed notification according to its mode.
    ///
    /// `origin` is the endpoint whose peer sent the change being applied, if
    /// any; its baseline moves and the change is forwarded to the other
    /// endpoints holding the instance.
    pub fn process_notification(&mut self, change: &ValueChanged, origin: Option<ContextId>) {
        if change.mode == SyncMode::CopyingPrevious {
            return;
        }
        let Some(owner) = self.listeners().owner(&change.instance) else {
            debug!("ignoring change to unsynchronized {:?}", change.instance);
            return;
        };
        let Some(type_name) = self
            .context(owner)
            .ok()
            .and_then(|context| context.record(&change.instance))
            .map(|record| record.type_name().to_string())
        else {
            return;
        };
        let synchronized = self
            .types()
            .get(&type_name)
            .and_then(|descriptor| descriptor.property_entry(&change.property))
            .map(|entry| !entry.has(PropertyFlags::STATIC))
            .unwrap_or(false);
        if !synchronized {
            return;
        }

        if change.mode.updates_snapshot() {
            if let Ok(context) = self.context_mut(owner) {
                let log = context.initial_log_mut();
                log.record_value(change.instance, &change.property, change.value.clone(), false);
                log.compact();
            }
        }

        if change.mode.updates_baseline() {
            self.update_baseline(change, origin);
            if change.mode == SyncMode::ApplyingPeerChanges {
                if let Some(origin) = origin {
                    for holder in self.outgoing_holders(&change.instance) {
                        if holder != origin {
                            self.record_outgoing(
                                holder,
                                &change.instance,
                                &change.property,
                                change.value.clone(),
                                true,
                                false,
                            );
                        }
                    }
                }
            }
        }

        if change.mode.records_outgoing() {
            for holder in self.outgoing_holders(&change.instance) {
                self.record_outgoing(
                    holder,
                    &change.instance,
                    &change.property,
                    change.value.clone(),
                    false,
                    false,
                );
            }
        }
    }

    fn update_baseline(&mut self, change: &ValueChanged, origin: Option<ContextId>) {
        let targets = match origin {
            Some(origin)
                if self
                    .context(origin)
                    .map(|context| context.holds(&change.instance))
                    .unwrap_or(false) =>
            {
                vec![origin]
            }
            _ => self.all_holders(&change.instance),
        };
        for target in targets {
            let Ok(context) = self.context_mut(target) else {
                continue;
            };
            let key = ChangeKey::Property(change.property.clone());
            if Some(target) == origin && context.forget_queued(&change.instance, &key) {
                warn!(
                    "peer wrote {:?}.{} while a local change was queued; keeping the peer's value",
                    change.instance, change.property
                );
            }
            if let Some(record) = context.record_mut(&change.instance) {
                record.set_previous_value(&change.property, change.value.clone());
            }
        }
    }

    /// Logs a property value in the change group of endpoint `ctx`.
    ///
    /// Unless `force` is set, a value equal to the pending one (or to the
    /// baseline when nothing is pending) is suppressed. Returns whether a
    /// record was added.
    pub(crate) fn record_outgoing(
        &mut self,
        ctx: ContextId,
        instance: &InstanceId,
        property: &str,
        value: Value,
        remote_origin: bool,
        force: bool,
    ) -> bool {
        let host_type = self.host_type();
        let default_group = self.config().default_group.clone();
        let Ok(context) = self.context(ctx) else {
            return false;
        };
        if !context.is_endpoint() {
            return false;
        }
        let Some(record) = context.record(instance) else {
            return false;
        };
        if record.name().is_none() {
            return false;
        }
        let Some(descriptor) = self.types().get(record.type_name()) else {
            return false;
        };
        let Some(entry) = descriptor.property_entry(property) else {
            return false;
        };
        if !entry.can_send(host_type) {
            return false;
        }
        if entry.has(PropertyFlags::ON_DEMAND) && !record.is_fetched(property) {
            return false;
        }
        if entry.has(PropertyFlags::CONSTANT) && record.is_known_to_peer() {
            debug!("not resending constant {}.{}", record.type_name(), property);
            return false;
        }
        if !force {
            let expected = context
                .pending_value(instance, property)
                .or_else(|| record.previous_value(property));
            if expected == Some(&value) {
                return false;
            }
        }
        let group = entry
            .sync_group()
            .map(str::to_string)
            .unwrap_or(default_group);

        let Ok(context) = self.context_mut(ctx) else {
            return false;
        };
        if let Some(record) = context.record_mut(instance) {
            record.mark_diverged();
        }
        let log = context.group_mut(&group).active_mut();
        let recorded = if log.record_value(*instance, property, value.clone(), remote_origin) {
            true
        } else if force {
            log.add_record(ChangeRecord::PropertyChange {
                instance: *instance,
                property: property.to_string(),
                value,
                remote_origin,
            });
            true
        } else {
            false
        };
        if recorded {
            context.mark_needs_sync();
        }
        recorded
    }
}
