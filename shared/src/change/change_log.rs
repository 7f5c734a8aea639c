use std::collections::{HashMap, HashSet};

use crate::{types::CallId, InstanceId, Value};

use super::{
    change_record::{ChangeKey, ChangeRecord},
    pending_result::PendingResult,
};

/// Overridden slots tolerated before [`ChangeLog::compact`] reclaims them
pub const COMPACT_SLACK: usize = 16;

struct LogEntry {
    record: ChangeRecord,
    overridden: bool,
}

/// Append-only, override-aware sequence of change records for one context
/// and one change group.
///
/// A record superseded by a newer one for the same (instance, key) is flagged
/// overridden and skipped on read, but keeps its slot: the batch writer splices
/// dependency definitions in by position.
#[derive(Default)]
pub struct ChangeLog {
    entries: Vec<LogEntry>,
    live_index: HashMap<(InstanceId, ChangeKey), usize>,
    current_values: HashMap<InstanceId, HashMap<String, Value>>,
    pending_calls: HashMap<CallId, PendingResult>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` for a property unless it equals the last value recorded
    /// in this log. Returns whether a record was added.
    pub fn record_value(
        &mut self,
        instance: InstanceId,
        property: &str,
        value: Value,
        remote_origin: bool,
    ) -> bool {
        if self.current_value(&instance, property) == Some(&value) {
            return false;
        }
        self.add_record(ChangeRecord::PropertyChange {
            instance,
            property: property.to_string(),
            value,
            remote_origin,
        });
        true
    }

    /// Appends `record`, overriding the live record with the same key.
    /// Returns the new record's position.
    pub fn add_record(&mut self, record: ChangeRecord) -> usize {
        let position = self.entries.len();
        if let Some(key) = record.key() {
            if let Some(previous) = self.live_index.insert(key, position) {
                self.entries[previous].overridden = true;
            }
        }
        if let ChangeRecord::PropertyChange {
            instance,
            property,
            value,
            ..
        } = &record
        {
            self.current_values
                .entry(*instance)
                .or_default()
                .insert(property.clone(), value.clone());
        }
        self.entries.push(LogEntry {
            record,
            overridden: false,
        });
        position
    }

    /// Appends a method call together with the slot its result resolves
    pub fn add_call(&mut self, record: ChangeRecord, pending: PendingResult) -> usize {
        if let ChangeRecord::MethodCall { call_id, .. } = &record {
            self.pending_calls.insert(*call_id, pending);
        }
        self.add_record(record)
    }

    /// Inserts `records` immediately before `position`, shifting later records
    pub fn splice_before(&mut self, position: usize, records: Vec<ChangeRecord>) {
        let position = position.min(self.entries.len());
        let spliced = records.into_iter().map(|record| LogEntry {
            record,
            overridden: false,
        });
        self.entries.splice(position..position, spliced);
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        self.live_index.clear();
        for position in 0..self.entries.len() {
            if self.entries[position].overridden {
                continue;
            }
            let Some(key) = self.entries[position].record.key() else {
                continue;
            };
            if let Some(previous) = self.live_index.insert(key, position) {
                self.entries[previous].overridden = true;
            }
        }
    }

    /// Drops overridden slots once they outnumber the live ones by more than
    /// [`COMPACT_SLACK`]. Shifts positions, so never call it on a log the
    /// writer splices into.
    pub fn compact(&mut self) -> bool {
        if self.entries.len() <= 2 * self.live_index.len() + COMPACT_SLACK {
            return false;
        }
        self.entries.retain(|entry| !entry.overridden);
        self.rebuild_index();
        true
    }

    /// Number of slots, overridden ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Live record at `position`; `None` if overridden or out of range
    pub fn get(&self, position: usize) -> Option<&ChangeRecord> {
        self.entries
            .get(position)
            .filter(|entry| !entry.overridden)
            .map(|entry| &entry.record)
    }

    pub fn is_overridden(&self, position: usize) -> bool {
        self.entries
            .get(position)
            .map(|entry| entry.overridden)
            .unwrap_or(false)
    }

    pub fn live_records(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.entries
            .iter()
            .filter(|entry| !entry.overridden)
            .map(|entry| &entry.record)
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.overridden).count()
    }

    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    pub fn live_record(&self, instance: &InstanceId, key: &ChangeKey) -> Option<&ChangeRecord> {
        self.live_index
            .get(&(*instance, key.clone()))
            .map(|position| &self.entries[*position].record)
    }

    /// Slot of the live record for (instance, key)
    pub fn live_position(&self, instance: &InstanceId, key: &ChangeKey) -> Option<usize> {
        self.live_index.get(&(*instance, key.clone())).copied()
    }

    pub fn has_live(&self, instance: &InstanceId, key: &ChangeKey) -> bool {
        self.live_index.contains_key(&(*instance, key.clone()))
    }

    /// Value of the live property record, if any
    pub fn live_value(&self, instance: &InstanceId, property: &str) -> Option<&Value> {
        match self.live_record(instance, &ChangeKey::Property(property.to_string())) {
            Some(ChangeRecord::PropertyChange { value, .. }) => Some(value),
            _ => None,
        }
    }

    /// Last value recorded for the property, even if since overridden by removal
    pub fn current_value(&self, instance: &InstanceId, property: &str) -> Option<&Value> {
        self.current_values
            .get(instance)
            .and_then(|values| values.get(property))
    }

    /// Overrides the live record for (instance, key) without a replacement
    pub fn remove_live(&mut self, instance: &InstanceId, key: &ChangeKey) -> Option<ChangeRecord> {
        let position = self.live_index.remove(&(*instance, key.clone()))?;
        self.entries[position].overridden = true;
        if let ChangeKey::Property(property) = key {
            if let Some(values) = self.current_values.get_mut(instance) {
                values.remove(property);
            }
        }
        Some(self.entries[position].record.clone())
    }

    /// Overrides every record about `instance`
    pub fn drop_instance(&mut self, instance: &InstanceId) {
        for entry in self.entries.iter_mut() {
            if entry.record.instance() == Some(*instance) {
                entry.overridden = true;
            }
        }
        self.live_index.retain(|(owner, _), _| owner != instance);
        self.current_values.remove(instance);
    }

    pub fn pending_call(&self, call_id: &CallId) -> Option<&PendingResult> {
        self.pending_calls.get(call_id)
    }

    pub fn take_pending_calls(&mut self) -> HashMap<CallId, PendingResult> {
        std::mem::take(&mut self.pending_calls)
    }

    /// Combines a failed in-flight log with the log recorded meanwhile.
    ///
    /// Records of `pending` come first in their original order, except those
    /// whose key also has a live record in `active`: the never-sent value wins.
    pub fn merged(mut pending: ChangeLog, mut active: ChangeLog) -> ChangeLog {
        let mut output = ChangeLog::new();
        let active_keys: HashSet<(InstanceId, ChangeKey)> =
            active.live_index.keys().cloned().collect();

        for entry in pending.entries.drain(..) {
            if entry.overridden {
                continue;
            }
            if let Some(key) = entry.record.key() {
                if active_keys.contains(&key) {
                    continue;
                }
            }
            output.add_record(entry.record);
        }
        for entry in active.entries.drain(..) {
            if entry.overridden {
                continue;
            }
            output.add_record(entry.record);
        }

        output.pending_calls = pending.take_pending_calls();
        output.pending_calls.extend(active.take_pending_calls());
        output
    }
}
