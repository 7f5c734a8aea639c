use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
};

use crate::{
    change::{ChangeKey, ChangeLog, ChangeRecord, GroupLogs, PendingResult},
    types::CallId,
    InstanceId, Value,
};

use super::{
    error::ContextError, instance_record::InstanceRecord, name_index::NameIndex, RecordFlags,
};

/// Handle of a context inside its [`ContextTree`](super::ContextTree)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

impl ContextId {
    pub(crate) fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn to_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context#{}", self.0)
    }
}

/// Whether a context exchanges batches with a peer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Has a peer; keeps outgoing change logs and per-peer baselines
    Endpoint,
    /// Shared by the endpoints below it; keeps only its snapshot and forwards
    /// changes to the endpoints that inherited its instances
    Shared,
}

/// One node of the scope DAG.
///
/// Records owned here carry the listener for their instance; records with
/// [`RecordFlags::INHERITED`] are copies of a record owned by an ancestor and
/// are written only through the owner's propagation path.
pub struct SyncContext {
    id: ContextId,
    scope_name: String,
    kind: ContextKind,
    parents: Vec<ContextId>,
    children: Vec<ContextId>,
    records: HashMap<InstanceId, InstanceRecord>,
    inheritors: HashMap<InstanceId, HashSet<ContextId>>,
    names: NameIndex,
    groups: BTreeMap<String, GroupLogs>,
    initial_log: ChangeLog,
    awaiting_results: HashMap<CallId, PendingResult>,
    outstanding_sends: u32,
    needs_sync: bool,
    diagnostics: Vec<String>,
}

impl SyncContext {
    pub(crate) fn new(
        id: ContextId,
        scope_name: &str,
        kind: ContextKind,
        parents: Vec<ContextId>,
    ) -> Self {
        Self {
            id,
            scope_name: scope_name.to_string(),
            kind,
            parents,
            children: Vec::new(),
            records: HashMap::new(),
            inheritors: HashMap::new(),
            names: NameIndex::new(),
            groups: BTreeMap::new(),
            initial_log: ChangeLog::new(),
            awaiting_results: HashMap::new(),
            outstanding_sends: 0,
            needs_sync: false,
            diagnostics: Vec::new(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn is_endpoint(&self) -> bool {
        self.kind == ContextKind::Endpoint
    }

    pub fn parents(&self) -> &[ContextId] {
        &self.parents
    }

    pub fn children(&self) -> &[ContextId] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: ContextId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: &ContextId) {
        self.children.retain(|existing| existing != child);
    }

    pub(crate) fn remove_parent(&mut self, parent: &ContextId) {
        self.parents.retain(|existing| existing != parent);
    }

    // Records

    pub fn record(&self, instance: &InstanceId) -> Option<&InstanceRecord> {
        self.records.get(instance)
    }

    pub(crate) fn record_mut(&mut self, instance: &InstanceId) -> Option<&mut InstanceRecord> {
        self.records.get_mut(instance)
    }

    pub fn holds(&self, instance: &InstanceId) -> bool {
        self.records.contains_key(instance)
    }

    pub fn owns(&self, instance: &InstanceId) -> bool {
        self.records
            .get(instance)
            .map(|record| !record.is_inherited())
            .unwrap_or(false)
    }

    pub fn records(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.records.values()
    }

    pub fn owned_records(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.records.values().filter(|record| !record.is_inherited())
    }

    /// Adds `record`, binding its name if it has one
    pub(crate) fn insert_record(&mut self, record: InstanceRecord) -> Result<(), ContextError> {
        if let Some(name) = record.name() {
            self.names.try_insert(name, record.instance())?;
        }
        if let Some(old_name) = record.pending_rename() {
            self.names.try_insert(old_name, record.instance())?;
        }
        self.records.insert(record.instance(), record);
        Ok(())
    }

    /// Drops the record, its names and every logged change about it
    pub(crate) fn remove_record(&mut self, instance: &InstanceId) -> Option<InstanceRecord> {
        let record = self.records.remove(instance)?;
        if let Some(name) = record.name() {
            self.names.release(name);
        }
        if let Some(old_name) = record.pending_rename() {
            self.names.release(old_name);
        }
        for group in self.groups.values_mut() {
            group.active_mut().drop_instance(instance);
            if let Some(in_flight) = group.in_flight_mut() {
                in_flight.drop_instance(instance);
            }
        }
        self.initial_log.drop_instance(instance);
        self.inheritors.remove(instance);
        Some(record)
    }

    /// Names an already-held record
    pub(crate) fn bind_name(
        &mut self,
        instance: &InstanceId,
        name: &str,
    ) -> Result<(), ContextError> {
        let Some(record) = self.records.get_mut(instance) else {
            return Err(ContextError::InstanceNotRegistered {
                instance: *instance,
            });
        };
        self.names.try_insert(name, *instance)?;
        record.set_name(name);
        Ok(())
    }

    pub(crate) fn names(&self) -> &NameIndex {
        &self.names
    }

    pub(crate) fn names_mut(&mut self) -> &mut NameIndex {
        &mut self.names
    }

    pub fn lookup_name(&self, name: &str) -> Option<InstanceId> {
        self.names.get(name).copied()
    }

    // Back-references

    pub fn inheritors_of(&self, instance: &InstanceId) -> Vec<ContextId> {
        let mut output: Vec<ContextId> = self
            .inheritors
            .get(instance)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        output.sort();
        output
    }

    pub(crate) fn add_inheritor(&mut self, instance: InstanceId, context: ContextId) {
        self.inheritors.entry(instance).or_default().insert(context);
    }

    pub(crate) fn remove_inheritor(&mut self, instance: &InstanceId, context: &ContextId) {
        if let Some(set) = self.inheritors.get_mut(instance) {
            set.remove(context);
            if set.is_empty() {
                self.inheritors.remove(instance);
            }
        }
    }

    // Logs

    pub fn group(&self, name: &str) -> Option<&GroupLogs> {
        self.groups.get(name)
    }

    pub(crate) fn group_mut(&mut self, name: &str) -> &mut GroupLogs {
        self.groups
            .entry(name.to_string())
            .or_insert_with(|| GroupLogs::new(name))
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub(crate) fn groups_mut(&mut self) -> impl Iterator<Item = &mut GroupLogs> {
        self.groups.values_mut()
    }

    /// Whether any group has live records waiting to be sent
    pub fn has_pending_changes(&self) -> bool {
        self.groups.values().any(|group| !group.active().is_empty())
    }

    pub fn has_live_record(&self, instance: &InstanceId) -> bool {
        self.groups.values().any(|group| {
            group
                .active()
                .live_records()
                .any(|record| record.instance() == Some(*instance))
        })
    }

    /// Live value in the active logs, else the value in flight
    pub fn pending_value(&self, instance: &InstanceId, property: &str) -> Option<&Value> {
        for group in self.groups.values() {
            if let Some(value) = group.active().live_value(instance, property) {
                return Some(value);
            }
        }
        for group in self.groups.values() {
            if let Some(value) = group
                .in_flight()
                .and_then(|in_flight| in_flight.live_value(instance, property))
            {
                return Some(value);
            }
        }
        None
    }

    /// Drops the queued, not yet sent record for (instance, key) in every
    /// group. Returns whether one was queued.
    pub(crate) fn forget_queued(&mut self, instance: &InstanceId, key: &ChangeKey) -> bool {
        let mut forgotten = false;
        for group in self.groups.values_mut() {
            forgotten |= group.active_mut().remove_live(instance, key).is_some();
        }
        forgotten
    }

    pub fn initial_log(&self) -> &ChangeLog {
        &self.initial_log
    }

    pub(crate) fn initial_log_mut(&mut self) -> &mut ChangeLog {
        &mut self.initial_log
    }

    // Remote calls

    pub(crate) fn take_awaiting_result(&mut self, call_id: &CallId) -> Option<PendingResult> {
        if let Some(pending) = self.awaiting_results.remove(call_id) {
            return Some(pending);
        }
        for group in self.groups.values() {
            let in_flight = group.in_flight().and_then(|log| log.pending_call(call_id));
            let active = group.active().pending_call(call_id);
            if let Some(pending) = in_flight.or(active) {
                return Some(pending.clone());
            }
        }
        None
    }

    pub fn awaiting_result_count(&self) -> usize {
        self.awaiting_results.len()
    }

    // Send bookkeeping

    pub fn outstanding_sends(&self) -> u32 {
        self.outstanding_sends
    }

    pub(crate) fn begin_send(&mut self) {
        self.outstanding_sends += 1;
        self.needs_sync = false;
    }

    pub(crate) fn end_send(&mut self) {
        self.outstanding_sends = self.outstanding_sends.saturating_sub(1);
    }

    pub fn needs_sync(&self) -> bool {
        self.needs_sync
    }

    pub(crate) fn mark_needs_sync(&mut self) {
        self.needs_sync = true;
    }

    pub(crate) fn add_diagnostic(&mut self, message: String) {
        self.diagnostics.push(message);
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<String> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Applies an acknowledged batch: names become registered, sent values
    /// become the baseline and sent calls start waiting for their results
    pub(crate) fn commit(&mut self, mut log: ChangeLog) {
        let mut touched = HashSet::new();
        for record in log.live_records() {
            match record {
                ChangeRecord::NewInstance { instance, .. } => {
                    if let Some(held) = self.records.get_mut(instance) {
                        held.set_flag(RecordFlags::REGISTERED);
                        held.clear_flag(RecordFlags::NAME_QUEUED);
                    }
                }
                ChangeRecord::PropertyChange {
                    instance,
                    property,
                    value,
                    ..
                } => {
                    if let Some(held) = self.records.get_mut(instance) {
                        held.set_previous_value(property, value.clone());
                        touched.insert(*instance);
                    }
                }
                _ => {}
            }
        }
        for instance in touched {
            if self.has_live_record(&instance) {
                continue;
            }
            if let Some(held) = self.records.get_mut(&instance) {
                held.take_initial_values();
            }
        }
        self.awaiting_results.extend(log.take_pending_calls());
    }
}
