use std::collections::{HashMap, HashSet};

use bitflags::bitflags;

use crate::{InstanceId, Value};

use super::sync_context::ContextId;

bitflags! {
    /// Per-record state bits
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u16 {
        /// The peer acknowledged the name
        const REGISTERED = 1 << 0;
        /// The name went out in a batch that has not been acknowledged yet
        const NAME_QUEUED = 1 << 1;
        const ON_DEMAND = 1 << 2;
        const FIXED_NAME = 1 << 3;
        const INITIALIZED = 1 << 4;
        const INHERITED = 1 << 5;
        const RESET_STATE = 1 << 6;
        /// Every sendable property goes out with the definition
        const PUSH_INITIAL = 1 << 7;
    }
}

/// Bookkeeping for one instance within one context
#[derive(Clone, Debug)]
pub struct InstanceRecord {
    instance: InstanceId,
    type_name: String,
    name: Option<String>,
    args: Vec<Value>,
    flags: RecordFlags,
    owner: ContextId,
    previous_values: HashMap<String, Value>,
    initial_values: Option<HashMap<String, Value>>,
    fetched: HashSet<String>,
    pending_rename: Option<String>,
}

impl InstanceRecord {
    pub fn new(instance: InstanceId, type_name: &str, owner: ContextId, args: Vec<Value>) -> Self {
        Self {
            instance,
            type_name: type_name.to_string(),
            name: None,
            args,
            flags: RecordFlags::empty(),
            owner,
            previous_values: HashMap::new(),
            initial_values: None,
            fetched: HashSet::new(),
            pending_rename: None,
        }
    }

    /// Copy held by a descendant context: shares name and arguments, keeps
    /// its own baseline
    pub fn inherit(&self) -> Self {
        let mut flags = RecordFlags::INHERITED | RecordFlags::INITIALIZED;
        for carried in [
            RecordFlags::FIXED_NAME,
            RecordFlags::ON_DEMAND,
            RecordFlags::RESET_STATE,
            RecordFlags::PUSH_INITIAL,
        ] {
            if self.flags.contains(carried) {
                flags.insert(carried);
            }
        }
        Self {
            instance: self.instance,
            type_name: self.type_name.clone(),
            name: self.name.clone(),
            args: self.args.clone(),
            flags,
            owner: self.owner,
            previous_values: HashMap::new(),
            initial_values: None,
            fetched: HashSet::new(),
            pending_rename: self.pending_rename.clone(),
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn owner(&self) -> ContextId {
        self.owner
    }

    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    pub fn has(&self, flag: RecordFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: RecordFlags) {
        self.flags.insert(flag);
    }

    pub fn clear_flag(&mut self, flag: RecordFlags) {
        self.flags.remove(flag);
    }

    pub fn is_registered(&self) -> bool {
        self.has(RecordFlags::REGISTERED)
    }

    pub fn is_inherited(&self) -> bool {
        self.has(RecordFlags::INHERITED)
    }

    /// Known to the peer, or on its way there in an earlier batch
    pub fn is_known_to_peer(&self) -> bool {
        self.has(RecordFlags::REGISTERED)
            || self.has(RecordFlags::NAME_QUEUED)
            || self.has(RecordFlags::FIXED_NAME)
    }

    pub fn previous_value(&self, property: &str) -> Option<&Value> {
        self.previous_values.get(property)
    }

    pub fn previous_values(&self) -> &HashMap<String, Value> {
        &self.previous_values
    }

    pub fn set_previous_value(&mut self, property: &str, value: Value) {
        self.previous_values.insert(property.to_string(), value);
    }

    /// Captures the baseline the first time local state diverges from it
    pub fn mark_diverged(&mut self) {
        if self.initial_values.is_none() {
            self.initial_values = Some(self.previous_values.clone());
        }
    }

    pub fn initial_values(&self) -> Option<&HashMap<String, Value>> {
        self.initial_values.as_ref()
    }

    pub fn take_initial_values(&mut self) -> Option<HashMap<String, Value>> {
        self.initial_values.take()
    }

    pub fn is_fetched(&self, property: &str) -> bool {
        self.fetched.contains(property)
    }

    pub fn mark_fetched(&mut self, property: &str) {
        self.fetched.insert(property.to_string());
    }

    pub fn pending_rename(&self) -> Option<&str> {
        self.pending_rename.as_deref()
    }

    /// Switches to `new_name`, keeping the current name resolvable until the
    /// rename is acknowledged when `await_ack` is set
    pub fn rename(&mut self, new_name: &str, await_ack: bool) -> Option<String> {
        let old = self.name.replace(new_name.to_string());
        if await_ack {
            self.pending_rename = old.clone();
        }
        old
    }

    pub fn finish_rename(&mut self) -> Option<String> {
        self.pending_rename.take()
    }
}
