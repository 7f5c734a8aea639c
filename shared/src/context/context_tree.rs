use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use log::{debug, info, warn};

use crate::{
    change::{ChangeKey, ChangeLog, ChangeRecord, MethodTarget, PendingResult},
    config::SyncConfig,
    descriptor::{PropertyFlags, SyncDescriptor, SyncTypes},
    types::{CallId, HostType},
    world::SyncWorldRef,
    InstanceId, Value,
};

use super::{
    error::ContextError,
    instance_record::{InstanceRecord, RecordFlags},
    listener_registry::ListenerRegistry,
    name_allocator::NameAllocator,
    sync_context::{ContextId, ContextKind, SyncContext},
    sync_inst_options::SyncInstOptions,
};

/// Arena of [`SyncContext`]s forming the scope DAG, plus the state shared by
/// all of them: registered types, the listener registry and the name counters.
pub struct ContextTree {
    contexts: HashMap<ContextId, SyncContext>,
    root: ContextId,
    next_context: u32,
    listeners: ListenerRegistry,
    allocator: NameAllocator,
    types: SyncTypes,
    config: SyncConfig,
    host_type: HostType,
}

impl ContextTree {
    pub fn new(host_type: HostType, config: SyncConfig) -> Self {
        let kind = match host_type {
            HostType::Server => ContextKind::Shared,
            HostType::Client => ContextKind::Endpoint,
        };
        let root = ContextId::new(0);
        let mut contexts = HashMap::new();
        contexts.insert(root, SyncContext::new(root, &config.root_scope, kind, Vec::new()));

        Self {
            contexts,
            root,
            next_context: 1,
            listeners: ListenerRegistry::new(),
            allocator: NameAllocator::new(&config.name_separator),
            types: SyncTypes::new(),
            config,
            host_type,
        }
    }

    pub fn root(&self) -> ContextId {
        self.root
    }

    pub fn host_type(&self) -> HostType {
        self.host_type
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn types(&self) -> &SyncTypes {
        &self.types
    }

    pub(crate) fn types_mut(&mut self) -> &mut SyncTypes {
        &mut self.types
    }

    pub fn descriptor(&self, type_name: &str) -> Option<Arc<SyncDescriptor>> {
        self.types.get(type_name).cloned()
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn context(&self, id: ContextId) -> Result<&SyncContext, ContextError> {
        self.contexts
            .get(&id)
            .ok_or(ContextError::ContextNotFound { context: id })
    }

    pub(crate) fn context_mut(&mut self, id: ContextId) -> Result<&mut SyncContext, ContextError> {
        self.contexts
            .get_mut(&id)
            .ok_or(ContextError::ContextNotFound { context: id })
    }

    pub fn endpoint(&self, id: ContextId) -> Result<&SyncContext, ContextError> {
        let context = self.context(id)?;
        if !context.is_endpoint() {
            return Err(ContextError::NotAnEndpoint { context: id });
        }
        Ok(context)
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.contexts.contains_key(&id)
    }

    // Scope DAG

    /// Adds a context below `parents` (the root when empty)
    pub fn create_context(
        &mut self,
        parents: &[ContextId],
        scope_name: &str,
        kind: ContextKind,
    ) -> Result<ContextId, ContextError> {
        let parents: Vec<ContextId> = if parents.is_empty() {
            vec![self.root]
        } else {
            parents.to_vec()
        };
        for parent in &parents {
            self.context(*parent)?;
        }

        let id = ContextId::new(self.next_context);
        self.next_context += 1;
        for parent in &parents {
            self.context_mut(*parent)?.add_child(id);
        }
        self.contexts
            .insert(id, SyncContext::new(id, scope_name, kind, parents));
        debug!("created {:?} context {:?} for scope '{}'", kind, id, scope_name);
        Ok(id)
    }

    /// Removes `id` with every record it owns or inherits. Children left
    /// without a parent are destroyed too.
    pub fn destroy_context(&mut self, id: ContextId) -> Result<(), ContextError> {
        if id == self.root {
            return Err(ContextError::RootContext);
        }
        let Some(context) = self.contexts.remove(&id) else {
            return Err(ContextError::ContextNotFound { context: id });
        };

        for parent in context.parents() {
            if let Some(parent) = self.contexts.get_mut(parent) {
                parent.remove_child(&id);
            }
        }

        for record in context.records() {
            let instance = record.instance();
            if record.is_inherited() {
                if let Some(owner) = self.contexts.get_mut(&record.owner()) {
                    owner.remove_inheritor(&instance, &id);
                }
                continue;
            }
            self.listeners.detach(&instance);
            for inheritor in context.inheritors_of(&instance) {
                if let Some(inheritor) = self.contexts.get_mut(&inheritor) {
                    inheritor.remove_record(&instance);
                }
            }
        }

        let mut orphans = Vec::new();
        for child in context.children() {
            if let Some(child_context) = self.contexts.get_mut(child) {
                child_context.remove_parent(&id);
                if child_context.parents().is_empty() {
                    orphans.push(*child);
                }
            }
        }
        info!(
            "destroyed context {:?} ('{}') with {} record(s)",
            id,
            context.scope_name(),
            context.records().count()
        );
        for orphan in orphans {
            self.destroy_context(orphan)?;
        }
        Ok(())
    }

    /// `id` followed by its ancestors, nearest first
    pub fn chain(&self, id: ContextId) -> Vec<ContextId> {
        let mut output = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            let Some(context) = self.contexts.get(&next) else {
                continue;
            };
            output.push(next);
            queue.extend(context.parents().iter().copied());
        }
        output
    }

    pub fn ancestors(&self, id: ContextId) -> Vec<ContextId> {
        self.chain(id).into_iter().skip(1).collect()
    }

    pub fn descendants(&self, id: ContextId) -> Vec<ContextId> {
        let mut output = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut queue: VecDeque<ContextId> = match self.contexts.get(&id) {
            Some(context) => context.children().iter().copied().collect(),
            None => VecDeque::new(),
        };
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            let Some(context) = self.contexts.get(&next) else {
                continue;
            };
            output.push(next);
            queue.extend(context.children().iter().copied());
        }
        output
    }

    /// Nearest context in the chain of `from` with this scope name
    pub fn find_scope(&self, from: ContextId, scope_name: &str) -> Result<ContextId, ContextError> {
        self.chain(from)
            .into_iter()
            .find(|id| {
                self.contexts
                    .get(id)
                    .map(|context| context.scope_name() == scope_name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| ContextError::ScopeNotFound {
                scope: scope_name.to_string(),
            })
    }

    // Lookup

    /// Nearest context in the chain of `ctx` holding a record for `instance`
    pub fn find_holder(&self, ctx: ContextId, instance: &InstanceId) -> Option<ContextId> {
        self.chain(ctx).into_iter().find(|id| {
            self.contexts
                .get(id)
                .map(|context| context.holds(instance))
                .unwrap_or(false)
        })
    }

    pub fn record_in_chain(
        &self,
        ctx: ContextId,
        instance: &InstanceId,
    ) -> Option<&InstanceRecord> {
        let holder = self.find_holder(ctx, instance)?;
        self.contexts.get(&holder)?.record(instance)
    }

    pub fn lookup_name(&self, ctx: ContextId, name: &str) -> Option<InstanceId> {
        self.chain(ctx).into_iter().find_map(|id| {
            self.contexts
                .get(&id)
                .and_then(|context| context.lookup_name(name))
        })
    }

    /// Name of `instance` as seen from `ctx`, without naming anything
    pub fn name_of(&self, ctx: ContextId, instance: &InstanceId) -> Option<String> {
        self.record_in_chain(ctx, instance)
            .and_then(|record| record.name())
            .map(str::to_string)
    }

    pub fn is_name_taken(&self, name: &str) -> bool {
        self.contexts
            .values()
            .any(|context| context.names().is_taken(name))
    }

    fn allocate_name(&mut self, type_name: &str) -> String {
        let contexts = &self.contexts;
        self.allocator.allocate(type_name, |candidate| {
            contexts
                .values()
                .any(|context| context.names().is_taken(candidate))
        })
    }

    /// Group a property's changes are logged in
    pub fn group_for(&self, type_name: &str, property: &str) -> String {
        self.types
            .get(type_name)
            .and_then(|descriptor| descriptor.property_entry(property))
            .and_then(|entry| entry.sync_group())
            .unwrap_or(&self.config.default_group)
            .to_string()
    }

    /// Endpoint contexts that send changes of `instance`: the owner if it has a
    /// peer, otherwise every endpoint that inherited the instance
    pub(crate) fn outgoing_holders(&self, instance: &InstanceId) -> Vec<ContextId> {
        let Some(owner_id) = self.listeners.owner(instance) else {
            return Vec::new();
        };
        let Some(owner) = self.contexts.get(&owner_id) else {
            return Vec::new();
        };
        if owner.is_endpoint() {
            return vec![owner_id];
        }
        owner
            .inheritors_of(instance)
            .into_iter()
            .filter(|id| {
                self.contexts
                    .get(id)
                    .map(|context| context.is_endpoint())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Owner followed by every inheritor of `instance`
    pub(crate) fn all_holders(&self, instance: &InstanceId) -> Vec<ContextId> {
        let Some(owner_id) = self.listeners.owner(instance) else {
            return Vec::new();
        };
        let mut output = vec![owner_id];
        if let Some(owner) = self.contexts.get(&owner_id) {
            output.extend(owner.inheritors_of(instance));
        }
        output
    }

    // Registration

    /// Registers `instance` for synchronization under the scope chain of `ctx`.
    ///
    /// Returns the assigned name, or `None` when the instance is on-demand or
    /// its type has no descriptor for this manager.
    pub fn add_sync_inst(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        instance: InstanceId,
        options: &SyncInstOptions,
    ) -> Result<Option<String>, ContextError> {
        self.register(world, ctx, instance, options, false)
    }

    /// Registers `instance` as already known to the peer: no definition is
    /// sent and its current values become the baseline
    pub fn register_sync_inst(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        instance: InstanceId,
        options: &SyncInstOptions,
    ) -> Result<Option<String>, ContextError> {
        self.register(world, ctx, instance, options, true)
    }

    fn register(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        instance: InstanceId,
        options: &SyncInstOptions,
        known_to_peer: bool,
    ) -> Result<Option<String>, ContextError> {
        self.context(ctx)?;
        let Some(type_name) = world.type_name(&instance) else {
            return Err(ContextError::InstanceNotFound { instance });
        };
        let Some(descriptor) = self.descriptor(&type_name) else {
            info!(
                "{:?} of type {} has no sync descriptor; not synchronized",
                instance, type_name
            );
            return Ok(None);
        };

        let scope = options
            .scope
            .clone()
            .or_else(|| descriptor.scope().map(str::to_string));
        let target = match scope {
            Some(scope) => self.find_scope(ctx, &scope)?,
            None => ctx,
        };

        if let Some(owner) = self.listeners.owner(&instance) {
            let name = self.merge_registration(world, ctx, target, owner, instance, options)?;
            if known_to_peer {
                self.mark_known_to_peer(world, ctx, &instance);
            }
            return Ok(name);
        }

        let mut record = InstanceRecord::new(instance, &type_name, target, options.args.clone());
        record.set_flag(RecordFlags::INITIALIZED);
        if options.on_demand {
            record.set_flag(RecordFlags::ON_DEMAND);
        }
        if options.reset_state {
            record.set_flag(RecordFlags::RESET_STATE);
        }
        if options.push_initial {
            record.set_flag(RecordFlags::PUSH_INITIAL);
        }
        let rooted = world.is_rooted(&instance);
        if rooted {
            let name = match world.fixed_name(&instance) {
                Some(name) => name,
                None => self.allocate_name(&type_name),
            };
            record.set_name(&name);
            record.set_flag(RecordFlags::FIXED_NAME | RecordFlags::REGISTERED);
        } else if !options.on_demand {
            let name = self.allocate_name(&type_name);
            record.set_name(&name);
        }
        let name = record.name().map(str::to_string);

        self.context_mut(target)?.insert_record(record)?;
        self.listeners.attach(instance, target);
        self.snapshot_instance(world, target, instance, &descriptor, false)?;
        debug!(
            "registered {:?} as {:?} in {:?}",
            instance,
            name.as_deref().unwrap_or("<on demand>"),
            target
        );

        if known_to_peer {
            self.mark_known_to_peer(world, target, &instance);
            return Ok(name);
        }

        if self.context(target)?.is_endpoint() {
            if name.is_some() {
                let records = self.introduction(world, target, &instance, false);
                self.queue_records(target, records)?;
            }
            return Ok(name);
        }

        if name.is_some() {
            if descriptor.is_broadcast() {
                for descendant in self.descendants(target) {
                    if self.context(descendant)?.is_endpoint() {
                        let records = self.inherit(world, descendant, target, instance, false)?;
                        self.queue_records(descendant, records)?;
                    }
                }
            }
            if ctx != target && self.context(ctx)?.is_endpoint() {
                let records = self.inherit(world, ctx, target, instance, false)?;
                self.queue_records(ctx, records)?;
            }
        }
        Ok(name)
    }

    fn merge_registration(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        target: ContextId,
        owner: ContextId,
        instance: InstanceId,
        options: &SyncInstOptions,
    ) -> Result<Option<String>, ContextError> {
        if owner == target {
            let record = self
                .context_mut(owner)?
                .record_mut(&instance)
                .ok_or(ContextError::InstanceNotRegistered { instance })?;
            if options.reset_state {
                record.set_flag(RecordFlags::RESET_STATE);
            }
            if options.push_initial {
                record.set_flag(RecordFlags::PUSH_INITIAL);
            }
            let mut named_now = false;
            if !options.on_demand && record.has(RecordFlags::ON_DEMAND) {
                record.clear_flag(RecordFlags::ON_DEMAND);
                named_now = record.name().is_none();
            }
            let type_name = record.type_name().to_string();
            if named_now {
                let name = self.allocate_name(&type_name);
                self.context_mut(owner)?.bind_name(&instance, &name)?;
                if self.context(owner)?.is_endpoint() {
                    let records = self.introduction(world, owner, &instance, false);
                    self.queue_records(owner, records)?;
                }
            }
            let named = self.name_of(owner, &instance);
            if named.is_some() && ctx != target && self.context(ctx)?.is_endpoint() {
                let records = self.inherit(world, ctx, target, instance, false)?;
                self.queue_records(ctx, records)?;
            }
            return Ok(named);
        }

        if self.chain(target).contains(&owner) {
            if self.name_of(owner, &instance).is_none() {
                let type_name = self
                    .context(owner)?
                    .record(&instance)
                    .map(|record| record.type_name().to_string())
                    .ok_or(ContextError::InstanceNotRegistered { instance })?;
                let name = self.allocate_name(&type_name);
                self.context_mut(owner)?.bind_name(&instance, &name)?;
            }
            if self.context(target)?.is_endpoint() {
                let records = self.inherit(world, target, owner, instance, false)?;
                self.queue_records(target, records)?;
            }
            return Ok(self.name_of(target, &instance));
        }

        warn!(
            "{:?} is already registered in {:?}; keeping it over the registration from {:?}",
            instance, owner, ctx
        );
        Ok(self.name_of(owner, &instance))
    }

    fn mark_known_to_peer(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        instance: &InstanceId,
    ) {
        let Some(holder) = self.find_holder(ctx, instance) else {
            return;
        };
        let descriptor = self
            .record_in_chain(ctx, instance)
            .and_then(|record| self.descriptor(record.type_name()));
        let host_type = self.host_type;
        let Some(context) = self.contexts.get_mut(&holder) else {
            return;
        };
        for group in context.groups_mut() {
            group.forget(instance, &ChangeKey::NewInstance);
        }
        let Some(record) = context.record_mut(instance) else {
            return;
        };
        record.set_flag(RecordFlags::REGISTERED);
        record.clear_flag(RecordFlags::NAME_QUEUED);
        if let Some(descriptor) = descriptor {
            for entry in descriptor.properties() {
                if !entry.can_send(host_type) {
                    continue;
                }
                if let Some(value) = world.read_property(instance, entry.name()) {
                    record.set_previous_value(entry.name(), value);
                }
            }
        }
    }

    /// Registers an instance the peer defined; its name is already known to
    /// the peer
    pub(crate) fn register_remote_instance(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        instance: InstanceId,
        type_name: &str,
        name: &str,
        args: Vec<Value>,
    ) -> Result<(), ContextError> {
        let descriptor = self.types.try_get(type_name)?.clone();
        let mut record = InstanceRecord::new(instance, type_name, ctx, args);
        record.set_name(name);
        record.set_flag(RecordFlags::REGISTERED | RecordFlags::INITIALIZED);
        self.context_mut(ctx)?.insert_record(record)?;
        self.listeners.attach(instance, ctx);
        self.snapshot_instance(world, ctx, instance, &descriptor, true)?;
        debug!("peer defined {:?} as '{}' in {:?}", instance, name, ctx);
        Ok(())
    }

    /// Removes `instance` from its owner and every inheritor
    pub fn remove_sync_inst(
        &mut self,
        ctx: ContextId,
        instance: &InstanceId,
    ) -> Result<(), ContextError> {
        let Some(owner) = self.listeners.owner(instance) else {
            return Err(ContextError::InstanceNotRegistered {
                instance: *instance,
            });
        };
        if self.find_holder(ctx, instance).is_none() && !self.descendants(ctx).contains(&owner) {
            return Err(ContextError::InstanceNotRegistered {
                instance: *instance,
            });
        }
        self.listeners.detach(instance);
        for inheritor in self.context(owner)?.inheritors_of(instance) {
            if let Some(context) = self.contexts.get_mut(&inheritor) {
                context.remove_record(instance);
            }
        }
        self.context_mut(owner)?.remove_record(instance);
        debug!("removed {:?} from {:?}", instance, owner);
        Ok(())
    }

    /// Records the instance's definition and current values in the owner's
    /// initial log
    fn snapshot_instance(
        &mut self,
        world: &dyn SyncWorldRef,
        owner: ContextId,
        instance: InstanceId,
        descriptor: &SyncDescriptor,
        remote_origin: bool,
    ) -> Result<(), ContextError> {
        let args = self
            .context(owner)?
            .record(&instance)
            .map(|record| record.args().to_vec())
            .unwrap_or_default();
        let mut values = Vec::new();
        for entry in descriptor.properties() {
            if entry.has(PropertyFlags::STATIC) {
                continue;
            }
            if let Some(value) = world.read_property(&instance, entry.name()) {
                values.push((entry.name().to_string(), value));
            }
        }

        let log = self.context_mut(owner)?.initial_log_mut();
        log.add_record(ChangeRecord::NewInstance {
            instance,
            type_name: descriptor.type_name().to_string(),
            args,
            remote_origin,
        });
        for (property, value) in values {
            log.record_value(instance, &property, value, remote_origin);
        }
        log.compact();
        Ok(())
    }

    // Inheritance and naming

    /// Definition of `instance` for the peer of `ctx`: the new-instance record
    /// followed by the properties that go out with it
    pub(crate) fn introduction(
        &self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        instance: &InstanceId,
        all_values: bool,
    ) -> Vec<ChangeRecord> {
        let Some(record) = self.record_in_chain(ctx, instance) else {
            return Vec::new();
        };
        let mut output = Vec::new();
        if !record.has(RecordFlags::FIXED_NAME) {
            output.push(ChangeRecord::NewInstance {
                instance: *instance,
                type_name: record.type_name().to_string(),
                args: record.args().to_vec(),
                remote_origin: false,
            });
        }
        let Some(descriptor) = self.types.get(record.type_name()) else {
            return output;
        };
        let push_all = all_values || record.has(RecordFlags::PUSH_INITIAL);
        for entry in descriptor.properties() {
            if entry.has(PropertyFlags::ON_DEMAND) && !record.is_fetched(entry.name()) {
                continue;
            }
            if !entry.can_send(self.host_type) {
                continue;
            }
            if !push_all && !entry.has(PropertyFlags::PUSH_INITIAL) {
                continue;
            }
            let Some(value) = world.read_property(instance, entry.name()) else {
                continue;
            };
            if !entry.differs_from_default(&value) {
                continue;
            }
            output.push(ChangeRecord::PropertyChange {
                instance: *instance,
                property: entry.name().to_string(),
                value,
                remote_origin: false,
            });
        }
        output
    }

    /// Gives `ctx` an inherited copy of the record held by `source`.
    ///
    /// Returns the records introducing the instance to the peer of `ctx`;
    /// empty when that peer already knows it.
    pub(crate) fn inherit(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        source: ContextId,
        instance: InstanceId,
        peer_knows: bool,
    ) -> Result<Vec<ChangeRecord>, ContextError> {
        if ctx == source || self.context(ctx)?.holds(&instance) {
            return Ok(Vec::new());
        }
        let source_record = self
            .context(source)?
            .record(&instance)
            .ok_or(ContextError::InstanceNotRegistered { instance })?;
        let owner = source_record.owner();
        let mut inherited = source_record.inherit();
        let shares_peer = self.context(owner)?.is_endpoint() && self.chain(ctx).contains(&owner);
        if shares_peer {
            if source_record.is_registered() {
                inherited.set_flag(RecordFlags::REGISTERED);
            }
            if source_record.has(RecordFlags::NAME_QUEUED) {
                inherited.set_flag(RecordFlags::NAME_QUEUED);
            }
        }
        if peer_knows {
            inherited.set_flag(RecordFlags::REGISTERED);
        }
        let named = inherited.name().is_some();

        self.context_mut(ctx)?.insert_record(inherited)?;
        self.context_mut(owner)?.add_inheritor(instance, ctx);
        debug!("{:?} inherited {:?} from {:?}", ctx, instance, owner);

        if peer_knows || shares_peer || !named || !self.context(ctx)?.is_endpoint() {
            return Ok(Vec::new());
        }
        Ok(self.introduction(world, ctx, &instance, true))
    }

    /// Finds or assigns the name `instance` is known by from `ctx`.
    ///
    /// Looks in `ctx`, then in every ancestor (inheriting the record), then
    /// names rooted instances from their structure. Otherwise, when `create`
    /// is set, the instance is registered as a newly discovered on-demand
    /// instance and the records defining it are appended to `dependencies`.
    /// References to types without a descriptor resolve to `None` and leave a
    /// diagnostic on `ctx`.
    pub fn resolve_name(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        instance: &InstanceId,
        create: bool,
        dependencies: &mut Vec<ChangeRecord>,
    ) -> Result<Option<String>, ContextError> {
        if let Some(record) = self.context(ctx)?.record(instance) {
            if let Some(name) = record.name() {
                return Ok(Some(name.to_string()));
            }
            if !create {
                return Ok(None);
            }
            let type_name = record.type_name().to_string();
            let name = self.allocate_name(&type_name);
            self.context_mut(ctx)?.bind_name(instance, &name)?;
            if self.context(ctx)?.is_endpoint() {
                dependencies.extend(self.introduction(world, ctx, instance, false));
            }
            return Ok(Some(name));
        }

        for ancestor in self.ancestors(ctx) {
            let Some(record) = self.context(ancestor)?.record(instance) else {
                continue;
            };
            let type_name = record.type_name().to_string();
            let named = record.name().is_some();
            if !named {
                if !create {
                    return Ok(None);
                }
                let name = self.allocate_name(&type_name);
                self.context_mut(ancestor)?.bind_name(instance, &name)?;
                if self.context(ancestor)?.is_endpoint() {
                    dependencies.extend(self.introduction(world, ancestor, instance, false));
                    if let Some(record) = self.context_mut(ancestor)?.record_mut(instance) {
                        record.set_flag(RecordFlags::NAME_QUEUED);
                    }
                }
            }
            let records = self.inherit(world, ctx, ancestor, *instance, false)?;
            dependencies.extend(records);
            return Ok(self.name_of(ctx, instance));
        }

        let Some(type_name) = world.type_name(instance) else {
            self.context_mut(ctx)?
                .add_diagnostic(format!("reference to unknown {:?} left null", instance));
            return Ok(None);
        };
        let Some(descriptor) = self.descriptor(&type_name) else {
            warn!(
                "unresolved reference to {:?} of unsynchronized type {}; sending null",
                instance, type_name
            );
            self.context_mut(ctx)?.add_diagnostic(format!(
                "unresolved reference to {:?} of type {}",
                instance, type_name
            ));
            return Ok(None);
        };

        if let Some(owner) = self.listeners.owner(instance) {
            warn!(
                "{:?} is registered in {:?} outside the scope chain of {:?}; sharing it",
                instance, owner, ctx
            );
            if self.name_of(owner, instance).is_none() {
                return Ok(None);
            }
            dependencies.extend(self.inherit(world, ctx, owner, *instance, false)?);
            return Ok(self.name_of(ctx, instance));
        }

        let rooted = world.is_rooted(instance);
        if !rooted && !create {
            return Ok(None);
        }

        let target = descriptor
            .scope()
            .and_then(|scope| self.find_scope(ctx, scope).ok())
            .filter(|target| {
                *target == ctx
                    || self
                        .contexts
                        .get(target)
                        .map(|context| !context.is_endpoint())
                        .unwrap_or(false)
            })
            .unwrap_or(ctx);

        let mut record = InstanceRecord::new(*instance, &type_name, target, Vec::new());
        record.set_flag(RecordFlags::INITIALIZED);
        let name = match (rooted, world.fixed_name(instance)) {
            (true, Some(fixed)) => fixed,
            _ => self.allocate_name(&type_name),
        };
        record.set_name(&name);
        if rooted {
            record.set_flag(RecordFlags::FIXED_NAME | RecordFlags::REGISTERED);
        } else {
            record.set_flag(RecordFlags::ON_DEMAND);
        }
        self.context_mut(target)?.insert_record(record)?;
        self.listeners.attach(*instance, target);
        self.snapshot_instance(world, target, *instance, &descriptor, false)?;
        debug!("discovered {:?} as '{}' while resolving from {:?}", instance, name, ctx);

        if rooted {
            if target != ctx {
                self.inherit(world, ctx, target, *instance, true)?;
            }
            return Ok(Some(name));
        }
        if target == ctx {
            if self.context(ctx)?.is_endpoint() {
                dependencies.extend(self.introduction(world, ctx, instance, false));
            }
        } else {
            dependencies.extend(self.inherit(world, ctx, target, *instance, false)?);
        }
        Ok(Some(name))
    }

    /// Introduces broadcast instances owned by shared ancestors that `ctx`
    /// does not hold yet
    pub fn import_broadcast(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
    ) -> Result<(), ContextError> {
        if !self.context(ctx)?.is_endpoint() {
            return Ok(());
        }
        let mut pending = Vec::new();
        for ancestor in self.ancestors(ctx).into_iter().rev() {
            let context = self.context(ancestor)?;
            if context.is_endpoint() {
                continue;
            }
            let mut owned: Vec<&InstanceRecord> = context
                .owned_records()
                .filter(|record| record.name().is_some())
                .collect();
            owned.sort_by_key(|record| record.instance());
            for record in owned {
                let broadcast = self
                    .types
                    .get(record.type_name())
                    .map(|descriptor| descriptor.is_broadcast())
                    .unwrap_or(false);
                if broadcast {
                    pending.push((ancestor, record.instance()));
                }
            }
        }
        for (ancestor, instance) in pending {
            if self.context(ctx)?.holds(&instance) {
                continue;
            }
            let records = self.inherit(world, ctx, ancestor, instance, false)?;
            self.queue_records(ctx, records)?;
        }
        Ok(())
    }

    // Queuing

    /// Appends records to the default group of `ctx`
    pub(crate) fn queue_records(
        &mut self,
        ctx: ContextId,
        records: Vec<ChangeRecord>,
    ) -> Result<(), ContextError> {
        if records.is_empty() {
            return Ok(());
        }
        let group = self.config.default_group.clone();
        let context = self.context_mut(ctx)?;
        let log = context.group_mut(&group).active_mut();
        for record in records {
            log.add_record(record);
        }
        context.mark_needs_sync();
        Ok(())
    }

    pub(crate) fn queue_call(
        &mut self,
        ctx: ContextId,
        target: MethodTarget,
        method: &str,
        args: Vec<Value>,
        call_id: CallId,
        pending: PendingResult,
    ) -> Result<(), ContextError> {
        self.endpoint(ctx)?;
        let group = self.config.default_group.clone();
        let context = self.context_mut(ctx)?;
        context.group_mut(&group).active_mut().add_call(
            ChangeRecord::MethodCall {
                target,
                method: method.to_string(),
                args,
                call_id,
            },
            pending,
        );
        context.mark_needs_sync();
        Ok(())
    }

    pub(crate) fn mark_name_queued(&mut self, ctx: ContextId, instance: &InstanceId) {
        if let Some(record) = self
            .contexts
            .get_mut(&ctx)
            .and_then(|context| context.record_mut(instance))
        {
            if !record.is_registered() {
                record.set_flag(RecordFlags::NAME_QUEUED);
            }
        }
    }

    // Rename

    /// Starts a rename exchange for `instance`. Both names resolve until the
    /// peer acknowledges.
    pub fn rename(
        &mut self,
        ctx: ContextId,
        instance: &InstanceId,
        new_name: &str,
    ) -> Result<(), ContextError> {
        if self.find_holder(ctx, instance).is_none() {
            return Err(ContextError::InstanceNotRegistered {
                instance: *instance,
            });
        }
        self.rename_everywhere(instance, new_name, None)
    }

    /// Applies a rename the peer started and queues the acknowledgement
    pub(crate) fn apply_peer_rename(
        &mut self,
        origin: ContextId,
        old_name: &str,
        new_name: &str,
    ) -> Result<InstanceId, ContextError> {
        let Some(instance) = self.lookup_name(origin, old_name) else {
            return Err(ContextError::UnknownName {
                name: old_name.to_string(),
            });
        };
        self.rename_everywhere(&instance, new_name, Some(origin))?;
        self.queue_records(
            origin,
            vec![ChangeRecord::Rename {
                instance,
                old_name: old_name.to_string(),
                new_name: new_name.to_string(),
                is_ack: true,
            }],
        )?;
        Ok(instance)
    }

    fn rename_everywhere(
        &mut self,
        instance: &InstanceId,
        new_name: &str,
        origin: Option<ContextId>,
    ) -> Result<(), ContextError> {
        let Some(owner) = self.listeners.owner(instance) else {
            return Err(ContextError::InstanceNotRegistered {
                instance: *instance,
            });
        };
        let owner_record = self
            .context(owner)?
            .record(instance)
            .ok_or(ContextError::InstanceNotRegistered {
                instance: *instance,
            })?;
        let Some(old_name) = owner_record.name().map(str::to_string) else {
            return Err(ContextError::InstanceNotNamed {
                instance: *instance,
            });
        };
        if owner_record.has(RecordFlags::FIXED_NAME) {
            return Err(ContextError::FixedName { name: old_name });
        }
        if self.is_name_taken(new_name) {
            return Err(ContextError::NameInUse {
                name: new_name.to_string(),
            });
        }

        let outgoing = self.outgoing_holders(instance);
        for holder in self.all_holders(instance) {
            let Some(context) = self.contexts.get_mut(&holder) else {
                continue;
            };
            let Some(record) = context.record(instance) else {
                continue;
            };
            let await_ack = Some(holder) != origin
                && outgoing.contains(&holder)
                && (record.is_registered() || record.has(RecordFlags::NAME_QUEUED));
            context.names_mut().try_insert(new_name, *instance)?;
            if let Some(record) = context.record_mut(instance) {
                record.rename(new_name, await_ack);
            }
            if await_ack {
                context.group_mut(&self.config.default_group).active_mut().add_record(
                    ChangeRecord::Rename {
                        instance: *instance,
                        old_name: old_name.clone(),
                        new_name: new_name.to_string(),
                        is_ack: false,
                    },
                );
                context.mark_needs_sync();
            } else {
                context.names_mut().release(&old_name);
            }
        }
        info!("renamed {:?} from '{}' to '{}'", instance, old_name, new_name);
        Ok(())
    }

    /// The peer acknowledged a rename: the old name stops resolving
    pub(crate) fn finish_rename(
        &mut self,
        ctx: ContextId,
        instance: &InstanceId,
    ) -> Result<(), ContextError> {
        let context = self.context_mut(ctx)?;
        let old_name = context
            .record_mut(instance)
            .and_then(|record| record.finish_rename());
        if let Some(old_name) = old_name {
            context.names_mut().release(&old_name);
        }
        Ok(())
    }

    // Fetch and reset state

    /// Asks the peer of `ctx` for the current value of an on-demand property
    pub fn fetch_property(
        &mut self,
        ctx: ContextId,
        instance: &InstanceId,
        property: &str,
    ) -> Result<(), ContextError> {
        self.endpoint(ctx)?;
        let Some(record) = self.record_in_chain(ctx, instance) else {
            return Err(ContextError::InstanceNotRegistered {
                instance: *instance,
            });
        };
        let group = self.group_for(record.type_name(), property);
        let context = self.context_mut(ctx)?;
        context.group_mut(&group).active_mut().add_record(ChangeRecord::FetchRequest {
            instance: *instance,
            property: property.to_string(),
        });
        context.mark_needs_sync();
        Ok(())
    }

    /// Peer asked for a property: it is sent from now on, starting with its
    /// current value
    pub(crate) fn serve_fetch(
        &mut self,
        world: &dyn SyncWorldRef,
        origin: ContextId,
        instance: &InstanceId,
        property: &str,
    ) -> Result<(), ContextError> {
        if !self.context(origin)?.holds(instance) {
            let Some(holder) = self.find_holder(origin, instance) else {
                return Err(ContextError::InstanceNotRegistered {
                    instance: *instance,
                });
            };
            self.inherit(world, origin, holder, *instance, true)?;
        }
        if let Some(record) = self.context_mut(origin)?.record_mut(instance) {
            record.mark_fetched(property);
        }
        if let Some(value) = world.read_property(instance, property) {
            self.record_outgoing(origin, instance, property, value, false, true);
        }
        Ok(())
    }

    /// Drops the reset-state flag of `instance` everywhere; queues the notice
    /// for the peer of `ctx` when `notify_peer` is set
    pub fn clear_reset_state(
        &mut self,
        ctx: ContextId,
        instance: &InstanceId,
        notify_peer: bool,
    ) -> Result<(), ContextError> {
        if self.find_holder(ctx, instance).is_none() {
            return Err(ContextError::InstanceNotRegistered {
                instance: *instance,
            });
        }
        for holder in self.all_holders(instance) {
            if let Some(record) = self
                .contexts
                .get_mut(&holder)
                .and_then(|context| context.record_mut(instance))
            {
                record.clear_flag(RecordFlags::RESET_STATE);
            }
        }
        if notify_peer {
            self.endpoint(ctx)?;
            self.queue_records(
                ctx,
                vec![ChangeRecord::ClearResetState {
                    instance: *instance,
                }],
            )?;
        }
        Ok(())
    }

    // Initial sync

    /// Full state of everything visible from `ctx`, outermost scope first.
    ///
    /// With `reset` set only reset-state properties of reset-state records are
    /// included, and no definitions.
    pub fn initial_snapshot(&self, ctx: ContextId, reset: bool) -> Result<ChangeLog, ContextError> {
        let target = self.endpoint(ctx)?;
        let mut output = ChangeLog::new();
        for id in self.chain(ctx).into_iter().rev() {
            let context = self.context(id)?;
            for record in context.initial_log().live_records() {
                let Some(instance) = record.instance() else {
                    continue;
                };
                let visible =
                    target.holds(&instance) || (context.is_endpoint() && context.owns(&instance));
                if !visible {
                    continue;
                }
                let Some(held) = self.record_in_chain(ctx, &instance) else {
                    continue;
                };
                match record {
                    ChangeRecord::NewInstance { .. } => {
                        if reset || held.has(RecordFlags::FIXED_NAME) || held.name().is_none() {
                            continue;
                        }
                        output.add_record(record.clone());
                    }
                    ChangeRecord::PropertyChange {
                        property, value, ..
                    } => {
                        if held.name().is_none() {
                            continue;
                        }
                        let Some(entry) = self
                            .types
                            .get(held.type_name())
                            .and_then(|descriptor| descriptor.property_entry(property))
                        else {
                            continue;
                        };
                        if !entry.can_send(self.host_type) {
                            continue;
                        }
                        if entry.has(PropertyFlags::ON_DEMAND) && !held.is_fetched(property) {
                            continue;
                        }
                        if reset {
                            if !held.has(RecordFlags::RESET_STATE)
                                || !entry.has(PropertyFlags::RESET_STATE)
                            {
                                continue;
                            }
                        } else if !entry.differs_from_default(value) {
                            continue;
                        }
                        output.add_record(ChangeRecord::PropertyChange {
                            instance,
                            property: property.clone(),
                            value: value.clone(),
                            remote_origin: false,
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(output)
    }

    /// The peer holds the snapshot now: its records are registered, its values
    /// are the baseline, and changes it already contains are not resent
    pub(crate) fn accept_snapshot(
        &mut self,
        ctx: ContextId,
        snapshot: ChangeLog,
        reset: bool,
    ) -> Result<(), ContextError> {
        let context = self.context_mut(ctx)?;
        context.commit(snapshot);
        if !reset {
            for group in context.groups_mut() {
                group.clear_active();
            }
        }
        Ok(())
    }

    /// Restores the instance from its snapshot taken at first divergence and
    /// drops its unsent records. Returns the values to write back.
    pub(crate) fn take_local_changes(
        &mut self,
        ctx: ContextId,
        instance: &InstanceId,
    ) -> Result<HashMap<String, Value>, ContextError> {
        let Some(holder) = self.find_holder(ctx, instance) else {
            return Err(ContextError::InstanceNotRegistered {
                instance: *instance,
            });
        };
        let context = self.context_mut(holder)?;
        let restored = context
            .record_mut(instance)
            .and_then(|record| record.take_initial_values())
            .unwrap_or_default();
        for group in context.groups_mut() {
            group.active_mut().drop_instance(instance);
        }
        Ok(restored)
    }
}
