use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use crate::{
    change::{ChangeKey, ChangeLog, ChangeRecord, MethodOutcome, MethodTarget},
    context::{ContextError, ContextId, ContextTree, RecordFlags},
    wire::{SyncBatch, SyncCommand, WireOutcome},
    world::SyncWorldRef,
    InstanceId,
};

use super::{
    path_stack::{name_segments, PathStack},
    value_writer::ValueWriter,
};

/// Turns change logs of one endpoint context into an ordered command batch.
///
/// Every instance a record depends on is defined before the record: a later
/// definition already in the log is hoisted, and instances nobody defined yet
/// are resolved and their definitions spliced in immediately before.
pub struct BatchWriter {
    ctx: ContextId,
    fresh_peer: bool,
    path: PathStack,
    defined: HashSet<InstanceId>,
    hoisted: HashSet<InstanceId>,
    aliases: HashMap<InstanceId, String>,
    commands: Vec<SyncCommand>,
}

impl BatchWriter {
    pub fn new(ctx: ContextId) -> Self {
        Self {
            ctx,
            fresh_peer: false,
            path: PathStack::new(),
            defined: HashSet::new(),
            hoisted: HashSet::new(),
            aliases: HashMap::new(),
            commands: Vec::new(),
        }
    }

    /// Writer for a peer that holds nothing yet, so registration flags say
    /// nothing about what it knows
    pub fn for_fresh_peer(ctx: ContextId) -> Self {
        let mut writer = Self::new(ctx);
        writer.fresh_peer = true;
        writer
    }

    pub fn push(&mut self, command: SyncCommand) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Writes every live record of `log` in order. Definitions spliced in
    /// for dependencies stay in `log`, so they commit with it.
    pub fn write_log(
        &mut self,
        tree: &mut ContextTree,
        world: &dyn SyncWorldRef,
        log: &mut ChangeLog,
    ) -> Result<(), ContextError> {
        for record in log.live_records() {
            if let ChangeRecord::Rename {
                instance,
                old_name,
                is_ack: false,
                ..
            } = record
            {
                self.aliases.insert(*instance, old_name.clone());
            }
        }

        let mut position = 0;
        while position < log.len() {
            let Some(record) = log.get(position).cloned() else {
                position += 1;
                continue;
            };
            if self.splice_dependencies(tree, world, log, position, &record)? {
                continue;
            }
            self.write_record(tree, &record);
            position += 1;
        }
        Ok(())
    }

    /// Closes every open object and hands out the batch
    pub fn finish(mut self) -> SyncBatch {
        self.path.close_all(&mut self.commands);
        SyncBatch::from_commands(self.commands)
    }

    fn dependencies_of(record: &ChangeRecord) -> Vec<InstanceId> {
        let mut output = Vec::new();
        match record {
            ChangeRecord::PropertyChange { instance, .. } => output.push(*instance),
            ChangeRecord::MethodCall {
                target: MethodTarget::Instance(instance),
                ..
            } => output.push(*instance),
            _ => {}
        }
        for instance in record.referenced_instances() {
            if !output.contains(&instance) {
                output.push(instance);
            }
        }
        output
    }

    fn is_known(&self, tree: &ContextTree, instance: &InstanceId) -> bool {
        if self.defined.contains(instance) {
            return true;
        }
        let Some(record) = tree
            .context(self.ctx)
            .ok()
            .and_then(|context| context.record(instance))
        else {
            return false;
        };
        record.has(RecordFlags::FIXED_NAME) || (!self.fresh_peer && record.is_known_to_peer())
    }

    /// Returns whether the log changed at `position` and must be re-read
    fn splice_dependencies(
        &mut self,
        tree: &mut ContextTree,
        world: &dyn SyncWorldRef,
        log: &mut ChangeLog,
        position: usize,
        record: &ChangeRecord,
    ) -> Result<bool, ContextError> {
        for instance in Self::dependencies_of(record) {
            if self.is_known(tree, &instance) {
                continue;
            }
            if let Some(definition) = log.live_position(&instance, &ChangeKey::NewInstance) {
                if definition > position && self.hoisted.insert(instance) {
                    if let Some(hoisted) = log.remove_live(&instance, &ChangeKey::NewInstance) {
                        debug!("hoisting definition of {:?} ahead of its first use", instance);
                        log.splice_before(position, vec![hoisted]);
                        return Ok(true);
                    }
                }
                continue;
            }
            let mut dependencies = Vec::new();
            tree.resolve_name(world, self.ctx, &instance, true, &mut dependencies)?;
            if !dependencies.is_empty() {
                debug!(
                    "splicing {} record(s) defining {:?} before position {}",
                    dependencies.len(),
                    instance,
                    position
                );
                log.splice_before(position, dependencies);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Package and path segments `instance` is addressed by
    fn address(&self, tree: &ContextTree, instance: &InstanceId) -> Option<(String, Vec<String>)> {
        let name = ValueWriter::new(tree, self.ctx, &self.aliases).name_of(instance)?;
        let package = tree
            .record_in_chain(self.ctx, instance)
            .map(|record| Self::package_of(tree, record.type_name()))
            .unwrap_or_default();
        Some((package, name_segments(&name)))
    }

    fn package_of(tree: &ContextTree, type_name: &str) -> String {
        tree.types()
            .get(type_name)
            .and_then(|descriptor| descriptor.package_name())
            .unwrap_or_default()
            .to_string()
    }

    fn write_record(&mut self, tree: &mut ContextTree, record: &ChangeRecord) {
        let values = ValueWriter::new(tree, self.ctx, &self.aliases);
        match record {
            ChangeRecord::NewInstance {
                instance,
                type_name,
                args,
                ..
            } => {
                let Some((package, segments)) = self.address(tree, instance) else {
                    warn!("{:?} has no name in {:?}; definition dropped", instance, self.ctx);
                    return;
                };
                let args = values.write_all(args);
                self.path
                    .define(&package, &segments, type_name, args, &mut self.commands);
                self.defined.insert(*instance);
                tree.mark_name_queued(self.ctx, instance);
            }
            ChangeRecord::PropertyChange {
                instance,
                property,
                value,
                ..
            } => {
                let Some((package, segments)) = self.address(tree, instance) else {
                    warn!(
                        "{:?} has no name in {:?}; change to '{}' dropped",
                        instance, self.ctx, property
                    );
                    return;
                };
                let value = values.write(value);
                self.path.move_to(&package, &segments, &mut self.commands);
                self.commands.push(SyncCommand::set_property(property, value));
            }
            ChangeRecord::MethodCall {
                target,
                method,
                args,
                call_id,
            } => {
                let address = match target {
                    MethodTarget::Instance(instance) => self.address(tree, instance),
                    MethodTarget::Type(type_name) => {
                        Some((Self::package_of(tree, type_name), vec![type_name.clone()]))
                    }
                };
                let Some((package, segments)) = address else {
                    warn!("target of call {} has no name in {:?}; call dropped", call_id, self.ctx);
                    return;
                };
                let command = SyncCommand::MethodCall {
                    method: method.clone(),
                    param_signature: ValueWriter::param_signature(args),
                    call_id: *call_id,
                    args: values.write_all(args),
                };
                self.path.move_to(&package, &segments, &mut self.commands);
                self.commands.push(command);
            }
            ChangeRecord::MethodResult {
                call_id,
                outcome,
                return_type,
            } => {
                let outcome = match outcome {
                    MethodOutcome::Value(value) => WireOutcome::Value(values.write(value)),
                    MethodOutcome::Exception(message) => WireOutcome::Exception(message.clone()),
                };
                self.path.close_all(&mut self.commands);
                self.commands.push(SyncCommand::MethodResult {
                    outcome,
                    call_id: *call_id,
                    return_type: return_type.clone(),
                });
            }
            ChangeRecord::FetchRequest { instance, property } => {
                let Some((package, segments)) = self.address(tree, instance) else {
                    return;
                };
                self.path.move_to(&package, &segments, &mut self.commands);
                self.commands.push(SyncCommand::FetchRequest {
                    property: property.clone(),
                });
            }
            ChangeRecord::Rename {
                instance,
                old_name,
                new_name,
                is_ack,
            } => {
                self.path.close_all(&mut self.commands);
                self.commands.push(SyncCommand::Rename {
                    old_name: old_name.clone(),
                    new_name: new_name.clone(),
                    ack: *is_ack,
                });
                self.aliases.remove(instance);
            }
            ChangeRecord::ClearResetState { instance } => {
                let Some(name) = values.name_of(instance) else {
                    return;
                };
                self.path.close_all(&mut self.commands);
                self.commands.push(SyncCommand::ClearResetState { name });
            }
        }
    }
}
