use log::{debug, warn};

use crate::{
    change::{ChangeRecord, MethodOutcome, MethodTarget},
    context::{ContextError, ContextId, ContextTree, SyncInstOptions},
    descriptor::PropertyFlags,
    mode::SyncOperation,
    types::CallId,
    wire::{SyncBatch, SyncCommand, WireOutcome},
    world::SyncWorldMut,
    InstanceId, Value, WireValue,
};

use super::{error::ReceiveError, receive_report::ReceiveReport, value_reader::read_value};

/// What an open `EnterObject` resolved to
enum ScopeEntry {
    Instance {
        segment: String,
        instance: InstanceId,
        /// Defined by this batch, so constants may still be written
        created: bool,
    },
    Type {
        segment: String,
        type_name: String,
    },
    /// Intermediate segment of a dotted name
    Path { segment: String },
    /// Inside a rejected top-level command
    Skipped,
}

impl ScopeEntry {
    fn segment(&self) -> Option<&str> {
        match self {
            ScopeEntry::Instance { segment, .. }
            | ScopeEntry::Type { segment, .. }
            | ScopeEntry::Path { segment } => Some(segment),
            ScopeEntry::Skipped => None,
        }
    }
}

/// Applies an inbound batch to the world on behalf of endpoint `ctx`.
///
/// Each top-level command (a single command, or an `EnterObject` up to its
/// matching `ExitObject`) is applied on its own: an error rejects the rest of
/// that command only. Changes are applied in peer mode, so they move the
/// baseline of `ctx` and are forwarded to the other endpoints holding the
/// same instances.
pub struct BatchReader<'a> {
    tree: &'a mut ContextTree,
    ctx: ContextId,
    op: SyncOperation,
    package: String,
    stack: Vec<ScopeEntry>,
    failed: bool,
    report: ReceiveReport,
}

impl<'a> BatchReader<'a> {
    pub fn new(tree: &'a mut ContextTree, ctx: ContextId) -> Self {
        Self {
            tree,
            ctx,
            op: SyncOperation::applying_peer_changes(),
            package: String::new(),
            stack: Vec::new(),
            failed: false,
            report: ReceiveReport::default(),
        }
    }

    pub fn read<W: SyncWorldMut>(mut self, world: &mut W, batch: &SyncBatch) -> ReceiveReport {
        for command in batch.commands() {
            self.read_command(world, command);
        }
        if !self.stack.is_empty() {
            warn!("batch ended with {} object(s) still open", self.stack.len());
        }
        self.report.needs_reset = self.report.errors.len() >= self.tree.config().max_inbound_errors;
        self.report
    }

    fn read_command<W: SyncWorldMut>(&mut self, world: &mut W, command: &SyncCommand) {
        if self.failed {
            match command {
                SyncCommand::EnterObject { .. } => self.stack.push(ScopeEntry::Skipped),
                SyncCommand::ExitObject => {
                    self.stack.pop();
                }
                SyncCommand::SetPackage { .. } => self.stack.clear(),
                _ => {}
            }
            if self.stack.is_empty() {
                self.failed = false;
            }
            return;
        }

        match self.apply(world, command) {
            Ok(()) => self.report.applied += 1,
            Err(error) => {
                warn!("rejected inbound command in {:?} ({}): {}", self.ctx, self.package, error);
                if matches!(command, SyncCommand::EnterObject { .. }) {
                    self.stack.push(ScopeEntry::Skipped);
                }
                self.failed = !self.stack.is_empty();
                self.report.errors.push(error);
            }
        }
        self.tree.process_operation(&mut self.op, Some(self.ctx));
    }

    fn apply<W: SyncWorldMut>(
        &mut self,
        world: &mut W,
        command: &SyncCommand,
    ) -> Result<(), ReceiveError> {
        match command {
            SyncCommand::SetPackage { name } => {
                if !self.stack.is_empty() {
                    debug!("package switch closes {} open object(s)", self.stack.len());
                    self.stack.clear();
                }
                self.package = name.clone();
                Ok(())
            }
            SyncCommand::EnterObject {
                name,
                type_name: Some(type_name),
                args,
            } => self.define(world, name, type_name, args.as_deref().unwrap_or(&[])),
            SyncCommand::EnterObject {
                name,
                type_name: None,
                ..
            } => self.enter(world, name),
            SyncCommand::ExitObject => self
                .stack
                .pop()
                .map(|_| ())
                .ok_or(ReceiveError::UnbalancedExit),
            SyncCommand::SetProperty { name, value } => self.set_property(world, name, value),
            SyncCommand::MethodCall {
                method,
                call_id,
                args,
                ..
            } => self.call(world, method, *call_id, args),
            SyncCommand::MethodResult {
                outcome, call_id, ..
            } => self.resolve_result(outcome, *call_id),
            SyncCommand::FetchRequest { property } => {
                let (instance, _) = self.current_instance("fetch_request")?;
                self.tree.serve_fetch(&*world, self.ctx, &instance, property)?;
                Ok(())
            }
            SyncCommand::SetMode { mode } => {
                self.op.set_mode(mode.inbound_counterpart());
                Ok(())
            }
            SyncCommand::Rename {
                old_name,
                new_name,
                ack: true,
            } => {
                let instance = self.lookup(new_name)?;
                debug!("peer acknowledged rename of '{}' to '{}'", old_name, new_name);
                self.tree.finish_rename(self.ctx, &instance)?;
                Ok(())
            }
            SyncCommand::Rename {
                old_name,
                new_name,
                ack: false,
            } => {
                self.tree.apply_peer_rename(self.ctx, old_name, new_name)?;
                Ok(())
            }
            SyncCommand::ClearResetState { name } => {
                let instance = self.lookup(name)?;
                self.tree.clear_reset_state(self.ctx, &instance, false)?;
                Ok(())
            }
        }
    }

    /// Dotted name of `segment` under the open path
    fn full_name(&self, segment: &str) -> String {
        let mut parts: Vec<&str> = self.stack.iter().filter_map(|entry| entry.segment()).collect();
        parts.push(segment);
        parts.join(".")
    }

    fn lookup(&self, name: &str) -> Result<InstanceId, ReceiveError> {
        self.tree
            .lookup_name(self.ctx, name)
            .ok_or_else(|| ReceiveError::UnknownName {
                name: name.to_string(),
            })
    }

    fn current_instance(&self, command: &'static str) -> Result<(InstanceId, bool), ReceiveError> {
        match self.stack.last() {
            Some(ScopeEntry::Instance {
                instance, created, ..
            }) => Ok((*instance, *created)),
            Some(ScopeEntry::Path { segment }) => Err(ReceiveError::UnknownName {
                name: self.full_name(segment),
            }),
            _ => Err(ReceiveError::NoTarget { command }),
        }
    }

    fn read_values(&self, values: &[WireValue]) -> Result<Vec<Value>, ReceiveError> {
        values
            .iter()
            .map(|value| read_value(self.tree, self.ctx, value))
            .collect()
    }

    fn define<W: SyncWorldMut>(
        &mut self,
        world: &mut W,
        segment: &str,
        type_name: &str,
        args: &[WireValue],
    ) -> Result<(), ReceiveError> {
        let name = self.full_name(segment);
        if let Some(instance) = self.tree.lookup_name(self.ctx, &name) {
            debug!("'{}' is already defined; entering it", name);
            self.stack.push(ScopeEntry::Instance {
                segment: segment.to_string(),
                instance,
                created: false,
            });
            return Ok(());
        }
        let Some(descriptor) = self.tree.descriptor(type_name) else {
            return Err(ReceiveError::UnknownType {
                type_name: type_name.to_string(),
            });
        };
        if !descriptor.allows_create() {
            return Err(ReceiveError::NotCreatable {
                type_name: type_name.to_string(),
            });
        }
        let args = self.read_values(args)?;
        let instance = world.create_instance(&mut self.op, type_name, &args)?;
        self.tree
            .register_remote_instance(&*world, self.ctx, instance, type_name, &name, args)?;
        self.stack.push(ScopeEntry::Instance {
            segment: segment.to_string(),
            instance,
            created: true,
        });
        Ok(())
    }

    fn enter<W: SyncWorldMut>(&mut self, world: &mut W, segment: &str) -> Result<(), ReceiveError> {
        let name = self.full_name(segment);
        let entry = if let Some(instance) = self.tree.lookup_name(self.ctx, &name) {
            ScopeEntry::Instance {
                segment: segment.to_string(),
                instance,
                created: false,
            }
        } else if let Some(instance) = world.find_rooted(&name) {
            self.tree
                .register_sync_inst(&*world, self.ctx, instance, &SyncInstOptions::new())?;
            ScopeEntry::Instance {
                segment: segment.to_string(),
                instance,
                created: false,
            }
        } else if self.tree.types().contains(&name) {
            ScopeEntry::Type {
                segment: segment.to_string(),
                type_name: name,
            }
        } else {
            ScopeEntry::Path {
                segment: segment.to_string(),
            }
        };
        self.stack.push(entry);
        Ok(())
    }

    fn set_property<W: SyncWorldMut>(
        &mut self,
        world: &mut W,
        property: &str,
        value: &WireValue,
    ) -> Result<(), ReceiveError> {
        let (instance, created) = self.current_instance("set_property")?;
        let type_name = self
            .tree
            .record_in_chain(self.ctx, &instance)
            .map(|record| record.type_name().to_string())
            .ok_or(ContextError::InstanceNotRegistered { instance })?;
        let writable = self
            .tree
            .types()
            .get(&type_name)
            .and_then(|descriptor| descriptor.property_entry(property))
            .map(|entry| {
                entry.can_receive(self.tree.host_type())
                    && (created || !entry.has(PropertyFlags::CONSTANT))
            })
            .unwrap_or(false);
        if !writable {
            return Err(ReceiveError::PropertyNotWritable {
                type_name,
                property: property.to_string(),
            });
        }
        let value = read_value(self.tree, self.ctx, value)?;
        world.write_property(&mut self.op, &instance, property, value)?;
        Ok(())
    }

    fn call<W: SyncWorldMut>(
        &mut self,
        world: &mut W,
        method: &str,
        call_id: CallId,
        args: &[WireValue],
    ) -> Result<(), ReceiveError> {
        let (target, type_name) = match self.stack.last() {
            Some(ScopeEntry::Instance { instance, .. }) => {
                let type_name = self
                    .tree
                    .record_in_chain(self.ctx, instance)
                    .map(|record| record.type_name().to_string())
                    .unwrap_or_default();
                (MethodTarget::Instance(*instance), type_name)
            }
            Some(ScopeEntry::Type { type_name, .. }) => {
                (MethodTarget::Type(type_name.clone()), type_name.clone())
            }
            _ => {
                return Err(ReceiveError::NoTarget {
                    command: "method_call",
                })
            }
        };

        let marked = self
            .tree
            .descriptor(&type_name)
            .map(|descriptor| descriptor.is_remote_method(method))
            .unwrap_or(false);
        if !marked && self.tree.config().require_remote_marker {
            warn!("rejecting unauthorized call to {}.{}", type_name, method);
            self.queue_result(
                call_id,
                MethodOutcome::Exception(format!("unauthorized call to {}.{}", type_name, method)),
            )?;
            return Err(ReceiveError::UnauthorizedCall {
                type_name,
                method: method.to_string(),
            });
        }

        let args = self.read_values(args)?;
        let result = self
            .op
            .nested(|op| world.invoke_method(op, &target, method, &args));
        let outcome = match result {
            Ok(value) => MethodOutcome::Value(value),
            Err(message) => {
                debug!("{}.{} raised: {}", type_name, method, message);
                MethodOutcome::Exception(message)
            }
        };
        self.queue_result(call_id, outcome)
    }

    fn queue_result(
        &mut self,
        call_id: CallId,
        outcome: MethodOutcome,
    ) -> Result<(), ReceiveError> {
        let return_type = match &outcome {
            MethodOutcome::Value(value) => value.type_label(),
            MethodOutcome::Exception(_) => "exception",
        };
        self.tree.queue_records(
            self.ctx,
            vec![ChangeRecord::MethodResult {
                call_id,
                outcome,
                return_type: return_type.to_string(),
            }],
        )?;
        Ok(())
    }

    fn resolve_result(
        &mut self,
        outcome: &WireOutcome,
        call_id: CallId,
    ) -> Result<(), ReceiveError> {
        let outcome = match outcome {
            WireOutcome::Value(value) => {
                MethodOutcome::Value(read_value(self.tree, self.ctx, value)?)
            }
            WireOutcome::Exception(message) => MethodOutcome::Exception(message.clone()),
        };
        let Some(pending) = self.tree.context_mut(self.ctx)?.take_awaiting_result(&call_id) else {
            return Err(ReceiveError::UnknownCallId { call_id });
        };
        pending.resolve(outcome);
        Ok(())
    }
}
