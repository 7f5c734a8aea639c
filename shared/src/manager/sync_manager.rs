use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    change::{MethodTarget, PendingResult},
    context::{ContextId, ContextKind, ContextTree, SyncContext, SyncInstOptions},
    descriptor::SyncDescriptor,
    destination::SyncDestination,
    mode::{SyncMode, SyncOperation},
    reader::{BatchReader, ReceiveError, ReceiveReport},
    types::{CallId, HostType},
    wire::{SyncBatch, SyncCommand},
    world::{SyncWorldMut, SyncWorldRef},
    writer::BatchWriter,
    InstanceId, SyncConfig, Value,
};

use super::{error::SyncError, sync_result::SyncResult};

/// Synchronizes the instances of one process with its peers.
///
/// Owns the registered sync descriptors and the scope tree of contexts. A
/// client manager talks to a single server through its root context; a
/// server manager keeps a shared root and one endpoint context per
/// connection below it.
pub struct SyncManager {
    tree: ContextTree,
    next_call_id: CallId,
}

impl SyncManager {
    pub fn new(host_type: HostType, config: SyncConfig) -> Self {
        info!("starting {:?} sync manager", host_type);
        Self {
            tree: ContextTree::new(host_type, config),
            next_call_id: 1,
        }
    }

    pub fn host_type(&self) -> HostType {
        self.tree.host_type()
    }

    pub fn config(&self) -> &SyncConfig {
        self.tree.config()
    }

    pub fn tree(&self) -> &ContextTree {
        &self.tree
    }

    pub fn root(&self) -> ContextId {
        self.tree.root()
    }

    pub fn context(&self, ctx: ContextId) -> Result<&SyncContext, SyncError> {
        Ok(self.tree.context(ctx)?)
    }

    // Types

    /// Declares which properties of `descriptor`'s type synchronize. A
    /// second descriptor for the same type is merged into the first.
    pub fn register_type(
        &mut self,
        descriptor: SyncDescriptor,
    ) -> Result<Arc<SyncDescriptor>, SyncError> {
        let descriptor = self.tree.types_mut().add(descriptor)?;
        debug!("registered sync type {}", descriptor.type_name());
        Ok(descriptor)
    }

    // Contexts

    pub fn create_context(
        &mut self,
        parents: &[ContextId],
        scope_name: &str,
        kind: ContextKind,
    ) -> Result<ContextId, SyncError> {
        Ok(self.tree.create_context(parents, scope_name, kind)?)
    }

    pub fn destroy_context(&mut self, ctx: ContextId) -> Result<(), SyncError> {
        Ok(self.tree.destroy_context(ctx)?)
    }

    // Instances

    /// Registers `instance` in the scope chain of `ctx`; returns its name
    pub fn add_sync_inst(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        instance: InstanceId,
        options: &SyncInstOptions,
    ) -> Result<Option<String>, SyncError> {
        Ok(self.tree.add_sync_inst(world, ctx, instance, options)?)
    }

    /// Registers `instance` as one the peer already holds
    pub fn register_sync_inst(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        instance: InstanceId,
        options: &SyncInstOptions,
    ) -> Result<Option<String>, SyncError> {
        Ok(self.tree.register_sync_inst(world, ctx, instance, options)?)
    }

    pub fn remove_sync_inst(
        &mut self,
        ctx: ContextId,
        instance: &InstanceId,
    ) -> Result<(), SyncError> {
        Ok(self.tree.remove_sync_inst(ctx, instance)?)
    }

    pub fn name_of(&self, ctx: ContextId, instance: &InstanceId) -> Option<String> {
        self.tree.name_of(ctx, instance)
    }

    pub fn lookup_name(&self, ctx: ContextId, name: &str) -> Option<InstanceId> {
        self.tree.lookup_name(ctx, name)
    }

    pub fn rename(
        &mut self,
        ctx: ContextId,
        instance: &InstanceId,
        new_name: &str,
    ) -> Result<(), SyncError> {
        Ok(self.tree.rename(ctx, instance, new_name)?)
    }

    pub fn fetch_property(
        &mut self,
        ctx: ContextId,
        instance: &InstanceId,
        property: &str,
    ) -> Result<(), SyncError> {
        Ok(self.tree.fetch_property(ctx, instance, property)?)
    }

    /// Drops the reset-state flag of `instance` here and on the peer of `ctx`
    pub fn clear_reset_state(
        &mut self,
        ctx: ContextId,
        instance: &InstanceId,
    ) -> Result<(), SyncError> {
        Ok(self.tree.clear_reset_state(ctx, instance, true)?)
    }

    // Mutations

    /// Routes every notification raised through `op` to the contexts
    /// holding the changed instances
    pub fn apply(&mut self, op: &mut SyncOperation) {
        self.tree.process_operation(op, None);
    }

    /// Shorthand for a single recorded mutation
    pub fn property_changed(&mut self, instance: InstanceId, property: &str, value: Value) {
        let mut op = SyncOperation::recording();
        op.notify(instance, property, value);
        self.apply(&mut op);
    }

    /// Restores `instance` to its state before its first unsent change and
    /// drops the records still queued for it
    pub fn discard_local_changes<W: SyncWorldMut>(
        &mut self,
        world: &mut W,
        ctx: ContextId,
        instance: &InstanceId,
    ) -> Result<(), SyncError> {
        let mut restored: Vec<(String, Value)> = self
            .tree
            .take_local_changes(ctx, instance)?
            .into_iter()
            .collect();
        restored.sort_by(|a, b| a.0.cmp(&b.0));
        let mut op = SyncOperation::new(SyncMode::Disabled);
        for (property, value) in restored {
            world.write_property(&mut op, instance, &property, value)?;
        }
        self.tree.process_operation(&mut op, None);
        Ok(())
    }

    // Remote calls

    /// Queues a call of `method` on the peer of `ctx`. The returned handle
    /// resolves when the result arrives.
    pub fn invoke_remote(
        &mut self,
        ctx: ContextId,
        target: MethodTarget,
        method: &str,
        args: Vec<Value>,
    ) -> Result<PendingResult, SyncError> {
        let call_id = self.next_call_id;
        self.next_call_id = self.next_call_id.wrapping_add(1).max(1);
        let pending = PendingResult::new();
        self.tree
            .queue_call(ctx, target, method, args, call_id, pending.clone())?;
        debug!("queued remote call {} '{}' in {:?}", call_id, method, ctx);
        Ok(pending)
    }

    // Sending

    pub fn needs_sync(&self, ctx: ContextId) -> bool {
        self.tree
            .context(ctx)
            .map(|context| context.needs_sync())
            .unwrap_or(false)
    }

    /// Freezes `group` of endpoint `ctx` and writes it as a batch. The batch
    /// stays in flight until [`SyncManager::complete_send`] settles it.
    pub fn begin_send(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        group: &str,
    ) -> Result<SyncBatch, SyncError> {
        self.tree.endpoint(ctx)?;
        self.tree.import_broadcast(world, ctx)?;
        let mut log = self.tree.context_mut(ctx)?.group_mut(group).take_for_send()?;

        let mut writer = BatchWriter::new(ctx);
        let written = writer.write_log(&mut self.tree, world, &mut log);

        let context = self.tree.context_mut(ctx)?;
        let logs = context.group_mut(group);
        logs.put_in_flight(log);
        if let Err(error) = written {
            logs.reconcile(Some(&error.to_string()))?;
            return Err(error.into());
        }
        context.begin_send();
        Ok(writer.finish())
    }

    /// Settles the batch in flight for `group`: on success its names become
    /// registered and its values the baseline; on error its records are
    /// merged back for the next send
    pub fn complete_send(
        &mut self,
        ctx: ContextId,
        group: &str,
        error: Option<&str>,
    ) -> Result<(), SyncError> {
        let context = self.tree.context_mut(ctx)?;
        let settled = context.group_mut(group).reconcile(error);
        context.end_send();
        match settled? {
            Some(log) => context.commit(log),
            None => context.mark_needs_sync(),
        }
        Ok(())
    }

    /// Runs one full send cycle of `group` for endpoint `ctx` through
    /// `destination`
    pub fn send_sync(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        group: &str,
        destination: &mut dyn SyncDestination,
    ) -> Result<SyncResult, SyncError> {
        let batch = self.begin_send(world, ctx, group)?;
        if batch.is_empty() {
            self.complete_send(ctx, group, None)?;
            return Ok(SyncResult::delivered(false));
        }

        let any_changes = batch.has_changes();
        match destination.send(&batch) {
            Ok(()) => {
                self.complete_send(ctx, group, None)?;
                debug!("{:?} delivered {} command(s) for group '{}'", ctx, batch.len(), group);
                Ok(SyncResult::delivered(any_changes))
            }
            Err(error) => {
                let message = error.to_string();
                warn!("{:?} failed to deliver group '{}': {}", ctx, group, message);
                self.complete_send(ctx, group, Some(&message))?;
                Ok(SyncResult {
                    any_changes,
                    error_message: Some(message),
                    needs_resync: error.requires_resync(),
                })
            }
        }
    }

    /// Full state of everything endpoint `ctx` can see, for a peer starting
    /// from nothing.
    ///
    /// With `reset` set the peer still holds its instances and only
    /// reset-state properties are written. The snapshot is treated as
    /// delivered: what it carries is not sent again.
    pub fn get_initial_sync(
        &mut self,
        world: &dyn SyncWorldRef,
        ctx: ContextId,
        reset: bool,
    ) -> Result<SyncBatch, SyncError> {
        self.tree.endpoint(ctx)?;
        self.tree.import_broadcast(world, ctx)?;
        let mut snapshot = self.tree.initial_snapshot(ctx, reset)?;

        let mut writer = if reset {
            BatchWriter::new(ctx)
        } else {
            BatchWriter::for_fresh_peer(ctx)
        };
        writer.push(SyncCommand::SetMode {
            mode: SyncMode::Initializing,
        });
        writer.write_log(&mut self.tree, world, &mut snapshot)?;
        let batch = writer.finish();

        self.tree.accept_snapshot(ctx, snapshot, reset)?;
        info!(
            "{} initial sync for {:?}: {} command(s)",
            if reset { "reset" } else { "full" },
            ctx,
            batch.len()
        );
        Ok(batch)
    }

    // Receiving

    /// Applies a batch the peer of endpoint `ctx` sent
    pub fn receive_batch<W: SyncWorldMut>(
        &mut self,
        world: &mut W,
        ctx: ContextId,
        batch: &SyncBatch,
    ) -> Result<ReceiveReport, SyncError> {
        self.tree.endpoint(ctx)?;
        let report = BatchReader::new(&mut self.tree, ctx).read(world, batch);
        if report.is_clean() {
            debug!("{:?} applied {} inbound command(s)", ctx, report.applied);
        } else {
            warn!(
                "{:?} rejected {} inbound command(s), applied {}",
                ctx,
                report.errors.len(),
                report.applied
            );
        }
        if report.needs_reset {
            warn!("{:?} exceeded the inbound error threshold; session reset requested", ctx);
        }
        Ok(report)
    }

    /// Decodes a JSON batch and applies it
    #[cfg(feature = "json")]
    pub fn receive_json<W: SyncWorldMut>(
        &mut self,
        world: &mut W,
        ctx: ContextId,
        text: &str,
    ) -> Result<ReceiveReport, SyncError> {
        let batch = SyncBatch::from_json(text).map_err(|error| ReceiveError::Parse {
            message: error.message,
        })?;
        self.receive_batch(world, ctx, &batch)
    }

    // Diagnostics

    pub fn take_diagnostics(&mut self, ctx: ContextId) -> Result<Vec<String>, SyncError> {
        Ok(self.tree.context_mut(ctx)?.take_diagnostics())
    }
}
