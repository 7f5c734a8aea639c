use std::collections::HashSet;

use crate::{
    change::{ChangeLog, ChangeRecord, MethodOutcome, MethodTarget, PendingResult},
    context::{ContextId, ContextTree, RecordFlags, SyncInstOptions},
    mode::SyncOperation,
    test_support::{tree, MockWorld},
    types::HostType,
    wire::{SyncBatch, SyncCommand, WireOutcome},
    InstanceId, Value, WireValue,
};

use super::BatchWriter;

fn shop() -> SyncCommand {
    SyncCommand::SetPackage {
        name: "shop".to_string(),
    }
}

fn write_default_group(tree: &mut ContextTree, world: &MockWorld, ctx: ContextId) -> SyncBatch {
    let mut log = tree
        .context_mut(ctx)
        .unwrap()
        .group_mut("default")
        .take_for_send()
        .unwrap();
    write_log(tree, world, ctx, &mut log)
}

fn write_log(
    tree: &mut ContextTree,
    world: &MockWorld,
    ctx: ContextId,
    log: &mut ChangeLog,
) -> SyncBatch {
    let mut writer = BatchWriter::new(ctx);
    writer.write_log(tree, world, log).unwrap();
    writer.finish()
}

fn registered_order(world: &mut MockWorld, tree: &mut ContextTree) -> InstanceId {
    let root = tree.root();
    let order = world.spawn("Order");
    tree.register_sync_inst(&*world, root, order, &SyncInstOptions::new())
        .unwrap();
    order
}

fn record(
    tree: &mut ContextTree,
    world: &mut MockWorld,
    instance: InstanceId,
    property: &str,
    value: Value,
) {
    let mut op = SyncOperation::recording();
    world.set(&mut op, instance, property, value);
    tree.process_operation(&mut op, None);
}

/// Panics if a command refers to a name not defined earlier in the batch or
/// listed in `known`
fn assert_defined_before_use(batch: &SyncBatch, known: &[&str]) {
    let mut defined: HashSet<String> = known.iter().map(|name| name.to_string()).collect();
    let mut path: Vec<String> = Vec::new();
    for command in batch.commands() {
        for name in command.referenced_names() {
            assert!(defined.contains(name), "{} used before its definition", name);
        }
        match command {
            SyncCommand::EnterObject {
                name, type_name, ..
            } => {
                path.push(name.clone());
                if type_name.is_some() {
                    defined.insert(path.join("."));
                }
            }
            SyncCommand::ExitObject => {
                path.pop();
            }
            SyncCommand::SetPackage { .. } => path.clear(),
            _ => {}
        }
    }
}

#[test]
fn definition_carries_push_initial_values() {
    let mut world = MockWorld::new();
    let mut tree = tree(HostType::Client);
    let root = tree.root();
    let order = world.spawn("Order");
    world.seed(order, "total", Value::Int(10));
    tree.add_sync_inst(&world, root, order, &SyncInstOptions::new())
        .unwrap();

    let batch = write_default_group(&mut tree, &world, root);

    assert_eq!(
        batch.commands(),
        &[
            shop(),
            SyncCommand::define("Order__0", "Order", Vec::new()),
            SyncCommand::set_property("total", WireValue::Int(10)),
            SyncCommand::ExitObject,
        ]
    );
    let record = tree.context(root).unwrap().record(&order).unwrap();
    assert!(record.has(RecordFlags::NAME_QUEUED));
    assert!(!record.is_registered());
}

#[test]
fn only_the_latest_value_is_written() {
    let mut world = MockWorld::new();
    let mut tree = tree(HostType::Client);
    let root = tree.root();
    let order = registered_order(&mut world, &mut tree);

    record(&mut tree, &mut world, order, "total", Value::Int(10));
    record(&mut tree, &mut world, order, "total", Value::Int(20));
    let batch = write_default_group(&mut tree, &world, root);

    assert_eq!(
        batch.commands(),
        &[
            shop(),
            SyncCommand::enter("Order__0"),
            SyncCommand::set_property("total", WireValue::Int(20)),
            SyncCommand::ExitObject,
        ]
    );
}

#[test]
fn unnamed_reference_is_defined_immediately_before_use() {
    let mut world = MockWorld::new();
    let mut tree = tree(HostType::Client);
    let root = tree.root();
    let order = registered_order(&mut world, &mut tree);
    let customer = world.spawn("Customer");
    world.seed(customer, "name", Value::from("Ada"));

    record(&mut tree, &mut world, order, "customer", Value::Object(customer));
    let batch = write_default_group(&mut tree, &world, root);

    assert_eq!(
        batch.commands(),
        &[
            shop(),
            SyncCommand::define("Customer__0", "Customer", Vec::new()),
            SyncCommand::set_property("name", WireValue::Str("Ada".to_string())),
            SyncCommand::ExitObject,
            SyncCommand::enter("Order__0"),
            SyncCommand::set_property(
                "customer",
                WireValue::Ref {
                    name: "Customer__0".to_string(),
                    type_name: Some("Customer".to_string()),
                }
            ),
            SyncCommand::ExitObject,
        ]
    );
    assert!(tree.context(root).unwrap().holds(&customer));
}

#[test]
fn later_definition_is_hoisted() {
    let mut world = MockWorld::new();
    let mut tree = tree(HostType::Client);
    let root = tree.root();
    let order = registered_order(&mut world, &mut tree);
    let customer = world.spawn("Customer");
    tree.add_sync_inst(&world, root, customer, &SyncInstOptions::new())
        .unwrap();

    let mut log = ChangeLog::new();
    log.add_record(ChangeRecord::PropertyChange {
        instance: order,
        property: "customer".to_string(),
        value: Value::Object(customer),
        remote_origin: false,
    });
    log.add_record(ChangeRecord::NewInstance {
        instance: customer,
        type_name: "Customer".to_string(),
        args: Vec::new(),
        remote_origin: false,
    });
    let batch = write_log(&mut tree, &world, root, &mut log);

    assert_eq!(batch.commands()[1], SyncCommand::define("Customer__0", "Customer", Vec::new()));
    assert_eq!(log.live_count(), 2);
    assert_defined_before_use(&batch, &[]);
}

#[test]
fn reference_to_undescribed_type_is_written_as_null() {
    let mut world = MockWorld::new();
    let mut tree = tree(HostType::Client);
    let root = tree.root();
    let order = registered_order(&mut world, &mut tree);
    let ghost = world.spawn("Ghost");

    record(&mut tree, &mut world, order, "customer", Value::Object(ghost));
    let batch = write_default_group(&mut tree, &world, root);

    assert_eq!(
        batch.commands()[2],
        SyncCommand::set_property("customer", WireValue::Null)
    );
    assert_eq!(tree.context(root).unwrap().diagnostics().len(), 1);
}

#[test]
fn records_before_a_rename_use_the_old_name() {
    let mut world = MockWorld::new();
    let mut tree = tree(HostType::Client);
    let root = tree.root();
    let order = registered_order(&mut world, &mut tree);

    record(&mut tree, &mut world, order, "status", Value::from("paid"));
    tree.rename(root, &order, "big_order").unwrap();
    record(&mut tree, &mut world, order, "total", Value::Int(5));
    let batch = write_default_group(&mut tree, &world, root);

    assert_eq!(
        batch.commands(),
        &[
            shop(),
            SyncCommand::enter("Order__0"),
            SyncCommand::set_property("status", WireValue::Str("paid".to_string())),
            SyncCommand::ExitObject,
            SyncCommand::Rename {
                old_name: "Order__0".to_string(),
                new_name: "big_order".to_string(),
                ack: false,
            },
            SyncCommand::enter("big_order"),
            SyncCommand::set_property("total", WireValue::Int(5)),
            SyncCommand::ExitObject,
        ]
    );
}

#[test]
fn type_level_call_enters_the_type() {
    let world = MockWorld::new();
    let mut tree = tree(HostType::Client);
    let root = tree.root();

    tree.queue_call(
        root,
        MethodTarget::Type("Order".to_string()),
        "refresh",
        vec![Value::Int(1), Value::from("all")],
        7,
        PendingResult::new(),
    )
    .unwrap();
    let batch = write_default_group(&mut tree, &world, root);

    assert_eq!(
        batch.commands(),
        &[
            shop(),
            SyncCommand::enter("Order"),
            SyncCommand::MethodCall {
                method: "refresh".to_string(),
                param_signature: "int,string".to_string(),
                call_id: 7,
                args: vec![WireValue::Int(1), WireValue::Str("all".to_string())],
            },
            SyncCommand::ExitObject,
        ]
    );
}

#[test]
fn results_are_written_outside_any_object() {
    let world = MockWorld::new();
    let mut tree = tree(HostType::Client);
    let root = tree.root();

    let mut log = ChangeLog::new();
    log.add_record(ChangeRecord::MethodResult {
        call_id: 3,
        outcome: MethodOutcome::Exception("unauthorized".to_string()),
        return_type: "null".to_string(),
    });
    let batch = write_log(&mut tree, &world, root, &mut log);

    assert_eq!(
        batch.commands(),
        &[SyncCommand::MethodResult {
            outcome: WireOutcome::Exception("unauthorized".to_string()),
            call_id: 3,
            return_type: "null".to_string(),
        }]
    );
}

#[test]
fn fresh_peer_snapshot_has_no_forward_references() {
    let mut world = MockWorld::new();
    let mut tree = tree(HostType::Client);
    let root = tree.root();
    let customer = world.spawn("Customer");
    world.seed(customer, "name", Value::from("Ada"));
    let order = world.spawn("Order");
    world.seed(order, "customer", Value::Object(customer));
    tree.add_sync_inst(&world, root, order, &SyncInstOptions::new())
        .unwrap();
    tree.add_sync_inst(&world, root, customer, &SyncInstOptions::new())
        .unwrap();

    let mut snapshot = tree.initial_snapshot(root, false).unwrap();
    let mut writer = BatchWriter::for_fresh_peer(root);
    writer.write_log(&mut tree, &world, &mut snapshot).unwrap();
    let batch = writer.finish();

    assert_defined_before_use(&batch, &[]);
    assert_eq!(batch.commands().iter().filter(|command| command.is_definition()).count(), 2);
}
