//! Client/server sessions over the loopback destinations

use tandem_shared::{
    ContextId, DestinationError, HostType, InstanceId, MethodOutcome, MethodTarget, ReceiveError,
    SyncBatch, SyncCommand, SyncConfig, SyncInstOptions, Value, WireOutcome, WireValue,
};
use tandem_test::{FlakyDestination, LoopbackDestination, Peer};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Sends everything `from` has queued for `from_ctx` and applies it on `to`
fn exchange(from: &mut Peer, from_ctx: ContextId, to: &mut Peer, to_ctx: ContextId) {
    let mut link = LoopbackDestination::new();
    let result = from.send(from_ctx, &mut link).unwrap();
    assert!(result.is_ok(), "send failed: {:?}", result.error_message);
    to.receive_all(to_ctx, link.take_batches());
}

/// Client with one order already delivered to a fresh server connection
fn connected_order(total: i64) -> (Peer, Peer, InstanceId, ContextId) {
    let mut client = Peer::client();
    let mut server = Peer::server();
    let connection = server.connect();
    let root = client.root();
    let order = client.add_order(root, total, &SyncInstOptions::new());
    exchange(&mut client, root, &mut server, connection);
    (client, server, order, connection)
}

#[test]
fn shared_instance_reaches_every_connection() {
    init_logger();
    let mut server = Peer::server();
    let first = server.connect();
    let second = server.connect();
    let global = SyncInstOptions::new().scope("global");
    let order = server.add_order(first, 5, &global);
    server
        .manager
        .add_sync_inst(&server.world, second, order, &global)
        .unwrap();
    let mut clients = [(Peer::client(), first), (Peer::client(), second)];
    for (client, connection) in clients.iter_mut() {
        let root = client.root();
        exchange(&mut server, *connection, client, root);
    }

    server.set(&order, "total", Value::Int(40));
    for (client, connection) in clients.iter_mut() {
        let root = client.root();
        exchange(&mut server, *connection, client, root);
        let copy = client.named(root, "Order__0");
        assert_eq!(client.world.order(&copy).unwrap().total, 40);
    }

    let owner = server.manager.tree().listeners().owner(&order);
    assert_eq!(owner, Some(server.root()));
}

#[test]
fn rename_keeps_both_names_until_acknowledged() {
    init_logger();
    let (mut client, mut server, order, connection) = connected_order(3);
    let root = client.root();

    client.manager.rename(root, &order, "big_order").unwrap();
    exchange(&mut client, root, &mut server, connection);

    assert_eq!(client.manager.lookup_name(root, "Order__0"), Some(order));
    assert_eq!(client.manager.lookup_name(root, "big_order"), Some(order));
    let copy = server.named(connection, "big_order");
    assert_eq!(server.manager.lookup_name(connection, "Order__0"), None);

    exchange(&mut server, connection, &mut client, root);

    assert_eq!(client.manager.lookup_name(root, "Order__0"), None);
    assert_eq!(client.manager.name_of(root, &order).as_deref(), Some("big_order"));

    client.set(&order, "total", Value::Int(8));
    exchange(&mut client, root, &mut server, connection);
    assert_eq!(server.world.order(&copy).unwrap().total, 8);
}

#[test]
fn crossing_writes_settle_on_the_value_that_arrives_last() {
    init_logger();
    let (mut client, mut server, order, connection) = connected_order(10);
    let root = client.root();
    let copy = server.named(connection, "Order__0");

    client.set(&order, "total", Value::Int(30));
    server.set(&copy, "total", Value::Int(40));
    for _ in 0..2 {
        exchange(&mut server, connection, &mut client, root);
        exchange(&mut client, root, &mut server, connection);
    }

    assert_eq!(client.world.order(&order).unwrap().total, 40);
    assert_eq!(server.world.order(&copy).unwrap().total, 40);
    assert!(!client.manager.context(root).unwrap().has_pending_changes());
}

#[test]
fn peer_write_replaces_a_change_queued_behind_a_failed_send() {
    init_logger();
    let (mut client, mut server, order, connection) = connected_order(10);
    let root = client.root();
    let copy = server.named(connection, "Order__0");

    client.set(&order, "total", Value::Int(30));
    let mut link = FlakyDestination::new();
    link.fail_next(DestinationError::Timeout);
    let result = client.send(root, &mut link).unwrap();
    assert!(!result.is_ok());

    server.set(&copy, "total", Value::Int(40));
    exchange(&mut server, connection, &mut client, root);
    exchange(&mut client, root, &mut server, connection);

    assert_eq!(client.world.order(&order).unwrap().total, 40);
    assert_eq!(server.world.order(&copy).unwrap().total, 40);
}

#[test]
fn remote_call_runs_on_the_server_and_resolves_on_the_client() {
    init_logger();
    let (mut client, mut server, order, connection) = connected_order(200);
    let root = client.root();

    let pending = client
        .manager
        .invoke_remote(root, MethodTarget::Instance(order), "apply_discount", vec![Value::Int(10)])
        .unwrap();
    exchange(&mut client, root, &mut server, connection);

    assert_eq!(server.world.invoked, vec!["apply_discount".to_string()]);
    assert!(!pending.is_ready());

    exchange(&mut server, connection, &mut client, root);

    assert_eq!(pending.outcome(), Some(MethodOutcome::Value(Value::Int(180))));
    assert_eq!(client.world.order(&order).unwrap().total, 180);
}

#[test]
fn static_call_reaches_the_type() {
    init_logger();
    let (mut client, mut server, _, connection) = connected_order(1);
    let root = client.root();

    let pending = client
        .manager
        .invoke_remote(root, MethodTarget::Type("Order".to_string()), "count", Vec::new())
        .unwrap();
    exchange(&mut client, root, &mut server, connection);
    exchange(&mut server, connection, &mut client, root);

    assert_eq!(pending.outcome(), Some(MethodOutcome::Value(Value::Int(1))));
}

#[test]
fn unmarked_method_is_refused_with_an_exception() {
    init_logger();
    let (mut client, mut server, order, connection) = connected_order(1);
    let root = client.root();

    let pending = client
        .manager
        .invoke_remote(root, MethodTarget::Instance(order), "delete", Vec::new())
        .unwrap();
    let mut link = LoopbackDestination::new();
    client.send(root, &mut link).unwrap();
    for batch in link.take_batches() {
        let report = server.receive(connection, &batch);
        assert!(matches!(
            report.errors.as_slice(),
            [ReceiveError::UnauthorizedCall { .. }]
        ));
    }
    exchange(&mut server, connection, &mut client, root);

    assert!(server.world.invoked.is_empty());
    assert_eq!(
        pending.outcome(),
        Some(MethodOutcome::Exception("unauthorized call to Order.delete".to_string()))
    );
}

#[test]
fn on_demand_property_arrives_after_a_fetch() {
    init_logger();
    let mut client = Peer::client();
    let mut server = Peer::server();
    let connection = server.connect();
    let root = client.root();
    let order = server.world.spawn_order(12);
    server.world.order_mut(&order).unwrap().notes = "fragile".to_string();
    server
        .manager
        .add_sync_inst(&server.world, connection, order, &SyncInstOptions::new())
        .unwrap();
    exchange(&mut server, connection, &mut client, root);
    let copy = client.named(root, "Order__0");
    assert_eq!(client.world.order(&copy).unwrap().notes, "");

    client.manager.fetch_property(root, &copy, "notes").unwrap();
    exchange(&mut client, root, &mut server, connection);
    exchange(&mut server, connection, &mut client, root);
    assert_eq!(client.world.order(&copy).unwrap().notes, "fragile");

    server.set(&order, "notes", Value::from("handle with care"));
    exchange(&mut server, connection, &mut client, root);
    assert_eq!(client.world.order(&copy).unwrap().notes, "handle with care");
}

#[test]
fn acknowledgement_lost_after_delivery_creates_no_duplicate() {
    init_logger();
    let mut client = Peer::client();
    let mut server = Peer::server();
    let connection = server.connect();
    let root = client.root();
    client.add_order(root, 4, &SyncInstOptions::new());
    let mut link = FlakyDestination::new();
    link.fail_after_delivery(DestinationError::Timeout);

    let result = client.send(root, &mut link).unwrap();
    assert!(!result.is_ok());
    assert!(!result.needs_resync);
    let result = client.send(root, &mut link).unwrap();
    assert!(result.is_ok());

    let batches = link.take_batches();
    assert_eq!(batches.len(), 2);
    server.receive_all(connection, batches);
    let orders = server.world.instances_of("Order");
    assert_eq!(orders.len(), 1);
    assert_eq!(server.world.order(&orders[0]).unwrap().total, 4);
}

#[test]
fn lost_session_is_rebuilt_with_a_reset_sync() {
    init_logger();
    let mut client = Peer::client();
    let mut server = Peer::server();
    let connection = server.connect();
    let root = client.root();
    let order = client.add_order(root, 4, &SyncInstOptions::new().reset_state());
    exchange(&mut client, root, &mut server, connection);
    let copy = server.named(connection, "Order__0");

    client.set(&order, "status", Value::from("paid"));
    let mut link = FlakyDestination::new();
    link.fail_next(DestinationError::SessionLost);
    let result = client.send(root, &mut link).unwrap();
    assert!(result.needs_resync);
    assert_eq!(link.pending(), 0);

    let reset = client.manager.get_initial_sync(&client.world, root, true).unwrap();
    let report = server.receive(connection, &reset);
    assert!(report.is_clean());
    assert_eq!(server.world.order(&copy).unwrap().total, 4);

    exchange(&mut client, root, &mut server, connection);
    assert_eq!(server.world.order(&copy).unwrap().status, "paid");
}

#[test]
fn fresh_peer_receives_the_full_state() {
    init_logger();
    let mut server = Peer::server();
    let connection = server.connect();
    let ada = server.add_customer(connection, "Ada", &SyncInstOptions::new());
    let order = server.add_order(connection, 15, &SyncInstOptions::new());
    server.set(&order, "customer", Value::Object(ada));

    let snapshot = server
        .manager
        .get_initial_sync(&server.world, connection, false)
        .unwrap();
    let mut client = Peer::client();
    let root = client.root();
    let report = client.receive(root, &snapshot);

    assert!(report.is_clean());
    let copy = client.named(root, "Order__0");
    let customer = client.named(root, "Customer__0");
    assert_eq!(client.world.order(&copy).unwrap().total, 15);
    assert_eq!(client.world.order(&copy).unwrap().customer, Some(customer));
    assert_eq!(client.world.customer(&customer).unwrap().name, "Ada");

    let mut link = LoopbackDestination::new();
    let result = server.send(connection, &mut link).unwrap();
    assert!(!result.any_changes);
}

#[test]
fn repeated_bad_commands_ask_for_a_reset() {
    init_logger();
    let config = SyncConfig::builder().max_inbound_errors(2).build();
    let mut server = Peer::new(HostType::Server, config);
    let connection = server.connect();
    let stray = |call_id| SyncCommand::MethodResult {
        outcome: WireOutcome::Value(WireValue::Null),
        call_id,
        return_type: "null".to_string(),
    };

    let report = server.receive(connection, &SyncBatch::from_commands(vec![stray(4), stray(5)]));

    assert_eq!(report.errors.len(), 2);
    assert!(report.needs_reset);
}
