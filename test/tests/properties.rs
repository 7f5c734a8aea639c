/// PROPERTY-BASED TESTS: delivery invariants
///
/// Key invariants:
/// 1. No write is lost, whatever mix of failed, dropped and unacknowledged
///    sends happens in between
/// 2. Both peers settle on the same values when their writes cross
/// 3. A batch never refers to an object before defining it

use std::collections::HashSet;

use proptest::prelude::*;
use tandem_shared::{
    ContextId, DestinationError, InstanceId, SyncBatch, SyncCommand, SyncInstOptions, Value,
};
use tandem_test::{FlakyDestination, LoopbackDestination, Peer};

#[derive(Clone, Copy, Debug)]
enum Delivery {
    Acknowledged,
    Dropped,
    Unacknowledged,
}

#[derive(Clone, Debug)]
enum Step {
    Write { order: usize, total: i64 },
    Send(Delivery),
    WriteDuringSend { order: usize, total: i64, delivered: bool },
}

#[derive(Clone, Copy, Debug)]
enum CustomerPlan {
    Unregistered,
    Registered,
    OnDemand,
}

fn delivery_strategy() -> impl Strategy<Value = Delivery> {
    prop_oneof![
        Just(Delivery::Acknowledged),
        Just(Delivery::Dropped),
        Just(Delivery::Unacknowledged),
    ]
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0usize..2, 0i64..4).prop_map(|(order, total)| Step::Write { order, total }),
        delivery_strategy().prop_map(Step::Send),
        (0usize..2, 0i64..4, any::<bool>()).prop_map(|(order, total, delivered)| {
            Step::WriteDuringSend {
                order,
                total,
                delivered,
            }
        }),
    ]
}

fn plan_strategy() -> impl Strategy<Value = CustomerPlan> {
    prop_oneof![
        Just(CustomerPlan::Unregistered),
        Just(CustomerPlan::Registered),
        Just(CustomerPlan::OnDemand),
    ]
}

#[derive(Clone, Debug)]
enum CrossingStep {
    ClientWrite { order: usize, total: i64 },
    ServerWrite { order: usize, total: i64 },
    ClientSend(Delivery),
    ServerSend(Delivery),
}

fn crossing_step_strategy() -> impl Strategy<Value = CrossingStep> {
    prop_oneof![
        (0usize..2, 0i64..4).prop_map(|(order, total)| CrossingStep::ClientWrite { order, total }),
        (0usize..2, 0i64..4).prop_map(|(order, total)| CrossingStep::ServerWrite { order, total }),
        delivery_strategy().prop_map(CrossingStep::ClientSend),
        delivery_strategy().prop_map(CrossingStep::ServerSend),
    ]
}

fn deliver(client: &mut Peer, server: &mut Peer, connection: ContextId, delivery: Delivery) {
    let root = client.root();
    transfer(client, root, server, connection, delivery);
}

/// One send from `from_ctx` on `from`, applied on `to` if it got through
fn transfer(
    from: &mut Peer,
    from_ctx: ContextId,
    to: &mut Peer,
    to_ctx: ContextId,
    delivery: Delivery,
) {
    let mut link = FlakyDestination::new();
    match delivery {
        Delivery::Acknowledged => {}
        Delivery::Dropped => link.fail_next(DestinationError::Transport {
            message: "connection reset".to_string(),
        }),
        Delivery::Unacknowledged => link.fail_after_delivery(DestinationError::Timeout),
    }
    from.send(from_ctx, &mut link).unwrap();
    to.receive_all(to_ctx, link.take_batches());
}

/// Names a batch uses before the command defining them
fn forward_references(batch: &SyncBatch) -> Vec<String> {
    let mut defined = HashSet::new();
    let mut output = Vec::new();
    for command in batch.commands() {
        match command {
            SyncCommand::EnterObject {
                name,
                type_name: Some(_),
                ..
            } => {
                defined.insert(name.clone());
            }
            SyncCommand::SetProperty { value, .. } => {
                for name in value.referenced_names() {
                    if !defined.contains(name) {
                        output.push(name.to_string());
                    }
                }
            }
            _ => {}
        }
    }
    output
}

proptest! {
    #[test]
    fn prop_no_write_is_lost(steps in prop::collection::vec(step_strategy(), 1..24)) {
        let mut client = Peer::client();
        let mut server = Peer::server();
        let connection = server.connect();
        let root = client.root();
        let orders: Vec<InstanceId> = (0..2)
            .map(|_| client.add_order(root, 1, &SyncInstOptions::new()))
            .collect();
        deliver(&mut client, &mut server, connection, Delivery::Acknowledged);

        for step in steps {
            match step {
                Step::Write { order, total } => {
                    client.set(&orders[order], "total", Value::Int(total));
                }
                Step::Send(delivery) => {
                    deliver(&mut client, &mut server, connection, delivery);
                }
                Step::WriteDuringSend { order, total, delivered } => {
                    let batch = client.manager.begin_send(&client.world, root, "default").unwrap();
                    client.set(&orders[order], "total", Value::Int(total));
                    if delivered {
                        let report = server.receive(connection, &batch);
                        prop_assert!(report.is_clean());
                        client.manager.complete_send(root, "default", None).unwrap();
                    } else {
                        client
                            .manager
                            .complete_send(root, "default", Some("dropped"))
                            .unwrap();
                    }
                }
            }
        }
        deliver(&mut client, &mut server, connection, Delivery::Acknowledged);

        for (index, order) in orders.iter().enumerate() {
            let name = format!("Order__{}", index);
            let copy = server.named(connection, &name);
            prop_assert_eq!(
                server.world.order(&copy).unwrap().total,
                client.world.order(order).unwrap().total
            );
        }
        prop_assert!(!client.manager.needs_sync(root));
    }

    #[test]
    fn prop_crossing_writes_converge(
        steps in prop::collection::vec(crossing_step_strategy(), 1..24),
    ) {
        let mut client = Peer::client();
        let mut server = Peer::server();
        let connection = server.connect();
        let root = client.root();
        let orders: Vec<InstanceId> = (0..2)
            .map(|_| client.add_order(root, 1, &SyncInstOptions::new()))
            .collect();
        deliver(&mut client, &mut server, connection, Delivery::Acknowledged);
        let copies: Vec<InstanceId> = (0..2)
            .map(|index| server.named(connection, &format!("Order__{}", index)))
            .collect();

        for step in steps {
            match step {
                CrossingStep::ClientWrite { order, total } => {
                    client.set(&orders[order], "total", Value::Int(total));
                }
                CrossingStep::ServerWrite { order, total } => {
                    server.set(&copies[order], "total", Value::Int(total));
                }
                CrossingStep::ClientSend(delivery) => {
                    transfer(&mut client, root, &mut server, connection, delivery);
                }
                CrossingStep::ServerSend(delivery) => {
                    transfer(&mut server, connection, &mut client, root, delivery);
                }
            }
        }
        transfer(&mut client, root, &mut server, connection, Delivery::Acknowledged);
        transfer(&mut server, connection, &mut client, root, Delivery::Acknowledged);

        for (order, copy) in orders.iter().zip(copies.iter()) {
            prop_assert_eq!(
                server.world.order(copy).unwrap().total,
                client.world.order(order).unwrap().total
            );
        }
        prop_assert!(!client.manager.context(root).unwrap().has_pending_changes());
        prop_assert!(!server.manager.context(connection).unwrap().has_pending_changes());
    }

    #[test]
    fn prop_references_follow_definitions(
        plans in prop::collection::vec(plan_strategy(), 1..4),
        links in prop::collection::vec(prop::option::of(0usize..4), 1..6),
        customers_first in any::<bool>(),
    ) {
        let mut client = Peer::client();
        let mut server = Peer::server();
        let connection = server.connect();
        let root = client.root();
        let customers: Vec<InstanceId> = (0..plans.len())
            .map(|index| client.world.spawn_customer(&format!("c{}", index)))
            .collect();
        let orders: Vec<(InstanceId, Option<usize>)> = links
            .iter()
            .map(|link| {
                let order = client.world.spawn_order(1);
                let customer = link.map(|index| index % customers.len());
                client.world.order_mut(&order).unwrap().customer =
                    customer.map(|index| customers[index]);
                (order, customer)
            })
            .collect();

        let register_customers = |client: &mut Peer| {
            for (customer, plan) in customers.iter().zip(plans.iter()) {
                let options = match plan {
                    CustomerPlan::Unregistered => continue,
                    CustomerPlan::Registered => SyncInstOptions::new(),
                    CustomerPlan::OnDemand => SyncInstOptions::new().on_demand(),
                };
                client.manager.add_sync_inst(&client.world, root, *customer, &options).unwrap();
            }
        };
        if customers_first {
            register_customers(&mut client);
        }
        for (order, _) in orders.iter() {
            client
                .manager
                .add_sync_inst(&client.world, root, *order, &SyncInstOptions::new().push_initial())
                .unwrap();
        }
        if !customers_first {
            register_customers(&mut client);
        }

        let mut link = LoopbackDestination::new();
        client.send(root, &mut link).unwrap();
        let batches = link.take_batches();
        for batch in batches.iter() {
            prop_assert!(forward_references(batch).is_empty(), "forward reference in {:?}", batch);
        }
        server.receive_all(connection, batches);

        for (order, customer) in orders.iter() {
            let name = client.manager.name_of(root, order).unwrap();
            let copy = server.named(connection, &name);
            let linked = server
                .world
                .order(&copy)
                .unwrap()
                .customer
                .and_then(|customer| server.world.customer(&customer))
                .map(|customer| customer.name.clone());
            prop_assert_eq!(linked, customer.map(|index| format!("c{}", index)));
        }
    }
}
