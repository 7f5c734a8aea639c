//! Typed in-memory world for end-to-end tests.
//! Properties are reached through per-type accessor tables built once in
//! `TestWorld::new`.

use std::collections::HashMap;

use tandem_shared::{
    AccessorTable, InstanceId, MethodTarget, SyncOperation, SyncWorldMut, SyncWorldRef, Value,
    WorldError,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub total: i64,
    pub status: String,
    pub customer: Option<InstanceId>,
    pub notes: String,
}

impl Default for Order {
    fn default() -> Self {
        Self {
            total: 0,
            status: "open".to_string(),
            customer: None,
            notes: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Customer {
    pub name: String,
}

enum TestObject {
    Order(Order),
    Customer(Customer),
}

impl TestObject {
    fn type_name(&self) -> &'static str {
        match self {
            TestObject::Order(_) => "Order",
            TestObject::Customer(_) => "Customer",
        }
    }
}

fn mismatch(property: &str, value: &Value) -> WorldError {
    WorldError::TypeMismatch {
        property: property.to_string(),
        found: value.type_label(),
    }
}

fn order_accessors() -> AccessorTable<Order> {
    AccessorTable::new("Order")
        .field(
            "total",
            |order: &Order| Value::Int(order.total),
            |order: &mut Order, value: Value| match value {
                Value::Int(total) => {
                    order.total = total;
                    Ok(())
                }
                other => Err(mismatch("total", &other)),
            },
        )
        .field(
            "status",
            |order: &Order| Value::String(order.status.clone()),
            |order: &mut Order, value: Value| match value {
                Value::String(status) => {
                    order.status = status;
                    Ok(())
                }
                other => Err(mismatch("status", &other)),
            },
        )
        .field(
            "customer",
            |order: &Order| order.customer.map(Value::Object).unwrap_or(Value::Null),
            |order: &mut Order, value: Value| match value {
                Value::Object(customer) => {
                    order.customer = Some(customer);
                    Ok(())
                }
                Value::Null => {
                    order.customer = None;
                    Ok(())
                }
                other => Err(mismatch("customer", &other)),
            },
        )
        .field(
            "notes",
            |order: &Order| Value::String(order.notes.clone()),
            |order: &mut Order, value: Value| match value {
                Value::String(notes) => {
                    order.notes = notes;
                    Ok(())
                }
                other => Err(mismatch("notes", &other)),
            },
        )
}

fn customer_accessors() -> AccessorTable<Customer> {
    AccessorTable::new("Customer").field(
        "name",
        |customer: &Customer| Value::String(customer.name.clone()),
        |customer: &mut Customer, value: Value| match value {
            Value::String(name) => {
                customer.name = name;
                Ok(())
            }
            other => Err(mismatch("name", &other)),
        },
    )
}

/// HashMap-backed world holding orders and customers
pub struct TestWorld {
    objects: HashMap<InstanceId, TestObject>,
    next_id: u64,
    orders: AccessorTable<Order>,
    customers: AccessorTable<Customer>,
    /// Methods run on behalf of the peer, in call order
    pub invoked: Vec<String>,
}

impl Default for TestWorld {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            next_id: 1,
            orders: order_accessors(),
            customers: customer_accessors(),
            invoked: Vec::new(),
        }
    }
}

impl TestWorld {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self, object: TestObject) -> InstanceId {
        let instance = InstanceId::from_u64(self.next_id);
        self.next_id += 1;
        self.objects.insert(instance, object);
        instance
    }

    // Construction. Nothing is notified, as with constructor code.

    pub fn spawn_order(&mut self, total: i64) -> InstanceId {
        self.allocate(TestObject::Order(Order {
            total,
            ..Default::default()
        }))
    }

    pub fn spawn_customer(&mut self, name: &str) -> InstanceId {
        self.allocate(TestObject::Customer(Customer {
            name: name.to_string(),
        }))
    }

    pub fn despawn(&mut self, instance: &InstanceId) -> bool {
        self.objects.remove(instance).is_some()
    }

    // Access

    pub fn order(&self, instance: &InstanceId) -> Option<&Order> {
        match self.objects.get(instance) {
            Some(TestObject::Order(order)) => Some(order),
            _ => None,
        }
    }

    /// Direct access that bypasses change notification
    pub fn order_mut(&mut self, instance: &InstanceId) -> Option<&mut Order> {
        match self.objects.get_mut(instance) {
            Some(TestObject::Order(order)) => Some(order),
            _ => None,
        }
    }

    pub fn customer(&self, instance: &InstanceId) -> Option<&Customer> {
        match self.objects.get(instance) {
            Some(TestObject::Customer(customer)) => Some(customer),
            _ => None,
        }
    }

    /// Live instances of `type_name`, oldest first
    pub fn instances_of(&self, type_name: &str) -> Vec<InstanceId> {
        let mut output: Vec<InstanceId> = self
            .objects
            .iter()
            .filter(|(_, object)| object.type_name() == type_name)
            .map(|(instance, _)| *instance)
            .collect();
        output.sort();
        output
    }

    pub fn get(&self, instance: &InstanceId, property: &str) -> Option<Value> {
        self.read_property(instance, property)
    }

    /// Writes a property and reports the change through `op`
    pub fn set(
        &mut self,
        op: &mut SyncOperation,
        instance: &InstanceId,
        property: &str,
        value: Value,
    ) -> Result<(), WorldError> {
        let stored = value.clone();
        match self.objects.get_mut(instance) {
            Some(TestObject::Order(order)) => self.orders.set(order, property, stored)?,
            Some(TestObject::Customer(customer)) => {
                self.customers.set(customer, property, stored)?
            }
            None => {
                return Err(WorldError::InstanceNotFound {
                    instance: *instance,
                })
            }
        }
        op.notify(*instance, property, value);
        Ok(())
    }

    fn order_count(&self) -> i64 {
        self.instances_of("Order").len() as i64
    }
}

impl SyncWorldRef for TestWorld {
    fn type_name(&self, instance: &InstanceId) -> Option<String> {
        self.objects
            .get(instance)
            .map(|object| object.type_name().to_string())
    }

    fn read_property(&self, instance: &InstanceId, property: &str) -> Option<Value> {
        match self.objects.get(instance)? {
            TestObject::Order(order) => self.orders.get(order, property),
            TestObject::Customer(customer) => self.customers.get(customer, property),
        }
    }
}

impl SyncWorldMut for TestWorld {
    fn create_instance(
        &mut self,
        _op: &mut SyncOperation,
        type_name: &str,
        _args: &[Value],
    ) -> Result<InstanceId, WorldError> {
        match type_name {
            "Order" => Ok(self.allocate(TestObject::Order(Order::default()))),
            "Customer" => Ok(self.allocate(TestObject::Customer(Customer::default()))),
            other => Err(WorldError::CreateFailed {
                type_name: other.to_string(),
                reason: "not a test type".to_string(),
            }),
        }
    }

    fn write_property(
        &mut self,
        op: &mut SyncOperation,
        instance: &InstanceId,
        property: &str,
        value: Value,
    ) -> Result<(), WorldError> {
        self.set(op, instance, property, value)
    }

    fn invoke_method(
        &mut self,
        op: &mut SyncOperation,
        target: &MethodTarget,
        method: &str,
        args: &[Value],
    ) -> Result<Value, String> {
        self.invoked.push(method.to_string());
        match (target, method) {
            (MethodTarget::Type(_), "count") => Ok(Value::Int(self.order_count())),
            (MethodTarget::Instance(instance), "close") => {
                self.set(op, instance, "status", Value::from("closed"))
                    .map_err(|error| error.to_string())?;
                Ok(Value::Null)
            }
            (MethodTarget::Instance(instance), "apply_discount") => {
                let Some(Value::Int(percent)) = args.first() else {
                    return Err("apply_discount expects a percentage".to_string());
                };
                let Some(order) = self.order(instance) else {
                    return Err("not an order".to_string());
                };
                let total = order.total - order.total * percent / 100;
                self.set(op, instance, "total", Value::Int(total))
                    .map_err(|error| error.to_string())?;
                Ok(Value::Int(total))
            }
            _ => Err(format!("no method '{}'", method)),
        }
    }
}
