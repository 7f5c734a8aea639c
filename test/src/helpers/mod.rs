use tandem_shared::{
    ContextId, ContextKind, HostType, InstanceId, ReceiveReport, SyncBatch, SyncConfig,
    SyncDestination, SyncError, SyncInstOptions, SyncManager, SyncOperation, SyncResult, Value,
};

use crate::{test_protocol, test_world::TestWorld};

/// One side of a session: a world plus the manager synchronizing it
pub struct Peer {
    pub world: TestWorld,
    pub manager: SyncManager,
}

impl Peer {
    pub fn new(host_type: HostType, config: SyncConfig) -> Self {
        let mut manager = SyncManager::new(host_type, config);
        test_protocol::register(&mut manager);
        Self {
            world: TestWorld::new(),
            manager,
        }
    }

    pub fn client() -> Self {
        Self::new(HostType::Client, SyncConfig::default())
    }

    pub fn server() -> Self {
        Self::new(HostType::Server, SyncConfig::default())
    }

    pub fn root(&self) -> ContextId {
        self.manager.root()
    }

    /// Opens a connection context below the server root
    pub fn connect(&mut self) -> ContextId {
        let root = self.root();
        self.manager
            .create_context(&[root], "connection", ContextKind::Endpoint)
            .expect("root context is live")
    }

    pub fn add_order(
        &mut self,
        ctx: ContextId,
        total: i64,
        options: &SyncInstOptions,
    ) -> InstanceId {
        let order = self.world.spawn_order(total);
        self.manager
            .add_sync_inst(&self.world, ctx, order, options)
            .expect("order registers");
        order
    }

    pub fn add_customer(
        &mut self,
        ctx: ContextId,
        name: &str,
        options: &SyncInstOptions,
    ) -> InstanceId {
        let customer = self.world.spawn_customer(name);
        self.manager
            .add_sync_inst(&self.world, ctx, customer, options)
            .expect("customer registers");
        customer
    }

    /// Local write, recorded for every peer holding the instance
    pub fn set(&mut self, instance: &InstanceId, property: &str, value: Value) {
        let mut op = SyncOperation::recording();
        self.world
            .set(&mut op, instance, property, value)
            .expect("property write");
        self.manager.apply(&mut op);
    }

    pub fn send(
        &mut self,
        ctx: ContextId,
        destination: &mut dyn SyncDestination,
    ) -> Result<SyncResult, SyncError> {
        let group = self.manager.config().default_group.clone();
        self.manager.send_sync(&self.world, ctx, &group, destination)
    }

    pub fn receive(&mut self, ctx: ContextId, batch: &SyncBatch) -> ReceiveReport {
        self.manager
            .receive_batch(&mut self.world, ctx, batch)
            .expect("endpoint context")
    }

    /// Applies every batch and asserts none of them was rejected
    pub fn receive_all(&mut self, ctx: ContextId, batches: Vec<SyncBatch>) {
        for batch in batches {
            let report = self.receive(ctx, &batch);
            assert!(report.is_clean(), "batch rejected: {:?}", report.errors);
        }
    }

    /// Instance this peer knows under `name` in `ctx`
    pub fn named(&self, ctx: ContextId, name: &str) -> InstanceId {
        match self.manager.lookup_name(ctx, name) {
            Some(instance) => instance,
            None => panic!("no instance named {}", name),
        }
    }
}
