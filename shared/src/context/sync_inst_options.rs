use crate::Value;

/// How [`SyncManager::add_sync_inst`](crate::SyncManager::add_sync_inst)
/// registers an instance
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncInstOptions {
    /// Named and sent only once something references it
    pub on_demand: bool,
    /// Send every sendable property along with the definition
    pub push_initial: bool,
    /// Included in reset-mode initial syncs
    pub reset_state: bool,
    /// Scope name to register under, overriding the descriptor's default
    pub scope: Option<String>,
    /// Constructor arguments the peer needs to create its copy
    pub args: Vec<Value>,
}

impl SyncInstOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_demand(mut self) -> Self {
        self.on_demand = true;
        self
    }

    pub fn push_initial(mut self) -> Self {
        self.push_initial = true;
        self
    }

    pub fn reset_state(mut self) -> Self {
        self.reset_state = true;
        self
    }

    pub fn scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}
