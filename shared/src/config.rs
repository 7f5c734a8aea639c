//! # `SyncConfig` – per-manager tuning knobs
//!
//! Cloned into every [`SyncManager`](crate::SyncManager) at construction and
//! never mutated afterwards, so every context owned by a manager agrees on
//! naming and on how strictly inbound calls are screened.

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Change group used when a property entry names none.
    pub default_group: String,
    /// Joins a type name and its counter when a name is synthesized
    /// (`Order` + `__` + `0` → `Order__0`).
    pub name_separator: String,
    /// Scope name given to the root context.
    pub root_scope: String,
    /// When set, an inbound method call is executed only if the target type
    /// lists the method as remote-callable.
    pub require_remote_marker: bool,
    /// Number of rejected inbound commands in one batch after which the
    /// receive report asks the caller for a full session reset.
    pub max_inbound_errors: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_group: "default".to_string(),
            name_separator: "__".to_string(),
            root_scope: "global".to_string(),
            require_remote_marker: true,
            max_inbound_errors: 8,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn default_group(&mut self, group: &str) -> &mut Self {
        self.default_group = group.to_string();
        self
    }

    pub fn name_separator(&mut self, separator: &str) -> &mut Self {
        self.name_separator = separator.to_string();
        self
    }

    pub fn root_scope(&mut self, scope: &str) -> &mut Self {
        self.root_scope = scope.to_string();
        self
    }

    pub fn allow_unmarked_remote_calls(&mut self) -> &mut Self {
        self.require_remote_marker = false;
        self
    }

    pub fn max_inbound_errors(&mut self, count: usize) -> &mut Self {
        self.max_inbound_errors = count;
        self
    }

    pub fn build(&mut self) -> Self {
        self.clone()
    }
}
