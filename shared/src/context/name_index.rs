use std::collections::{HashMap, HashSet};

use crate::InstanceId;

use super::error::ContextError;

/// Name → instance map of one context. Released names are retired and never
/// bound to another instance.
#[derive(Default)]
pub struct NameIndex {
    inner: HashMap<String, InstanceId>,
    retired: HashSet<String>,
}

impl NameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&InstanceId> {
        self.inner.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Whether `name` is bound or was bound before
    pub fn is_taken(&self, name: &str) -> bool {
        self.inner.contains_key(name) || self.retired.contains(name)
    }

    /// Binds `name`. Rebinding a name to the instance it already names is a
    /// no-op.
    pub fn try_insert(&mut self, name: &str, instance: InstanceId) -> Result<(), ContextError> {
        match self.inner.get(name) {
            Some(existing) if *existing == instance => return Ok(()),
            Some(_) => {
                return Err(ContextError::NameInUse {
                    name: name.to_string(),
                })
            }
            None => {}
        }
        if self.retired.contains(name) {
            return Err(ContextError::NameInUse {
                name: name.to_string(),
            });
        }
        self.inner.insert(name.to_string(), instance);
        Ok(())
    }

    /// Unbinds `name` and retires it
    pub fn release(&mut self, name: &str) -> Option<InstanceId> {
        let instance = self.inner.remove(name)?;
        self.retired.insert(name.to_string());
        Some(instance)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InstanceId)> {
        self.inner.iter()
    }
}
