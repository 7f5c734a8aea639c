use std::{collections::HashMap, sync::Arc};

use log::debug;

use super::{error::DescriptorError, sync_descriptor::SyncDescriptor};

/// Registered descriptors, keyed by type name
#[derive(Clone, Default)]
pub struct SyncTypes {
    descriptors: HashMap<String, Arc<SyncDescriptor>>,
}

impl SyncTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `descriptor`, merging it into an existing one for the same type
    pub fn add(
        &mut self,
        descriptor: SyncDescriptor,
    ) -> Result<Arc<SyncDescriptor>, DescriptorError> {
        let type_name = descriptor.type_name().to_string();
        let registered = match self.descriptors.get(&type_name) {
            Some(existing) => {
                debug!("merging descriptor for {}", type_name);
                Arc::new(existing.merge(&descriptor)?)
            }
            None => Arc::new(descriptor),
        };
        self.descriptors.insert(type_name, registered.clone());
        Ok(registered)
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<SyncDescriptor>> {
        self.descriptors.get(type_name)
    }

    pub fn try_get(&self, type_name: &str) -> Result<&Arc<SyncDescriptor>, DescriptorError> {
        self.descriptors
            .get(type_name)
            .ok_or_else(|| DescriptorError::TypeNotRegistered {
                type_name: type_name.to_string(),
            })
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.descriptors.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
