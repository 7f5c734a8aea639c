use std::{collections::HashSet, sync::Arc};

use crate::{HostType, Value};

use super::{error::DescriptorError, property_flags::PropertyFlags};

/// One synchronized property of a type
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyEntry {
    name: String,
    flags: PropertyFlags,
    default: Option<Value>,
    group: Option<String>,
}

impl PropertyEntry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            flags: PropertyFlags::empty(),
            default: None,
            group: None,
        }
    }

    pub fn flags(mut self, flags: PropertyFlags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property_flags(&self) -> PropertyFlags {
        self.flags
    }

    pub fn has(&self, flag: PropertyFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn sync_group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Whether `host` ever sends this property to its peer
    pub fn can_send(&self, host: HostType) -> bool {
        if self.has(PropertyFlags::RECEIVE_ONLY) || self.has(PropertyFlags::STATIC) {
            return false;
        }
        self.direction_allows(host)
    }

    /// Whether `host` accepts values of this property from its peer
    pub fn can_receive(&self, host: HostType) -> bool {
        if self.has(PropertyFlags::SEND_ONLY) || self.has(PropertyFlags::STATIC) {
            return false;
        }
        self.direction_allows(host.invert())
    }

    fn direction_allows(&self, sender: HostType) -> bool {
        let directional = PropertyFlags::SERVER_DIRECTION | PropertyFlags::CLIENT_DIRECTION;
        if !self.flags.intersects(directional) {
            return true;
        }
        match sender {
            HostType::Server => self.has(PropertyFlags::SERVER_DIRECTION),
            HostType::Client => self.has(PropertyFlags::CLIENT_DIRECTION),
        }
    }

    /// Whether `value` differs from the declared default; properties without
    /// a default are compared against null
    pub fn differs_from_default(&self, value: &Value) -> bool {
        match &self.default {
            Some(default) => default != value,
            None => !value.is_null(),
        }
    }

    fn validate(&self, type_name: &str) -> Result<(), DescriptorError> {
        let exclusive = [
            (PropertyFlags::RECEIVE_ONLY, "RECEIVE_ONLY", PropertyFlags::SEND_ONLY, "SEND_ONLY"),
            (PropertyFlags::PUSH_INITIAL, "PUSH_INITIAL", PropertyFlags::ON_DEMAND, "ON_DEMAND"),
        ];
        for (first, first_name, second, second_name) in exclusive {
            if self.has(first) && self.has(second) {
                return Err(DescriptorError::ConflictingFlags {
                    type_name: type_name.to_string(),
                    property: self.name.clone(),
                    first: first_name,
                    second: second_name,
                });
            }
        }
        Ok(())
    }

    fn merge(&mut self, newer: &PropertyEntry) {
        self.flags.insert(newer.flags);
        if newer.default.is_some() {
            self.default = newer.default.clone();
        }
        if newer.group.is_some() {
            self.group = newer.group.clone();
        }
    }
}

/// Declares how instances of one type synchronize with one destination.
///
/// Immutable once registered, except for [`SyncDescriptor::merge`], which only
/// ever adds properties, flags and remote methods.
#[derive(Clone, Debug)]
pub struct SyncDescriptor {
    type_name: String,
    package: Option<String>,
    properties: Vec<PropertyEntry>,
    parent: Option<Arc<SyncDescriptor>>,
    allow_create: bool,
    default_scope: Option<String>,
    broadcast: bool,
    remote_methods: HashSet<String>,
}

impl SyncDescriptor {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            package: None,
            properties: Vec::new(),
            parent: None,
            allow_create: true,
            default_scope: None,
            broadcast: false,
            remote_methods: HashSet::new(),
        }
    }

    // Builder

    pub fn package(mut self, package: &str) -> Self {
        self.package = Some(package.to_string());
        self
    }

    /// Adds a property
    ///
    /// # Panics
    ///
    /// Panics if the property is declared twice or carries contradicting flags.
    /// Consider using `try_add_property` for non-panicking error handling.
    pub fn property(mut self, entry: PropertyEntry) -> Self {
        if let Err(error) = self.try_add_property(entry) {
            panic!("{}", error);
        }
        self
    }

    pub fn try_add_property(&mut self, entry: PropertyEntry) -> Result<(), DescriptorError> {
        entry.validate(&self.type_name)?;
        if self.properties.iter().any(|existing| existing.name == entry.name) {
            return Err(DescriptorError::DuplicateProperty {
                type_name: self.type_name.clone(),
                property: entry.name,
            });
        }
        self.properties.push(entry);
        Ok(())
    }

    pub fn parent(mut self, parent: Arc<SyncDescriptor>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn allow_create(mut self, allow: bool) -> Self {
        self.allow_create = allow;
        self
    }

    pub fn default_scope(mut self, scope: &str) -> Self {
        self.default_scope = Some(scope.to_string());
        self
    }

    pub fn broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    /// Marks `method` as callable by the peer
    pub fn remote_method(mut self, method: &str) -> Self {
        self.remote_methods.insert(method.to_string());
        self
    }

    // Lookup

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn package_name(&self) -> Option<&str> {
        match &self.package {
            Some(package) => Some(package.as_str()),
            None => self.parent.as_ref().and_then(|parent| parent.package_name()),
        }
    }

    pub fn parent_descriptor(&self) -> Option<&Arc<SyncDescriptor>> {
        self.parent.as_ref()
    }

    pub fn allows_create(&self) -> bool {
        self.allow_create
    }

    pub fn scope(&self) -> Option<&str> {
        self.default_scope.as_deref()
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    /// Looks `name` up on this type, then along the parent chain
    pub fn property_entry(&self, name: &str) -> Option<&PropertyEntry> {
        if let Some(entry) = self.properties.iter().find(|entry| entry.name == name) {
            return Some(entry);
        }
        self.parent
            .as_ref()
            .and_then(|parent| parent.property_entry(name))
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property_entry(name).is_some()
    }

    pub fn flags_of(&self, name: &str) -> PropertyFlags {
        self.property_entry(name)
            .map(|entry| entry.property_flags())
            .unwrap_or(PropertyFlags::empty())
    }

    /// All properties in declaration order, inherited ones first. A property
    /// redeclared on this type replaces the inherited entry in place.
    pub fn properties(&self) -> Vec<&PropertyEntry> {
        let mut output: Vec<&PropertyEntry> = match &self.parent {
            Some(parent) => parent.properties(),
            None => Vec::new(),
        };
        for entry in &self.properties {
            if let Some(slot) = output.iter_mut().find(|existing| existing.name == entry.name) {
                *slot = entry;
            } else {
                output.push(entry);
            }
        }
        output
    }

    pub fn is_remote_method(&self, method: &str) -> bool {
        if self.remote_methods.contains(method) {
            return true;
        }
        self.parent
            .as_ref()
            .map(|parent| parent.is_remote_method(method))
            .unwrap_or(false)
    }

    /// Additive merge with a newer descriptor for the same type
    pub fn merge(&self, newer: &SyncDescriptor) -> Result<SyncDescriptor, DescriptorError> {
        if self.type_name != newer.type_name {
            return Err(DescriptorError::TypeMismatch {
                type_name: self.type_name.clone(),
                other: newer.type_name.clone(),
            });
        }

        let mut merged = self.clone();
        for entry in &newer.properties {
            if let Some(existing) = merged
                .properties
                .iter_mut()
                .find(|existing| existing.name == entry.name)
            {
                existing.merge(entry);
                existing.validate(&self.type_name)?;
            } else {
                merged.properties.push(entry.clone());
            }
        }
        merged.remote_methods.extend(newer.remote_methods.iter().cloned());
        merged.broadcast |= newer.broadcast;
        merged.allow_create &= newer.allow_create;
        if newer.default_scope.is_some() {
            merged.default_scope = newer.default_scope.clone();
        }
        if newer.package.is_some() {
            merged.package = newer.package.clone();
        }
        if newer.parent.is_some() {
            merged.parent = newer.parent.clone();
        }
        Ok(merged)
    }
}
