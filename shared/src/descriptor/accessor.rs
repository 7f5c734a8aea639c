use std::collections::HashMap;

use crate::{world::WorldError, Value};

pub type Getter<T> = fn(&T) -> Value;
pub type Setter<T> = fn(&mut T, Value) -> Result<(), WorldError>;

/// Per-type table of named property accessors, built once when the type is
/// registered and consulted by name afterwards.
pub struct AccessorTable<T> {
    type_name: String,
    getters: HashMap<String, Getter<T>>,
    setters: HashMap<String, Setter<T>>,
}

impl<T> AccessorTable<T> {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            getters: HashMap::new(),
            setters: HashMap::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Adds a read-write property
    pub fn field(mut self, name: &str, getter: Getter<T>, setter: Setter<T>) -> Self {
        self.getters.insert(name.to_string(), getter);
        self.setters.insert(name.to_string(), setter);
        self
    }

    /// Adds a property the peer can read but never write
    pub fn read_only(mut self, name: &str, getter: Getter<T>) -> Self {
        self.getters.insert(name.to_string(), getter);
        self
    }

    pub fn has(&self, name: &str) -> bool {
        self.getters.contains_key(name)
    }

    pub fn get(&self, target: &T, name: &str) -> Option<Value> {
        self.getters.get(name).map(|getter| getter(target))
    }

    pub fn set(&self, target: &mut T, name: &str, value: Value) -> Result<(), WorldError> {
        match self.setters.get(name) {
            Some(setter) => setter(target, value),
            None => Err(WorldError::UnknownProperty {
                type_name: self.type_name.clone(),
                property: name.to_string(),
            }),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.getters.keys().map(|name| name.as_str())
    }
}
