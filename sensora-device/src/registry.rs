//! Insertion-ordered, fixed-capacity property collection

use crate::property::Property;
use log::*;
use sensora_proto::MAX_PROPERTY_ID_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("property with id '{0}' already exists")]
    DuplicateId(String),
    #[error("maximum properties reached ({0})")]
    Full(usize),
    #[error("invalid property id '{0}'")]
    InvalidId(String),
}

/// Stable index of a registered property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyHandle(usize);

#[derive(Debug)]
pub struct PropertyRegistry {
    properties: Vec<Property>,
    capacity: usize,
}

impl PropertyRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            properties: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn register(&mut self, property: Property) -> Result<PropertyHandle, RegistryError> {
        let id = property.id();
        let err = if id.is_empty() || id.len() > MAX_PROPERTY_ID_LEN || id.contains([',', ';']) {
            Some(RegistryError::InvalidId(id.to_string()))
        } else if self.find_by_id(id).is_some() {
            Some(RegistryError::DuplicateId(id.to_string()))
        } else if self.properties.len() >= self.capacity {
            Some(RegistryError::Full(self.capacity))
        } else {
            None
        };
        if let Some(err) = err {
            warn!("{err}");
            return Err(err);
        }

        debug!("registered property '{}'", property.id());
        self.properties.push(property);
        Ok(PropertyHandle(self.properties.len() - 1))
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.id() == id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.id() == id)
    }

    pub fn get(&self, handle: PropertyHandle) -> Option<&Property> {
        self.properties.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: PropertyHandle) -> Option<&mut Property> {
        self.properties.get_mut(handle.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Property> {
        self.properties.iter_mut()
    }

    /// Comma-joined ids in registration order, stopping before `max_len` would be exceeded
    pub fn identifiers(&self, max_len: usize) -> String {
        let mut out = String::new();
        for p in &self.properties {
            let extra = usize::from(!out.is_empty()) + p.id().len();
            if out.len() + extra > max_len {
                break;
            }
            if !out.is_empty() {
                out.push(',');
            }
            out.push_str(p.id());
        }
        out
    }
}
