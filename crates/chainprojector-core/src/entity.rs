//! Entity records and keys.
//!
//! Entities persist as JSON documents keyed by `(entity_type, id)`; every
//! block that changes a document adds a version tagged with that block.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ProjectionError;

/// A typed record stored in the entity store.
pub trait EntityRecord: Serialize + DeserializeOwned + Send + Sync {
    /// Entity type name, e.g. `"Market"`.
    const TYPE: &'static str;

    /// Stable identifier within the type.
    fn id(&self) -> &str;

    fn key(&self) -> EntityKey {
        EntityKey::new(Self::TYPE, self.id())
    }
}

/// `(entity_type, id)` pair addressing one entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    pub entity_type: String,
    pub id: String,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Key of the entity of type `T` with the given id.
    pub fn of<T: EntityRecord>(id: impl Into<String>) -> Self {
        Self::new(T::TYPE, id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// A new document for `key`, produced by one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityChange {
    pub key: EntityKey,
    pub data: Value,
}

/// Serialise a record into its stored document.
pub fn to_document<T: EntityRecord>(entity: &T) -> Result<Value, ProjectionError> {
    Ok(serde_json::to_value(entity)?)
}

/// Decode a stored document back into a record.
pub fn from_document<T: EntityRecord>(data: Value) -> Result<T, ProjectionError> {
    serde_json::from_value(data).map_err(|e| {
        ProjectionError::Storage(format!("corrupt {} document: {e}", T::TYPE))
    })
}
