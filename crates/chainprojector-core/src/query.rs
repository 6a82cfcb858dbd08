//! Read-only query interface for downstream consumers.
//!
//! Queries only ever see committed blocks.

use serde_json::Value;
use std::sync::Arc;

use crate::checkpoint::Checkpoint;
use crate::entity::{from_document, EntityKey, EntityRecord};
use crate::error::ProjectionError;
use crate::store::EntityStore;

#[derive(Clone)]
pub struct EntityQuery {
    store: Arc<dyn EntityStore>,
}

impl EntityQuery {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn get_entity<T: EntityRecord>(&self, id: &str) -> Result<Option<T>, ProjectionError> {
        self.store
            .get(&EntityKey::of::<T>(id))
            .await?
            .map(from_document)
            .transpose()
    }

    /// The entity as it was at the end of `block_number`.
    pub async fn get_entity_at<T: EntityRecord>(
        &self,
        id: &str,
        block_number: u64,
    ) -> Result<Option<T>, ProjectionError> {
        self.store
            .get_at(&EntityKey::of::<T>(id), block_number)
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn list<T: EntityRecord>(&self) -> Result<Vec<T>, ProjectionError> {
        self.store
            .list(T::TYPE)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Entities of type `T` whose `field` (a foreign key) equals `value`.
    pub async fn list_by_relation<T: EntityRecord>(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Vec<T>, ProjectionError> {
        self.store
            .list_by_field(T::TYPE, field, &Value::String(value.to_string()))
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    pub async fn head(&self) -> Result<Option<Checkpoint>, ProjectionError> {
        self.store.head().await
    }
}
