//! Per-block write overlay over the entity store.
//!
//! Handlers never write to the store directly. Their writes land in a log
//! overlay, which folds into the block overlay when the log succeeds and is
//! dropped when it fails. The block overlay becomes one `BlockCommit` at the
//! end of the block, so a half-applied block is never visible to readers.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::entity::{EntityChange, EntityKey};
use crate::error::ProjectionError;
use crate::store::EntityStore;

pub struct EntityCache {
    store: Arc<dyn EntityStore>,
    /// Writes of logs already applied in this block.
    block: BTreeMap<EntityKey, Value>,
    /// Writes of the log currently being applied.
    log: HashMap<EntityKey, Value>,
}

impl EntityCache {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            block: BTreeMap::new(),
            log: HashMap::new(),
        }
    }

    /// Newest visible document for `key`: this log, then this block, then the store.
    pub async fn get(&self, key: &EntityKey) -> Result<Option<Value>, ProjectionError> {
        if let Some(doc) = self.log.get(key).or_else(|| self.block.get(key)) {
            return Ok(Some(doc.clone()));
        }
        self.store.get(key).await
    }

    pub fn set(&mut self, key: EntityKey, data: Value) {
        self.log.insert(key, data);
    }

    /// Fold the current log's writes into the block.
    pub fn commit_log(&mut self) {
        self.block.extend(self.log.drain());
    }

    /// Drop the current log's writes.
    pub fn discard_log(&mut self) {
        self.log.clear();
    }

    /// Drop everything written during this block.
    pub fn discard_block(&mut self) {
        self.log.clear();
        self.block.clear();
    }

    /// Number of entities written so far in this block.
    pub fn pending(&self) -> usize {
        self.block.len()
    }

    /// Hand over the block's writes, in key order.
    pub fn take_changes(&mut self) -> Vec<EntityChange> {
        self.log.clear();
        std::mem::take(&mut self.block)
            .into_iter()
            .map(|(key, data)| EntityChange { key, data })
            .collect()
    }
}
