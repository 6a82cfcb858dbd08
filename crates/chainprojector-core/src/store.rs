//! Versioned entity store.
//!
//! Every committed block adds one version per entity it changed. Reads see
//! the latest committed version; `get_at` and `snapshot_at` see the state as
//! of a past block; `rollback_to` forgets everything after a block. Blocks
//! commit atomically, so readers never observe a block half-applied.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::checkpoint::Checkpoint;
use crate::entity::{EntityChange, EntityKey};
use crate::error::ProjectionError;
use crate::sources::DynamicSource;
use crate::types::{BlockSummary, LogId};

/// Point-in-time view of every entity.
pub type EntitySnapshot = BTreeMap<EntityKey, Value>;

/// A log that failed without aborting its block, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub log: LogId,
    pub address: String,
    pub signature: String,
    pub reason: String,
}

/// Everything one block produces, written in a single atomic step.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockCommit {
    pub block: BlockSummary,
    pub changes: Vec<EntityChange>,
    pub sources: Vec<DynamicSource>,
    pub dead_letters: Vec<DeadLetter>,
}

impl BlockCommit {
    pub fn empty(block: BlockSummary) -> Self {
        Self {
            block,
            changes: vec![],
            sources: vec![],
            dead_letters: vec![],
        }
    }
}

/// Durable storage for entity versions, block pointers and dynamic sources.
///
/// Implementations include `MemoryEntityStore` and `SqliteStorage`.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Latest committed document for `key`.
    async fn get(&self, key: &EntityKey) -> Result<Option<Value>, ProjectionError>;

    /// Document for `key` as of the end of `block_number`.
    async fn get_at(
        &self,
        key: &EntityKey,
        block_number: u64,
    ) -> Result<Option<Value>, ProjectionError>;

    /// Latest document of every entity of `entity_type`, ordered by id.
    async fn list(&self, entity_type: &str) -> Result<Vec<Value>, ProjectionError>;

    /// Latest documents of `entity_type` whose top-level `field` equals `value`.
    async fn list_by_field(
        &self,
        entity_type: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, ProjectionError> {
        Ok(self
            .list(entity_type)
            .await?
            .into_iter()
            .filter(|doc| doc.get(field) == Some(value))
            .collect())
    }

    /// Every entity as of the end of `block_number`.
    async fn snapshot_at(&self, block_number: u64) -> Result<EntitySnapshot, ProjectionError>;

    /// Atomically persist one block. Blocks must commit in ascending order.
    async fn commit_block(&self, commit: BlockCommit) -> Result<(), ProjectionError>;

    /// Discard every version, source, dead letter and block pointer after `block_number`.
    async fn rollback_to(&self, block_number: u64) -> Result<(), ProjectionError>;

    /// The last committed block.
    async fn head(&self) -> Result<Option<Checkpoint>, ProjectionError>;

    /// The most recent committed block headers, oldest first.
    async fn recent_blocks(&self, limit: usize) -> Result<Vec<BlockSummary>, ProjectionError>;

    /// All persisted dynamic sources.
    async fn sources(&self) -> Result<Vec<DynamicSource>, ProjectionError>;

    /// All persisted dead letters, in chain order.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, ProjectionError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    /// Versions per entity, ascending by block.
    versions: BTreeMap<EntityKey, Vec<(u64, Value)>>,
    blocks: BTreeMap<u64, (BlockSummary, i64)>,
    sources: Vec<DynamicSource>,
    dead_letters: Vec<DeadLetter>,
}

/// In-memory entity store for tests and ephemeral projectors.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryEntityStore {
    state: Mutex<MemoryState>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, ProjectionError> {
        self.state
            .lock()
            .map_err(|_| ProjectionError::Storage("memory store lock poisoned".into()))
    }

    /// Total number of stored versions across all entities.
    pub fn version_count(&self) -> usize {
        self.state()
            .map(|s| s.versions.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

fn version_at(history: &[(u64, Value)], block_number: u64) -> Option<&Value> {
    history
        .iter()
        .rev()
        .find(|(b, _)| *b <= block_number)
        .map(|(_, v)| v)
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn get(&self, key: &EntityKey) -> Result<Option<Value>, ProjectionError> {
        let state = self.state()?;
        Ok(state
            .versions
            .get(key)
            .and_then(|h| h.last())
            .map(|(_, v)| v.clone()))
    }

    async fn get_at(
        &self,
        key: &EntityKey,
        block_number: u64,
    ) -> Result<Option<Value>, ProjectionError> {
        let state = self.state()?;
        Ok(state
            .versions
            .get(key)
            .and_then(|h| version_at(h, block_number))
            .cloned())
    }

    async fn list(&self, entity_type: &str) -> Result<Vec<Value>, ProjectionError> {
        let state = self.state()?;
        Ok(state
            .versions
            .iter()
            .filter(|(k, _)| k.entity_type == entity_type)
            .filter_map(|(_, h)| h.last().map(|(_, v)| v.clone()))
            .collect())
    }

    async fn snapshot_at(&self, block_number: u64) -> Result<EntitySnapshot, ProjectionError> {
        let state = self.state()?;
        Ok(state
            .versions
            .iter()
            .filter_map(|(k, h)| version_at(h, block_number).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn commit_block(&self, commit: BlockCommit) -> Result<(), ProjectionError> {
        let mut state = self.state()?;
        let number = commit.block.number;
        if let Some((&head, _)) = state.blocks.iter().next_back() {
            if number <= head {
                return Err(ProjectionError::Storage(format!(
                    "commit of block {number} does not extend head {head}"
                )));
            }
        }

        for change in commit.changes {
            let history = state.versions.entry(change.key).or_default();
            match history.last_mut() {
                Some((_, latest)) if *latest == change.data => {}
                Some((block, latest)) if *block == number => *latest = change.data,
                _ => history.push((number, change.data)),
            }
        }
        state.sources.extend(commit.sources);
        state.dead_letters.extend(commit.dead_letters);
        state
            .blocks
            .insert(number, (commit.block, chrono::Utc::now().timestamp()));

        tracing::debug!(block = number, "memory store committed block");
        Ok(())
    }

    async fn rollback_to(&self, block_number: u64) -> Result<(), ProjectionError> {
        let mut state = self.state()?;
        for history in state.versions.values_mut() {
            history.retain(|(b, _)| *b <= block_number);
        }
        state.versions.retain(|_, h| !h.is_empty());
        state.sources.retain(|s| s.created_at_block <= block_number);
        state.dead_letters.retain(|d| d.log.block_number <= block_number);
        state.blocks.retain(|n, _| *n <= block_number);
        tracing::debug!(block = block_number, "memory store rolled back");
        Ok(())
    }

    async fn head(&self) -> Result<Option<Checkpoint>, ProjectionError> {
        let state = self.state()?;
        Ok(state.blocks.values().next_back().map(|(block, at)| Checkpoint {
            block_number: block.number,
            block_hash: block.hash.clone(),
            updated_at: *at,
        }))
    }

    async fn recent_blocks(&self, limit: usize) -> Result<Vec<BlockSummary>, ProjectionError> {
        let state = self.state()?;
        let mut out: Vec<_> = state
            .blocks
            .values()
            .rev()
            .take(limit)
            .map(|(b, _)| b.clone())
            .collect();
        out.reverse();
        Ok(out)
    }

    async fn sources(&self) -> Result<Vec<DynamicSource>, ProjectionError> {
        Ok(self.state()?.sources.clone())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, ProjectionError> {
        Ok(self.state()?.dead_letters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block(number: u64) -> BlockSummary {
        BlockSummary {
            number,
            hash: format!("0x{number:x}"),
            parent_hash: format!("0x{:x}", number.saturating_sub(1)),
            timestamp: (number * 3) as i64,
        }
    }

    fn commit(number: u64, changes: Vec<(&str, Value)>) -> BlockCommit {
        BlockCommit {
            changes: changes
                .into_iter()
                .map(|(id, data)| EntityChange {
                    key: EntityKey::new("Market", id),
                    data,
                })
                .collect(),
            ..BlockCommit::empty(block(number))
        }
    }

    #[tokio::test]
    async fn versions_are_block_scoped() {
        let store = MemoryEntityStore::new();
        store.commit_block(commit(10, vec![("m", json!({ "v": 1 }))])).await.unwrap();
        store.commit_block(commit(12, vec![("m", json!({ "v": 2 }))])).await.unwrap();

        let key = EntityKey::new("Market", "m");
        assert_eq!(store.get(&key).await.unwrap(), Some(json!({ "v": 2 })));
        assert_eq!(store.get_at(&key, 11).await.unwrap(), Some(json!({ "v": 1 })));
        assert_eq!(store.get_at(&key, 9).await.unwrap(), None);
        assert_eq!(store.head().await.unwrap().unwrap().block_number, 12);
    }

    #[tokio::test]
    async fn identical_write_is_a_noop() {
        let store = MemoryEntityStore::new();
        store.commit_block(commit(1, vec![("m", json!({ "v": 1 }))])).await.unwrap();
        store.commit_block(commit(2, vec![("m", json!({ "v": 1 }))])).await.unwrap();
        assert_eq!(store.version_count(), 1);
    }

    #[tokio::test]
    async fn commits_must_ascend() {
        let store = MemoryEntityStore::new();
        store.commit_block(commit(5, vec![])).await.unwrap();
        let err = store.commit_block(commit(5, vec![])).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Storage(_)));
    }

    #[tokio::test]
    async fn rollback_discards_later_versions() {
        let store = MemoryEntityStore::new();
        store.commit_block(commit(1, vec![("a", json!(1))])).await.unwrap();
        let mut c2 = commit(2, vec![("a", json!(2)), ("b", json!(1))]);
        c2.sources.push(DynamicSource {
            address: "0xb".into(),
            template: "VToken".into(),
            created_at_block: 2,
        });
        store.commit_block(c2).await.unwrap();

        let before = store.snapshot_at(1).await.unwrap();
        store.rollback_to(1).await.unwrap();

        assert_eq!(store.snapshot_at(u64::MAX).await.unwrap(), before);
        assert!(store.sources().await.unwrap().is_empty());
        assert_eq!(store.head().await.unwrap().unwrap().block_number, 1);
        assert!(store.get(&EntityKey::new("Market", "b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_field_filters_latest_documents() {
        let store = MemoryEntityStore::new();
        store
            .commit_block(commit(
                1,
                vec![
                    ("a", json!({ "pool": "0x1" })),
                    ("b", json!({ "pool": "0x2" })),
                    ("c", json!({ "pool": "0x1" })),
                ],
            ))
            .await
            .unwrap();
        let hits = store.list_by_field("Market", "pool", &json!("0x1")).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn recent_blocks_oldest_first() {
        let store = MemoryEntityStore::new();
        for n in 1..=5 {
            store.commit_block(commit(n, vec![])).await.unwrap();
        }
        let recent = store.recent_blocks(3).await.unwrap();
        let numbers: Vec<_> = recent.iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![3, 4, 5]);
    }
}
