//! SQLite storage backend for ChainProjector.
//!
//! Persists entity versions, committed block headers, dynamic sources and
//! dead letters to a single SQLite file. Every block commits in one
//! transaction, so a crash leaves the store at the last fully applied block
//! and `head()` is exactly where the projector resumes.
//!
//! # Usage
//! ```rust,no_run
//! use chainprojector_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./projector.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainprojector_core::checkpoint::Checkpoint;
use chainprojector_core::entity::EntityKey;
use chainprojector_core::error::ProjectionError;
use chainprojector_core::sources::DynamicSource;
use chainprojector_core::store::{BlockCommit, DeadLetter, EntitySnapshot, EntityStore};
use chainprojector_core::types::{BlockSummary, LogId};

/// SQLite-backed versioned entity store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

fn parse_doc(raw: &str) -> Result<Value, ProjectionError> {
    serde_json::from_str(raw).map_err(|e| ProjectionError::Storage(format!("corrupt document: {e}")))
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./projector.db"`) or a full
    /// SQLite URL (`"sqlite:./projector.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ProjectionError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, ProjectionError> {
        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), ProjectionError> {
        // WAL mode — better concurrent read throughput
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entity_versions (
                entity_type  TEXT    NOT NULL,
                entity_id    TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                data         TEXT    NOT NULL,
                PRIMARY KEY (entity_type, entity_id, block_number)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                number       INTEGER PRIMARY KEY,
                hash         TEXT    NOT NULL,
                parent_hash  TEXT    NOT NULL,
                timestamp    INTEGER NOT NULL,
                committed_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sources (
                address          TEXT    PRIMARY KEY,
                template         TEXT    NOT NULL,
                created_at_block INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dead_letters (
                block_number INTEGER NOT NULL,
                tx_hash      TEXT    NOT NULL,
                log_index    INTEGER NOT NULL,
                address      TEXT    NOT NULL,
                signature    TEXT    NOT NULL,
                reason       TEXT    NOT NULL,
                PRIMARY KEY (block_number, tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        // Rollback and point-in-time reads scan by block
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_versions_block ON entity_versions (block_number);",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Total number of stored entity versions.
    pub async fn version_count(&self) -> Result<u64, ProjectionError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM entity_versions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

// ─── EntityStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl EntityStore for SqliteStorage {
    async fn get(&self, key: &EntityKey) -> Result<Option<Value>, ProjectionError> {
        self.get_at(key, i64::MAX as u64).await
    }

    async fn get_at(
        &self,
        key: &EntityKey,
        block_number: u64,
    ) -> Result<Option<Value>, ProjectionError> {
        let row = sqlx::query(
            "SELECT data FROM entity_versions
             WHERE entity_type = ? AND entity_id = ? AND block_number <= ?
             ORDER BY block_number DESC LIMIT 1",
        )
        .bind(&key.entity_type)
        .bind(&key.id)
        .bind(block_number.min(i64::MAX as u64) as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        row.map(|r| parse_doc(r.get::<&str, _>("data"))).transpose()
    }

    async fn list(&self, entity_type: &str) -> Result<Vec<Value>, ProjectionError> {
        let rows = sqlx::query(
            "SELECT v.data FROM entity_versions v
             JOIN (SELECT entity_id, MAX(block_number) AS latest
                   FROM entity_versions WHERE entity_type = ?
                   GROUP BY entity_id) l
               ON v.entity_id = l.entity_id AND v.block_number = l.latest
             WHERE v.entity_type = ?
             ORDER BY v.entity_id",
        )
        .bind(entity_type)
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        rows.iter()
            .map(|r| parse_doc(r.get::<&str, _>("data")))
            .collect()
    }

    async fn snapshot_at(&self, block_number: u64) -> Result<EntitySnapshot, ProjectionError> {
        let at = block_number.min(i64::MAX as u64) as i64;
        let rows = sqlx::query(
            "SELECT v.entity_type, v.entity_id, v.data FROM entity_versions v
             JOIN (SELECT entity_type, entity_id, MAX(block_number) AS latest
                   FROM entity_versions WHERE block_number <= ?
                   GROUP BY entity_type, entity_id) l
               ON v.entity_type = l.entity_type
              AND v.entity_id = l.entity_id
              AND v.block_number = l.latest",
        )
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        let mut snapshot = EntitySnapshot::new();
        for row in rows {
            let key = EntityKey::new(
                row.get::<String, _>("entity_type"),
                row.get::<String, _>("entity_id"),
            );
            snapshot.insert(key, parse_doc(row.get::<&str, _>("data"))?);
        }
        Ok(snapshot)
    }

    async fn commit_block(&self, commit: BlockCommit) -> Result<(), ProjectionError> {
        let number = commit.block.number as i64;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        let head: Option<i64> = sqlx::query("SELECT MAX(number) AS head FROM blocks")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?
            .get("head");
        if let Some(head) = head {
            if number <= head {
                return Err(ProjectionError::Storage(format!(
                    "commit of block {number} does not extend head {head}"
                )));
            }
        }

        let mut written = 0usize;
        for change in &commit.changes {
            let latest = sqlx::query(
                "SELECT data FROM entity_versions
                 WHERE entity_type = ? AND entity_id = ?
                 ORDER BY block_number DESC LIMIT 1",
            )
            .bind(&change.key.entity_type)
            .bind(&change.key.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

            if let Some(row) = latest {
                if parse_doc(row.get::<&str, _>("data"))? == change.data {
                    continue;
                }
            }

            sqlx::query(
                "INSERT OR REPLACE INTO entity_versions (entity_type, entity_id, block_number, data)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&change.key.entity_type)
            .bind(&change.key.id)
            .bind(number)
            .bind(change.data.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;
            written += 1;
        }

        for source in &commit.sources {
            sqlx::query(
                "INSERT OR IGNORE INTO sources (address, template, created_at_block)
                 VALUES (?, ?, ?)",
            )
            .bind(&source.address)
            .bind(&source.template)
            .bind(source.created_at_block as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;
        }

        for dead in &commit.dead_letters {
            sqlx::query(
                "INSERT OR REPLACE INTO dead_letters
                 (block_number, tx_hash, log_index, address, signature, reason)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(dead.log.block_number as i64)
            .bind(&dead.log.tx_hash)
            .bind(dead.log.log_index as i64)
            .bind(&dead.address)
            .bind(&dead.signature)
            .bind(&dead.reason)
            .execute(&mut *tx)
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;
        }

        sqlx::query(
            "INSERT INTO blocks (number, hash, parent_hash, timestamp, committed_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(number)
        .bind(&commit.block.hash)
        .bind(&commit.block.parent_hash)
        .bind(commit.block.timestamp)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        debug!(block = number, versions = written, "block committed");
        Ok(())
    }

    async fn rollback_to(&self, block_number: u64) -> Result<(), ProjectionError> {
        let at = block_number.min(i64::MAX as u64) as i64;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        for statement in [
            "DELETE FROM entity_versions WHERE block_number > ?",
            "DELETE FROM sources WHERE created_at_block > ?",
            "DELETE FROM dead_letters WHERE block_number > ?",
            "DELETE FROM blocks WHERE number > ?",
        ] {
            sqlx::query(statement)
                .bind(at)
                .execute(&mut *tx)
                .await
                .map_err(|e| ProjectionError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        debug!(block_number, "rolled back storage");
        Ok(())
    }

    async fn head(&self) -> Result<Option<Checkpoint>, ProjectionError> {
        let row = sqlx::query(
            "SELECT number, hash, committed_at FROM blocks ORDER BY number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        Ok(row.map(|r| Checkpoint {
            block_number: r.get::<i64, _>("number") as u64,
            block_hash: r.get("hash"),
            updated_at: r.get("committed_at"),
        }))
    }

    async fn recent_blocks(&self, limit: usize) -> Result<Vec<BlockSummary>, ProjectionError> {
        let rows = sqlx::query(
            "SELECT number, hash, parent_hash, timestamp FROM blocks
             ORDER BY number DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        let mut blocks: Vec<BlockSummary> = rows
            .into_iter()
            .map(|r| BlockSummary {
                number: r.get::<i64, _>("number") as u64,
                hash: r.get("hash"),
                parent_hash: r.get("parent_hash"),
                timestamp: r.get("timestamp"),
            })
            .collect();
        blocks.reverse();
        Ok(blocks)
    }

    async fn sources(&self) -> Result<Vec<DynamicSource>, ProjectionError> {
        let rows = sqlx::query(
            "SELECT address, template, created_at_block FROM sources
             ORDER BY created_at_block, address",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| DynamicSource {
                address: r.get("address"),
                template: r.get("template"),
                created_at_block: r.get::<i64, _>("created_at_block") as u64,
            })
            .collect())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, ProjectionError> {
        let rows = sqlx::query(
            "SELECT block_number, tx_hash, log_index, address, signature, reason
             FROM dead_letters ORDER BY block_number, log_index",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| DeadLetter {
                log: LogId {
                    block_number: r.get::<i64, _>("block_number") as u64,
                    log_index: r.get::<i64, _>("log_index") as u32,
                    tx_hash: r.get("tx_hash"),
                },
                address: r.get("address"),
                signature: r.get("signature"),
                reason: r.get("reason"),
            })
            .collect())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chainprojector_core::entity::EntityChange;
    use serde_json::json;

    fn block(number: u64) -> BlockSummary {
        BlockSummary {
            number,
            hash: format!("0x{number:064x}"),
            parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
            timestamp: 1_700_000_000 + number as i64 * 3,
        }
    }

    fn change(entity_type: &str, id: &str, data: Value) -> EntityChange {
        EntityChange {
            key: EntityKey::new(entity_type, id),
            data,
        }
    }

    fn commit(number: u64, changes: Vec<EntityChange>) -> BlockCommit {
        BlockCommit {
            changes,
            ..BlockCommit::empty(block(number))
        }
    }

    // ── Versions ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn versions_roundtrip() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let key = EntityKey::new("Market", "0xaaa");

        store
            .commit_block(commit(100, vec![change("Market", "0xaaa", json!({ "cash": "1" }))]))
            .await
            .unwrap();
        store
            .commit_block(commit(101, vec![change("Market", "0xaaa", json!({ "cash": "2" }))]))
            .await
            .unwrap();

        assert_eq!(store.get(&key).await.unwrap(), Some(json!({ "cash": "2" })));
        assert_eq!(store.get_at(&key, 100).await.unwrap(), Some(json!({ "cash": "1" })));
        assert!(store.get_at(&key, 99).await.unwrap().is_none());
        assert_eq!(store.version_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn identical_write_adds_no_version() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let doc = json!({ "id": "a", "n": 1 });
        store.commit_block(commit(1, vec![change("Account", "a", doc.clone())])).await.unwrap();
        store.commit_block(commit(2, vec![change("Account", "a", doc)])).await.unwrap();
        assert_eq!(store.version_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_returns_latest_per_entity() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .commit_block(commit(
                1,
                vec![
                    change("Account", "a", json!({ "id": "a", "n": 1 })),
                    change("Account", "b", json!({ "id": "b", "n": 1 })),
                    change("Market", "m", json!({ "id": "m" })),
                ],
            ))
            .await
            .unwrap();
        store
            .commit_block(commit(2, vec![change("Account", "a", json!({ "id": "a", "n": 2 }))]))
            .await
            .unwrap();

        let accounts = store.list("Account").await.unwrap();
        assert_eq!(accounts, vec![json!({ "id": "a", "n": 2 }), json!({ "id": "b", "n": 1 })]);

        let with_n1 = store.list_by_field("Account", "n", &json!(1)).await.unwrap();
        assert_eq!(with_n1.len(), 1);
    }

    #[tokio::test]
    async fn commit_must_extend_head() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.commit_block(commit(10, vec![])).await.unwrap();
        let err = store.commit_block(commit(9, vec![])).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Storage(_)));
    }

    // ── Reorg / rollback ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn rollback_restores_snapshot() {
        let store = SqliteStorage::in_memory().await.unwrap();
        for i in 100u64..=105 {
            let mut c = commit(i, vec![change("Market", "m", json!({ "block": i }))]);
            c.changes.push(change("Tx", &format!("t{i}"), json!({ "block": i })));
            c.sources.push(DynamicSource {
                address: format!("0x{i}"),
                template: "VToken".into(),
                created_at_block: i,
            });
            c.dead_letters.push(DeadLetter {
                log: LogId { block_number: i, log_index: 0, tx_hash: format!("0xt{i}") },
                address: "0xm".into(),
                signature: "Mint(address,uint256,uint256,uint256)".into(),
                reason: "bad".into(),
            });
            store.commit_block(c).await.unwrap();
        }
        let at_102 = store.snapshot_at(102).await.unwrap();

        store.rollback_to(102).await.unwrap();

        // 100, 101, 102 remain; 103–105 purged, including audit rows
        assert_eq!(store.snapshot_at(u64::MAX).await.unwrap(), at_102);
        assert_eq!(store.head().await.unwrap().unwrap().block_number, 102);
        assert_eq!(store.sources().await.unwrap().len(), 3);
        assert_eq!(store.dead_letters().await.unwrap().len(), 3);
        assert!(store.get(&EntityKey::new("Tx", "t103")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_blocks_oldest_first() {
        let store = SqliteStorage::in_memory().await.unwrap();
        for i in 1u64..=6 {
            store.commit_block(commit(i, vec![])).await.unwrap();
        }
        let recent = store.recent_blocks(4).await.unwrap();
        let numbers: Vec<u64> = recent.iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![3, 4, 5, 6]);
        assert_eq!(recent[3], block(6));
    }

    #[tokio::test]
    async fn empty_store_has_no_head() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.head().await.unwrap().is_none());
        assert!(store.recent_blocks(10).await.unwrap().is_empty());
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn head_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "chainprojector-{}-{}.db",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let path = path.to_string_lossy().to_string();

        {
            let store = SqliteStorage::open(&path).await.unwrap();
            store
                .commit_block(commit(7, vec![change("Pool", "p", json!({ "name": "Core" }))]))
                .await
                .unwrap();
            store.pool.close().await;
        }

        let reopened = SqliteStorage::open(&path).await.unwrap();
        let head = reopened.head().await.unwrap().unwrap();
        assert_eq!(head.block_number, 7);
        assert_eq!(head.block_hash, block(7).hash);
        assert_eq!(
            reopened.get(&EntityKey::new("Pool", "p")).await.unwrap(),
            Some(json!({ "name": "Core" }))
        );
        reopened.pool.close().await;
        let _ = std::fs::remove_file(&path);
    }
}
