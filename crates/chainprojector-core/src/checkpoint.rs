//! Checkpoint — the last block whose writes were committed.
//!
//! The entity store derives the checkpoint from its block table, so the
//! projector always resumes from exactly the state it last made visible.

use serde::{Deserialize, Serialize};

use crate::types::BlockSummary;

/// A committed position in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Last committed block number.
    pub block_number: u64,
    /// Last committed block hash.
    pub block_hash: String,
    /// Unix timestamp of when the block was committed.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn for_block(block: &BlockSummary) -> Self {
        Self {
            block_number: block.number,
            block_hash: block.hash.clone(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// The next block the projector expects.
    pub fn next_block(&self) -> u64 {
        self.block_number + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_tracks_block() {
        let block = BlockSummary {
            number: 500,
            hash: "0x123".into(),
            parent_hash: "0x122".into(),
            timestamp: 6000,
        };
        let cp = Checkpoint::for_block(&block);
        assert_eq!(cp.block_number, 500);
        assert_eq!(cp.block_hash, "0x123");
        assert_eq!(cp.next_block(), 501);
        assert!(cp.updated_at > 0);
    }
}
