//! Block tracker — maintains a sliding window of recently committed block
//! headers for parent-hash verification and common-ancestor lookup.

use std::collections::VecDeque;

use crate::types::BlockSummary;

/// Information about a single tracked block.
pub type BlockInfo = BlockSummary;

/// Tracks the last N committed block headers.
///
/// When a block arrives directly after the head, its `parent_hash` must
/// match the head's hash; a mismatch means the chain reorganised. Blocks
/// that skip numbers (providers omit blocks without relevant logs) cannot
/// be verified and are accepted.
pub struct BlockTracker {
    /// Sliding window of recent blocks (oldest first).
    window: VecDeque<BlockInfo>,
    /// Maximum number of blocks to retain.
    window_size: usize,
}

impl BlockTracker {
    /// Create a new tracker with the given window size.
    /// A window of 128 covers deep reorgs for all major EVM chains.
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
        }
    }

    /// Replace the window with `blocks` (oldest first), e.g. on resume.
    pub fn seed(&mut self, blocks: Vec<BlockInfo>) {
        self.window.clear();
        for block in blocks {
            self.insert(block);
        }
    }

    /// Add a new block to the tracker.
    ///
    /// Returns `false`, leaving the window untouched, if the block directly
    /// follows the head but does not extend it.
    pub fn push(&mut self, block: BlockInfo) -> bool {
        if let Some(head) = self.window.back() {
            if block.number == head.number + 1 && !block.extends(head) {
                return false;
            }
        }
        self.insert(block);
        true
    }

    fn insert(&mut self, block: BlockInfo) {
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(block);
    }

    /// Returns the current chain head (most recently added block).
    pub fn head(&self) -> Option<&BlockInfo> {
        self.window.back()
    }

    /// Oldest block still in the window.
    pub fn oldest(&self) -> Option<&BlockInfo> {
        self.window.front()
    }

    /// Returns a block by number if it's in the window.
    pub fn get(&self, number: u64) -> Option<&BlockInfo> {
        self.window.iter().rev().find(|b| b.number == number)
    }

    /// The tracked block `block` builds on, if it is still in the window.
    pub fn find_ancestor(&self, block: &BlockInfo) -> Option<&BlockInfo> {
        self.window
            .iter()
            .rev()
            .find(|tracked| tracked.hash == block.parent_hash && tracked.number < block.number)
    }

    /// Tracked blocks after `block_number`, most recent first.
    pub fn blocks_after(&self, block_number: u64) -> Vec<BlockInfo> {
        self.window
            .iter()
            .rev()
            .take_while(|b| b.number > block_number)
            .cloned()
            .collect()
    }

    /// Tracked blocks, oldest first.
    pub fn blocks(&self) -> Vec<BlockInfo> {
        self.window.iter().cloned().collect()
    }

    /// Number of blocks in the window.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Returns `true` if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Rewind the tracker to a given block number (discard everything after it).
    pub fn rewind_to(&mut self, block_number: u64) {
        while let Some(back) = self.window.back() {
            if back.number > block_number {
                self.window.pop_back();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, hash: &str, parent: &str) -> BlockInfo {
        BlockSummary {
            number,
            hash: hash.into(),
            parent_hash: parent.into(),
            timestamp: (number * 3) as i64,
        }
    }

    fn chain(from: u64, to: u64) -> Vec<BlockInfo> {
        (from..=to)
            .map(|i| block(i, &format!("0x{i}"), &format!("0x{}", i - 1)))
            .collect()
    }

    #[test]
    fn push_normal_chain() {
        let mut tracker = BlockTracker::new(10);
        assert!(tracker.push(block(100, "0xa", "0x0")));
        assert!(tracker.push(block(101, "0xb", "0xa")));
        assert!(tracker.push(block(102, "0xc", "0xb")));
        assert_eq!(tracker.head().unwrap().number, 102);
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn push_detects_reorg() {
        let mut tracker = BlockTracker::new(10);
        assert!(tracker.push(block(100, "0xa", "0x0")));
        assert!(tracker.push(block(101, "0xb", "0xa")));
        assert!(!tracker.push(block(102, "0xc2", "0xb-different")), "should detect reorg");
        assert_eq!(tracker.head().unwrap().number, 101);
    }

    #[test]
    fn gaps_are_accepted() {
        let mut tracker = BlockTracker::new(10);
        assert!(tracker.push(block(100, "0xa", "0x0")));
        assert!(tracker.push(block(105, "0xf", "0xe")));
        assert_eq!(tracker.head().unwrap().number, 105);
    }

    #[test]
    fn ancestor_lookup() {
        let mut tracker = BlockTracker::new(10);
        tracker.seed(chain(100, 105));
        let fork = block(103, "0x103b", "0x102");
        assert_eq!(tracker.find_ancestor(&fork).unwrap().number, 102);
        let orphan = block(103, "0x103b", "0xdead");
        assert!(tracker.find_ancestor(&orphan).is_none());

        let dropped: Vec<_> = tracker.blocks_after(102).iter().map(|b| b.number).collect();
        assert_eq!(dropped, vec![105, 104, 103]);
    }

    #[test]
    fn rewind_to() {
        let mut tracker = BlockTracker::new(20);
        tracker.seed(chain(100, 110));
        assert_eq!(tracker.head().unwrap().number, 110);
        tracker.rewind_to(105);
        assert_eq!(tracker.head().unwrap().number, 105);
    }

    #[test]
    fn window_size_enforced() {
        let mut tracker = BlockTracker::new(5);
        for b in chain(1, 10) {
            assert!(tracker.push(b));
        }
        assert_eq!(tracker.len(), 5); // oldest blocks evicted
        assert_eq!(tracker.blocks().first().unwrap().number, 6);
        assert_eq!(tracker.oldest().unwrap().number, 6);
    }
}
