//! Reorg detection and reconciliation.
//!
//! Two triggers lead to a reorg:
//! 1. **Hash disagreement**: an incoming block does not build on the block
//!    the projector committed at that height (parent-hash mismatch on the
//!    next block, or a different hash for an already-committed height).
//! 2. **Notification**: the provider reports a common ancestor directly.
//!
//! Either way the reconciler rolls every stateful component back to the
//! common ancestor, so the next block applied continues from exactly the
//! state a fresh replay of the new canonical chain would have produced.

use crate::accessor::ContractStateReader;
use crate::error::ProjectionError;
use crate::sources::SourceRegistry;
use crate::store::EntityStore;
use crate::tracker::BlockTracker;
use crate::types::BlockSummary;

/// Reorgs up to this many blocks deep are classified as short.
pub const SHORT_REORG_DEPTH: u64 = 3;

/// Describes a detected chain reorganization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgEvent {
    /// Highest block still canonical.
    pub common_ancestor: u64,
    /// Tracked blocks that were dropped, most recent first.
    pub dropped_blocks: Vec<BlockSummary>,
    /// Number of committed blocks rolled back.
    pub depth: u64,
    pub reorg_type: ReorgType,
}

/// Classification of the reorg type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgType {
    /// Parent hash mismatch — short reorg (1–3 blocks).
    ShortReorg,
    /// Hash mismatch deeper than a short reorg.
    DeepReorg,
    /// Reported by the provider.
    Notified,
}

impl std::fmt::Display for ReorgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortReorg => write!(f, "short reorg"),
            Self::DeepReorg => write!(f, "deep reorg"),
            Self::Notified => write!(f, "notified reorg"),
        }
    }
}

/// How an incoming block relates to what has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockCheck {
    /// Next block on the committed chain (or the first block).
    Extends,
    /// Same hash as the block already committed at that height.
    AlreadyApplied,
    /// The committed chain diverges; roll back before applying.
    Reorg(ReorgEvent),
}

/// Detects and classifies chain reorganizations.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReorgDetector;

impl ReorgDetector {
    pub fn new() -> Self {
        Self
    }

    /// Check `block` against the committed chain in `tracker`.
    ///
    /// Fails with `AncestorNotFound` if the chain diverges below the
    /// tracked window.
    pub fn check(
        &self,
        block: &BlockSummary,
        tracker: &BlockTracker,
    ) -> Result<BlockCheck, ProjectionError> {
        let Some(head) = tracker.head() else {
            return Ok(BlockCheck::Extends);
        };

        if block.number > head.number {
            if block.number > head.number + 1 || block.extends(head) {
                return Ok(BlockCheck::Extends);
            }
        } else {
            match tracker.get(block.number) {
                Some(committed) if committed.hash == block.hash => {
                    return Ok(BlockCheck::AlreadyApplied)
                }
                Some(_) => {}
                None if tracker.oldest().is_some_and(|oldest| block.number < oldest.number) => {
                    tracing::warn!(
                        block = block.number,
                        head = head.number,
                        "redelivered block below the tracked window, assuming canonical"
                    );
                    return Ok(BlockCheck::AlreadyApplied);
                }
                // A height the committed chain skipped. Canonical only if the
                // tracked block right above it builds on it.
                None => {
                    let next = tracker.blocks_after(block.number).pop();
                    if next.is_some_and(|n| n.number == block.number + 1 && n.parent_hash == block.hash) {
                        tracing::debug!(block = block.number, "skipped height is on the committed chain");
                        return Ok(BlockCheck::AlreadyApplied);
                    }
                }
            }
        }

        let ancestor = tracker
            .find_ancestor(block)
            .ok_or(ProjectionError::AncestorNotFound {
                block_number: block.number,
            })?;
        let dropped = tracker.blocks_after(ancestor.number);
        let depth = dropped.len() as u64;
        let reorg_type = if depth <= SHORT_REORG_DEPTH {
            ReorgType::ShortReorg
        } else {
            ReorgType::DeepReorg
        };
        tracing::warn!(
            depth,
            at = block.number,
            common_ancestor = ancestor.number,
            reorg_type = %reorg_type,
            "Reorg detected"
        );
        Ok(BlockCheck::Reorg(ReorgEvent {
            common_ancestor: ancestor.number,
            dropped_blocks: dropped,
            depth,
            reorg_type,
        }))
    }

    /// Build the event for a provider-reported reorg to `common_ancestor`.
    pub fn notified(&self, common_ancestor: u64, tracker: &BlockTracker) -> ReorgEvent {
        let dropped = tracker.blocks_after(common_ancestor);
        tracing::warn!(
            common_ancestor,
            depth = dropped.len(),
            "Reorg notification received"
        );
        ReorgEvent {
            common_ancestor,
            depth: dropped.len() as u64,
            dropped_blocks: dropped,
            reorg_type: ReorgType::Notified,
        }
    }
}

/// Roll store, sources, contract cache and tracker back to the event's common ancestor.
pub async fn reconcile(
    event: &ReorgEvent,
    store: &dyn EntityStore,
    sources: &mut SourceRegistry,
    reader: &ContractStateReader,
    tracker: &mut BlockTracker,
) -> Result<(), ProjectionError> {
    store.rollback_to(event.common_ancestor).await?;
    sources.rollback_to(event.common_ancestor);
    reader.clear()?;
    tracker.rewind_to(event.common_ancestor);
    tracing::info!(
        common_ancestor = event.common_ancestor,
        depth = event.depth,
        reorg_type = %event.reorg_type,
        "Rolled back to common ancestor"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(num: u64, hash: &str, parent: &str) -> BlockSummary {
        BlockSummary {
            number: num,
            hash: hash.into(),
            parent_hash: parent.into(),
            timestamp: (num * 3) as i64,
        }
    }

    fn tracker() -> BlockTracker {
        let mut t = BlockTracker::new(16);
        t.seed(vec![
            b(99, "0x99", "0x98"),
            b(100, "0xa", "0x99"),
            b(101, "0xb", "0xa"),
        ]);
        t
    }

    #[test]
    fn no_reorg_on_normal_chain() {
        let det = ReorgDetector::new();
        let check = det.check(&b(102, "0xc", "0xb"), &tracker()).unwrap();
        assert_eq!(check, BlockCheck::Extends);
    }

    #[test]
    fn redelivery_is_recognised() {
        let det = ReorgDetector::new();
        let check = det.check(&b(100, "0xa", "0x99"), &tracker()).unwrap();
        assert_eq!(check, BlockCheck::AlreadyApplied);
    }

    #[test]
    fn detects_short_reorg() {
        let det = ReorgDetector::new();
        // new 101 builds on 100, replacing the committed 101
        let check = det.check(&b(101, "0xb2", "0xa"), &tracker()).unwrap();
        let BlockCheck::Reorg(event) = check else {
            panic!("expected reorg, got {check:?}");
        };
        assert_eq!(event.common_ancestor, 100);
        assert_eq!(event.depth, 1);
        assert_eq!(event.reorg_type, ReorgType::ShortReorg);
    }

    #[test]
    fn parent_mismatch_on_next_block() {
        let det = ReorgDetector::new();
        let check = det.check(&b(102, "0xc2", "0x99-unknown"), &tracker());
        assert!(matches!(
            check,
            Err(ProjectionError::AncestorNotFound { block_number: 102 })
        ));
    }

    #[test]
    fn fork_at_skipped_height_reconciles_to_tracked_parent() {
        let det = ReorgDetector::new();
        let mut t = BlockTracker::new(16);
        t.seed(vec![b(1, "0x1", "0x0"), b(3, "0x3", "0x2")]);

        let check = det.check(&b(2, "0x2b", "0x1"), &t).unwrap();
        let BlockCheck::Reorg(event) = check else {
            panic!("expected reorg, got {check:?}");
        };
        assert_eq!(event.common_ancestor, 1);
        assert_eq!(event.depth, 1);
        assert_eq!(event.dropped_blocks[0].number, 3);
    }

    #[test]
    fn skipped_canonical_height_is_already_applied() {
        let det = ReorgDetector::new();
        let mut t = BlockTracker::new(16);
        t.seed(vec![b(1, "0x1", "0x0"), b(3, "0x3", "0x2")]);
        let check = det.check(&b(2, "0x2", "0x1"), &t).unwrap();
        assert_eq!(check, BlockCheck::AlreadyApplied);
    }

    #[test]
    fn below_window_is_assumed_canonical() {
        let det = ReorgDetector::new();
        let check = det.check(&b(50, "0x50b", "0x49"), &tracker()).unwrap();
        assert_eq!(check, BlockCheck::AlreadyApplied);
    }

    #[test]
    fn notification_lists_dropped_blocks() {
        let det = ReorgDetector::new();
        let event = det.notified(99, &tracker());
        assert_eq!(event.depth, 2);
        assert_eq!(event.reorg_type, ReorgType::Notified);
        assert_eq!(event.dropped_blocks[0].number, 101);
    }
}
