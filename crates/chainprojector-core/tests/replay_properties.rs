//! Property tests: redelivery and reorg replay converge on the state a
//! fresh projector reaches on the canonical chain.

use async_trait::async_trait;
use chainprojector_core::{
    Block, BlockSummary, EntityRecord, EntityStore, HandlerContext, LogEvent, MemoryEntityStore,
    Projection, ProjectionError, Projector, ProjectorBuilder, RecordedCaller, RoutingTable,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const LEDGER: &str = "0x000000000000000000000000000000000000beef";

// ─── Test projection ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Balance {
    id: String,
    amount: u64,
    last_log: Option<String>,
}

impl EntityRecord for Balance {
    const TYPE: &'static str = "Balance";
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Credit {
    id: String,
    account: String,
    amount: u64,
}

impl EntityRecord for Credit {
    const TYPE: &'static str = "Credit";
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Deserialize)]
struct CreditArgs {
    account: String,
    amount: u64,
}

struct Ledger;

#[async_trait]
impl Projection for Ledger {
    type Kind = ();

    fn name(&self) -> &str {
        "ledger"
    }

    fn routes(&self) -> RoutingTable<()> {
        RoutingTable::new().apply("Ledger", "Credit(address,uint256)", ())
    }

    async fn apply(
        &self,
        _kind: (),
        log: &LogEvent,
        cx: &mut HandlerContext<'_>,
    ) -> Result<(), ProjectionError> {
        let args: CreditArgs = log.decode()?;
        let log_id = log.id().to_string();
        let (mut balance, _) = cx
            .get_or_create(&args.account, || Balance {
                id: args.account.clone(),
                amount: 0,
                last_log: None,
            })
            .await?;
        balance.amount += args.amount;
        balance.last_log = Some(log_id.clone());
        cx.save(&balance)?;
        cx.save(&Credit {
            id: log_id,
            account: args.account,
            amount: args.amount,
        })
    }
}

// ─── Chain construction ───────────────────────────────────────────────────────

type Credits = Vec<(u8, u64)>;

fn build_chain(first: u64, parent: &str, fork: &str, blocks: &[Credits]) -> Vec<Block> {
    let mut parent = parent.to_string();
    blocks
        .iter()
        .enumerate()
        .map(|(i, credits)| {
            let number = first + i as u64;
            let header = BlockSummary {
                number,
                hash: format!("0x{fork}{number}"),
                parent_hash: parent.clone(),
                timestamp: number as i64 * 3,
            };
            parent = header.hash.clone();
            let logs = credits
                .iter()
                .enumerate()
                .map(|(idx, (account, amount))| LogEvent {
                    block_number: number,
                    block_timestamp: header.timestamp,
                    tx_hash: format!("0x{fork}tx{number}"),
                    log_index: idx as u32,
                    address: LEDGER.into(),
                    signature: "Credit(address,uint256)".into(),
                    params: json!({ "account": format!("acct{account}"), "amount": amount }),
                })
                .collect();
            Block::new(header, logs)
        })
        .collect()
}

fn projector() -> Projector<Ledger> {
    let config = ProjectorBuilder::new()
        .id("ledger")
        .start_block(1)
        .source(LEDGER, "Ledger")
        .build_config();
    Projector::new(
        config,
        Ledger,
        Arc::new(MemoryEntityStore::new()),
        Arc::new(RecordedCaller::new()),
    )
}

async fn apply_all(p: &mut Projector<Ledger>, blocks: &[Block]) {
    for block in blocks {
        p.apply_block(block.clone()).await.unwrap();
    }
}

fn blocks_strategy() -> impl Strategy<Value = Vec<Credits>> {
    prop::collection::vec(
        prop::collection::vec((0u8..4, 1u64..1_000), 0..5),
        1..7,
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn redelivery_does_not_change_state(blocks in blocks_strategy()) {
        runtime().block_on(async {
            let chain = build_chain(1, "0x0", "a", &blocks);
            let mut p = projector();
            apply_all(&mut p, &chain).await;
            let once = p.store().snapshot_at(u64::MAX).await.unwrap();

            apply_all(&mut p, &chain).await;
            let twice = p.store().snapshot_at(u64::MAX).await.unwrap();
            assert_eq!(once, twice);
        });
    }

    #[test]
    fn reorg_replay_matches_fresh_projection(
        blocks in blocks_strategy(),
        alternate in blocks_strategy(),
        keep in 0usize..6,
    ) {
        let keep = keep.min(blocks.len());
        runtime().block_on(async {
            let original = build_chain(1, "0x0", "a", &blocks);
            let prefix = &original[..keep];
            let parent = prefix.last().map(|b| b.header.hash.clone()).unwrap_or_else(|| "0x0".into());
            let fork = build_chain(keep as u64 + 1, &parent, "b", &alternate);

            let mut reorged = projector();
            apply_all(&mut reorged, &original).await;
            reorged.rollback_to(keep as u64).await.unwrap();
            apply_all(&mut reorged, &fork).await;

            let mut fresh = projector();
            apply_all(&mut fresh, prefix).await;
            apply_all(&mut fresh, &fork).await;

            let a = reorged.store().snapshot_at(u64::MAX).await.unwrap();
            let b = fresh.store().snapshot_at(u64::MAX).await.unwrap();
            assert_eq!(a, b);
            assert_eq!(
                reorged.head().map(|h| h.block_number),
                fresh.head().map(|h| h.block_number)
            );
        });
    }

    #[test]
    fn hash_fork_reconciles_without_notification(
        blocks in blocks_strategy(),
        alternate in blocks_strategy(),
    ) {
        runtime().block_on(async {
            let original = build_chain(1, "0x0", "a", &blocks);
            // fork after the first block, detected from hashes alone
            let fork = build_chain(2, &original[0].header.hash, "b", &alternate);

            let mut reorged = projector();
            apply_all(&mut reorged, &original).await;
            apply_all(&mut reorged, &fork).await;

            let mut fresh = projector();
            apply_all(&mut fresh, &original[..1]).await;
            apply_all(&mut fresh, &fork).await;

            let a = reorged.store().snapshot_at(u64::MAX).await.unwrap();
            let b = fresh.store().snapshot_at(u64::MAX).await.unwrap();
            assert_eq!(a, b);
        });
    }
}
