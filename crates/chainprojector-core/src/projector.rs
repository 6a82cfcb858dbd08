//! The projector — applies blocks of logs to the entity store, one log at
//! a time, in chain order.
//!
//! # Per-log state machine
//!
//! ```text
//! Received → Routed → Applied
//!    │          ├───→ Failed   (dead letter, block continues)
//!    └──────────┴───→ Skipped  (untracked address, unroutable or Skip route)
//! ```
//!
//! # Per-block flow
//!
//! 1. Refuse if halted; process pending reorg notifications.
//! 2. Compare the block with the committed chain: redelivered blocks are
//!    skipped, forks are reconciled to the common ancestor first.
//! 3. Apply logs by ascending log index against a block-private overlay.
//!    A reorg notification between two logs abandons the block.
//! 4. Commit entity versions, new sources, dead letters and the block
//!    pointer in one atomic store write.

use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::accessor::{CallDiagnostic, ContractCaller, ContractStateReader};
use crate::cache::EntityCache;
use crate::checkpoint::Checkpoint;
use crate::config::{ProjectorConfig, ProjectorState};
use crate::error::ProjectionError;
use crate::handler::{HandlerContext, Projection, Route, RoutingTable, Scope};
use crate::reorg::{self, BlockCheck, ReorgDetector, ReorgEvent};
use crate::sources::SourceRegistry;
use crate::store::{BlockCommit, DeadLetter, EntityStore};
use crate::tracker::BlockTracker;
use crate::types::{Block, ChainEvent, EventContext, LogEvent, LogId};

// ─── Reports ──────────────────────────────────────────────────────────────────

/// Position of a log in the dispatch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    Received,
    Routed,
    Applied,
    Skipped,
    Failed,
}

/// What happened to one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogReport {
    pub log: LogId,
    pub address: String,
    pub signature: String,
    pub status: LogStatus,
    pub error: Option<String>,
}

/// Summary of one committed block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockReport {
    pub block_number: u64,
    pub logs: Vec<LogReport>,
    pub entities_written: usize,
    pub sources_registered: usize,
    /// Contract calls that reverted and were replaced by zero.
    pub diagnostics: Vec<CallDiagnostic>,
    /// Set when the block replaced part of the committed chain.
    pub reorg: Option<ReorgEvent>,
}

impl BlockReport {
    fn count(&self, status: LogStatus) -> usize {
        self.logs.iter().filter(|l| l.status == status).count()
    }

    pub fn applied(&self) -> usize {
        self.count(LogStatus::Applied)
    }

    pub fn skipped(&self) -> usize {
        self.count(LogStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(LogStatus::Failed)
    }
}

/// Result of handing a block to the projector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Committed(BlockReport),
    /// The same block is already committed; nothing changed.
    AlreadyApplied { block_number: u64 },
    /// A reorg notification arrived mid-block; the block was abandoned and
    /// the store rolled back.
    Interrupted { event: ReorgEvent },
}

// ─── Reorg handle ─────────────────────────────────────────────────────────────

/// Sends reorg notifications to a running projector from another task.
///
/// The projector checks for notifications before every log, so one
/// arriving mid-block cancels the rest of that block.
#[derive(Debug, Clone)]
pub struct ReorgHandle {
    tx: mpsc::UnboundedSender<u64>,
}

impl ReorgHandle {
    /// Report that every block after `common_ancestor` is no longer canonical.
    ///
    /// Returns `false` if the projector has been dropped.
    pub fn notify(&self, common_ancestor: u64) -> bool {
        self.tx.send(common_ancestor).is_ok()
    }
}

// ─── Projector ────────────────────────────────────────────────────────────────

pub struct Projector<P: Projection> {
    config: ProjectorConfig,
    projection: P,
    routes: RoutingTable<P::Kind>,
    store: Arc<dyn EntityStore>,
    reader: ContractStateReader,
    sources: SourceRegistry,
    tracker: BlockTracker,
    detector: ReorgDetector,
    head: Option<Checkpoint>,
    state: ProjectorState,
    halt: Option<String>,
    reorg_tx: mpsc::UnboundedSender<u64>,
    reorg_rx: mpsc::UnboundedReceiver<u64>,
}

impl<P: Projection> Projector<P> {
    pub fn new(
        config: ProjectorConfig,
        projection: P,
        store: Arc<dyn EntityStore>,
        caller: Arc<dyn ContractCaller>,
    ) -> Self {
        let (reorg_tx, reorg_rx) = mpsc::unbounded_channel();
        let sources = SourceRegistry::new(
            config
                .sources
                .iter()
                .map(|s| (s.address.clone(), s.template.clone())),
        );
        Self {
            routes: projection.routes(),
            projection,
            store,
            reader: ContractStateReader::new(caller),
            sources,
            tracker: BlockTracker::new(config.tracker_window),
            detector: ReorgDetector::new(),
            head: None,
            state: ProjectorState::Idle,
            halt: None,
            reorg_tx,
            reorg_rx,
            config,
        }
    }

    /// Create a projector and resume from the store's last committed block.
    pub async fn open(
        config: ProjectorConfig,
        projection: P,
        store: Arc<dyn EntityStore>,
        caller: Arc<dyn ContractCaller>,
    ) -> Result<Self, ProjectionError> {
        let mut projector = Self::new(config, projection, store, caller);
        projector.resume().await?;
        Ok(projector)
    }

    /// Reload head, recent block headers and dynamic sources from the store.
    pub async fn resume(&mut self) -> Result<Option<Checkpoint>, ProjectionError> {
        self.head = self.store.head().await?;
        self.tracker
            .seed(self.store.recent_blocks(self.config.tracker_window).await?);
        self.sources.restore(self.store.sources().await?);
        match &self.head {
            Some(cp) => tracing::info!(
                projector = %self.config.id,
                block = cp.block_number,
                hash = %cp.block_hash,
                sources = self.sources.len(),
                "Resuming from checkpoint"
            ),
            None => tracing::info!(
                projector = %self.config.id,
                start_block = self.config.start_block,
                "Starting from an empty store"
            ),
        }
        Ok(self.head.clone())
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn routes(&self) -> &RoutingTable<P::Kind> {
        &self.routes
    }

    pub fn store(&self) -> Arc<dyn EntityStore> {
        self.store.clone()
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn head(&self) -> Option<&Checkpoint> {
        self.head.as_ref()
    }

    pub fn state(&self) -> ProjectorState {
        self.state
    }

    /// The next block the projector expects.
    pub fn next_block(&self) -> u64 {
        self.head
            .as_ref()
            .map(Checkpoint::next_block)
            .unwrap_or(self.config.start_block)
    }

    pub fn reorg_handle(&self) -> ReorgHandle {
        ReorgHandle {
            tx: self.reorg_tx.clone(),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt.as_deref()
    }

    /// Release a halt after the operator has dealt with its cause.
    pub fn clear_halt(&mut self) {
        if let Some(reason) = self.halt.take() {
            tracing::info!(%reason, "Halt cleared");
            self.state = ProjectorState::Idle;
        }
    }

    // ─── Stream driver ────────────────────────────────────────────────────────

    /// Consume chain events until the stream ends or a block fails.
    pub async fn run<S>(&mut self, mut events: S) -> Result<(), ProjectionError>
    where
        S: Stream<Item = ChainEvent> + Unpin,
    {
        while let Some(event) = events.next().await {
            match event {
                ChainEvent::Block(block) => {
                    self.apply_block(block).await?;
                }
                ChainEvent::Reorg { common_ancestor } => {
                    self.rollback_to(common_ancestor).await?;
                }
            }
        }
        if !self.is_halted() {
            self.state = ProjectorState::Stopped;
        }
        Ok(())
    }

    // ─── Reorgs ───────────────────────────────────────────────────────────────

    /// Roll everything back to `common_ancestor`. Allowed while halted.
    pub async fn rollback_to(&mut self, common_ancestor: u64) -> Result<ReorgEvent, ProjectionError> {
        let event = self.detector.notified(common_ancestor, &self.tracker);
        self.reconcile(&event).await?;
        Ok(event)
    }

    async fn reconcile(&mut self, event: &ReorgEvent) -> Result<(), ProjectionError> {
        self.state = ProjectorState::ReorgRecovery;
        reorg::reconcile(
            event,
            self.store.as_ref(),
            &mut self.sources,
            &self.reader,
            &mut self.tracker,
        )
        .await?;
        self.head = self.store.head().await?;
        if self.tracker.is_empty() {
            self.tracker
                .seed(self.store.recent_blocks(self.config.tracker_window).await?);
        }
        self.state = if self.is_halted() {
            ProjectorState::Halted
        } else {
            ProjectorState::Running
        };
        Ok(())
    }

    /// Lowest common ancestor among queued notifications.
    fn pending_reorg(&mut self) -> Option<u64> {
        let mut ancestor: Option<u64> = None;
        while let Ok(a) = self.reorg_rx.try_recv() {
            ancestor = Some(ancestor.map_or(a, |b| b.min(a)));
        }
        ancestor
    }

    // ─── Block application ────────────────────────────────────────────────────

    /// Apply one block atomically.
    pub async fn apply_block(&mut self, block: Block) -> Result<BlockOutcome, ProjectionError> {
        if let Some(reason) = &self.halt {
            return Err(ProjectionError::Halted {
                reason: reason.clone(),
            });
        }
        if let Some(ancestor) = self.pending_reorg() {
            self.rollback_to(ancestor).await?;
        }

        let number = block.number();
        let reorg = match self.detector.check(&block.header, &self.tracker)? {
            BlockCheck::Extends => None,
            BlockCheck::AlreadyApplied => {
                tracing::debug!(block = number, "Block already applied, skipping");
                return Ok(BlockOutcome::AlreadyApplied {
                    block_number: number,
                });
            }
            BlockCheck::Reorg(event) => {
                self.reconcile(&event).await?;
                Some(event)
            }
        };

        self.state = ProjectorState::Running;
        self.reader.begin_block(&block.header)?;

        let Block { header, mut logs } = block;
        logs.sort_by_key(|l| l.log_index);

        let mut cache = EntityCache::new(self.store.clone());
        let mut quarantined = HashSet::new();
        let mut dead_letters = Vec::new();
        let mut reports = Vec::with_capacity(logs.len());

        for log in &logs {
            if let Some(ancestor) = self.pending_reorg() {
                if ancestor < number {
                    cache.discard_block();
                    self.sources.discard_pending();
                    let err = ProjectionError::ReorgDuringApplication {
                        block_number: number,
                        common_ancestor: ancestor,
                    };
                    tracing::warn!(%err, log_index = log.log_index, "Abandoning block");
                    let event = self.rollback_to(ancestor).await?;
                    return Ok(BlockOutcome::Interrupted { event });
                }
            }

            match self
                .apply_log(log, &mut cache, &mut quarantined, &mut dead_letters)
                .await
            {
                Ok(report) => reports.push(report),
                Err(err) => {
                    cache.discard_block();
                    self.abandon_block();
                    if self.is_halted() {
                        self.state = ProjectorState::Halted;
                    }
                    return Err(err);
                }
            }
        }

        let changes = cache.take_changes();
        let entities_written = changes.len();
        let commit = BlockCommit {
            block: header.clone(),
            changes,
            sources: self.sources.pending().to_vec(),
            dead_letters,
        };
        if let Err(err) = self.store.commit_block(commit).await {
            self.abandon_block();
            tracing::error!(block = number, error = %err, "Block commit failed");
            return Err(err);
        }
        let sources_registered = self.sources.take_pending().len();

        if !self.tracker.push(header.clone()) {
            tracing::warn!(block = number, "Committed block does not extend tracked head");
        }
        self.head = Some(Checkpoint::for_block(&header));

        let report = BlockReport {
            block_number: number,
            logs: reports,
            entities_written,
            sources_registered,
            diagnostics: self.reader.diagnostics(),
            reorg,
        };
        tracing::info!(
            block = number,
            applied = report.applied(),
            skipped = report.skipped(),
            failed = report.failed(),
            entities = entities_written,
            sources = sources_registered,
            "Block committed"
        );
        Ok(BlockOutcome::Committed(report))
    }

    /// Drop everything the failed block staged outside the entity cache.
    /// The next delivery at this height may come from another fork.
    fn abandon_block(&mut self) {
        self.sources.discard_pending();
        if let Err(err) = self.reader.clear() {
            tracing::error!(error = %err, "Failed to clear contract read cache");
        }
    }

    /// Route and apply one log. `Err` aborts the block.
    async fn apply_log(
        &mut self,
        log: &LogEvent,
        cache: &mut EntityCache,
        quarantined: &mut HashSet<String>,
        dead_letters: &mut Vec<DeadLetter>,
    ) -> Result<LogReport, ProjectionError> {
        let address = log.address.to_ascii_lowercase();
        let mut report = LogReport {
            log: log.id(),
            address: address.clone(),
            signature: log.signature.clone(),
            status: LogStatus::Received,
            error: None,
        };

        let route = self
            .sources
            .template_of(&address)
            .and_then(|template| self.routes.route(template, &log.signature));
        let (kind, scope) = match route {
            Some(Route::Apply { kind, scope }) => (kind, scope),
            Some(Route::Skip) => {
                report.status = LogStatus::Skipped;
                return Ok(report);
            }
            None => {
                if self.sources.is_tracked(&address) {
                    let err = ProjectionError::UnroutableEvent {
                        address: address.clone(),
                        signature: log.signature.clone(),
                    };
                    tracing::debug!(%err, "Skipping");
                }
                report.status = LogStatus::Skipped;
                return Ok(report);
            }
        };
        report.status = LogStatus::Routed;

        if quarantined.contains(&address) {
            let reason = "source quarantined after an earlier failure in this block".to_string();
            dead_letters.push(self.dead_letter(log, &reason));
            report.status = LogStatus::Failed;
            report.error = Some(reason);
            return Ok(report);
        }

        self.sources.begin_log();
        let result = {
            let event = EventContext::for_log(self.config.chain.as_str(), log);
            let mut cx = HandlerContext::new(event, cache, &self.reader, &mut self.sources);
            self.projection.apply(kind, log, &mut cx).await
        };

        let err = match result {
            Ok(()) => {
                cache.commit_log();
                report.status = LogStatus::Applied;
                return Ok(report);
            }
            Err(err) => err,
        };

        cache.discard_log();
        self.sources.discard_log();
        tracing::error!(
            projection = self.projection.name(),
            block = log.block_number,
            tx = %log.tx_hash,
            log_index = log.log_index,
            address = %address,
            signature = %log.signature,
            error = %err,
            "Handler failed"
        );

        let shared = scope == Scope::SharedAggregate;
        if err.is_halting() || (shared && !err.is_block_fatal()) {
            let reason = format!("{} at {}: {err}", log.signature, log.id());
            tracing::error!(%reason, "Projector halted");
            self.halt = Some(reason);
        }
        if err.is_block_fatal() || shared {
            return Err(err);
        }

        let reason = err.to_string();
        dead_letters.push(self.dead_letter(log, &reason));
        if self.config.quarantine_failed_sources && quarantined.insert(address.clone()) {
            tracing::warn!(%address, block = log.block_number, "Source quarantined for the rest of the block");
        }
        report.status = LogStatus::Failed;
        report.error = Some(reason);
        Ok(report)
    }

    fn dead_letter(&self, log: &LogEvent, reason: &str) -> DeadLetter {
        DeadLetter {
            log: log.id(),
            address: log.address.to_ascii_lowercase(),
            signature: log.signature.clone(),
            reason: reason.to_string(),
        }
    }
}
