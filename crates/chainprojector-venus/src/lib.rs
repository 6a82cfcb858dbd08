//! chainprojector-venus — Venus Protocol projections for ChainProjector.
//!
//! Turns isolated-pools lending events (pool registry, comptrollers,
//! vTokens) and Governor Bravo events into queryable entities.
//!
//! ```text
//! PoolRegistry ──PoolRegistered──▶ Comptroller ──MarketListed──▶ VToken
//!   (static)                        (dynamic)                    (dynamic)
//!
//! GovernorBravo (static)
//! ```
//!
//! Configure the projector with the registry under [`events::POOL_REGISTRY`]
//! and the governor under [`events::GOVERNOR_BRAVO`]; comptrollers and
//! vTokens are registered as their creation events are applied.

pub mod entities;
pub mod events;
pub mod governance;
pub mod market;
pub mod pool;

use async_trait::async_trait;
use chainprojector_core::{HandlerContext, LogEvent, Projection, ProjectionError, RoutingTable};

use events::{sig, COMPTROLLER, GOVERNOR_BRAVO, POOL_REGISTRY, VTOKEN};
use governance::GovernanceRole;

/// Every event kind the Venus projection applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenusEvent {
    PoolRegistered,
    PoolNameSet,
    PoolMetadataUpdated,
    MarketListed,
    MarketEntered,
    MarketExited,
    AccrueInterest,
    Mint,
    Redeem,
    Borrow,
    RepayBorrow,
    Transfer,
    ProposalCreated,
    VoteCast,
    ProposalCanceled,
    ProposalQueued,
    ProposalExecuted,
    GovernanceAddress(GovernanceRole),
    ProposalMaxOperations,
}

/// Lending and governance handlers behind one routing table.
#[derive(Debug, Default, Clone)]
pub struct VenusProjection;

impl VenusProjection {
    pub fn new() -> Self {
        Self
    }
}

fn skip_all(table: RoutingTable<VenusEvent>, template: &str, signatures: &[&str]) -> RoutingTable<VenusEvent> {
    signatures
        .iter()
        .fold(table, |table, signature| table.skip(template, signature))
}

#[async_trait]
impl Projection for VenusProjection {
    type Kind = VenusEvent;

    fn name(&self) -> &str {
        "venus"
    }

    fn routes(&self) -> RoutingTable<VenusEvent> {
        use VenusEvent as E;

        let table = RoutingTable::new()
            .apply(POOL_REGISTRY, sig::POOL_REGISTERED, E::PoolRegistered)
            .apply(POOL_REGISTRY, sig::POOL_NAME_SET, E::PoolNameSet)
            .apply(POOL_REGISTRY, sig::POOL_METADATA_UPDATED, E::PoolMetadataUpdated)
            .apply(COMPTROLLER, sig::MARKET_LISTED, E::MarketListed)
            .apply(COMPTROLLER, sig::MARKET_ENTERED, E::MarketEntered)
            .apply(COMPTROLLER, sig::MARKET_EXITED, E::MarketExited)
            .apply(VTOKEN, sig::ACCRUE_INTEREST, E::AccrueInterest)
            .apply(VTOKEN, sig::MINT, E::Mint)
            .apply(VTOKEN, sig::REDEEM, E::Redeem)
            .apply(VTOKEN, sig::BORROW, E::Borrow)
            .apply(VTOKEN, sig::REPAY_BORROW, E::RepayBorrow)
            .apply(VTOKEN, sig::TRANSFER, E::Transfer)
            .apply_shared(GOVERNOR_BRAVO, sig::PROPOSAL_CREATED, E::ProposalCreated)
            .apply_shared(GOVERNOR_BRAVO, sig::PROPOSAL_CREATED_UNTYPED, E::ProposalCreated)
            .apply_shared(GOVERNOR_BRAVO, sig::VOTE_CAST, E::VoteCast)
            .apply_shared(GOVERNOR_BRAVO, sig::PROPOSAL_CANCELED, E::ProposalCanceled)
            .apply_shared(GOVERNOR_BRAVO, sig::PROPOSAL_QUEUED, E::ProposalQueued)
            .apply_shared(GOVERNOR_BRAVO, sig::PROPOSAL_EXECUTED, E::ProposalExecuted)
            .apply_shared(
                GOVERNOR_BRAVO,
                sig::NEW_IMPLEMENTATION,
                E::GovernanceAddress(GovernanceRole::Implementation),
            )
            .apply_shared(GOVERNOR_BRAVO, sig::NEW_ADMIN, E::GovernanceAddress(GovernanceRole::Admin))
            .apply_shared(
                GOVERNOR_BRAVO,
                sig::NEW_PENDING_ADMIN,
                E::GovernanceAddress(GovernanceRole::PendingAdmin),
            )
            .apply_shared(GOVERNOR_BRAVO, sig::NEW_GUARDIAN, E::GovernanceAddress(GovernanceRole::Guardian))
            .apply_shared(
                GOVERNOR_BRAVO,
                sig::PROPOSAL_MAX_OPERATIONS_UPDATED,
                E::ProposalMaxOperations,
            );

        let table = skip_all(table, COMPTROLLER, sig::COMPTROLLER_CONFIG);
        let table = skip_all(table, VTOKEN, sig::VTOKEN_CONFIG);
        skip_all(table, GOVERNOR_BRAVO, sig::GOVERNANCE_CONFIG)
    }

    async fn apply(
        &self,
        kind: VenusEvent,
        log: &LogEvent,
        cx: &mut HandlerContext<'_>,
    ) -> Result<(), ProjectionError> {
        use VenusEvent as E;

        match kind {
            E::PoolRegistered => pool::pool_registered(log, cx).await,
            E::PoolNameSet => pool::pool_name_set(log, cx).await,
            E::PoolMetadataUpdated => pool::pool_metadata_updated(log, cx).await,
            E::MarketListed => pool::market_listed(log, cx).await,
            E::MarketEntered => pool::market_entered(log, cx).await,
            E::MarketExited => pool::market_exited(log, cx).await,
            E::AccrueInterest => market::accrue_interest(log, cx).await,
            E::Mint => market::mint(log, cx).await,
            E::Redeem => market::redeem(log, cx).await,
            E::Borrow => market::borrow(log, cx).await,
            E::RepayBorrow => market::repay_borrow(log, cx).await,
            E::Transfer => market::transfer(log, cx).await,
            E::ProposalCreated => governance::proposal_created(log, cx).await,
            E::VoteCast => governance::vote_cast(log, cx).await,
            E::ProposalCanceled => governance::proposal_canceled(log, cx).await,
            E::ProposalQueued => governance::proposal_queued(log, cx).await,
            E::ProposalExecuted => governance::proposal_executed(log, cx).await,
            E::GovernanceAddress(role) => governance::address_changed(role, log, cx).await,
            E::ProposalMaxOperations => governance::max_operations_updated(log, cx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainprojector_core::{Route, Scope};

    #[test]
    fn every_template_has_routes() {
        let table = VenusProjection::new().routes();
        for template in [POOL_REGISTRY, COMPTROLLER, VTOKEN, GOVERNOR_BRAVO] {
            assert!(
                table.coverage().applied.iter().any(|(t, _)| t == template),
                "{template} has no applied routes"
            );
        }
    }

    #[test]
    fn governance_routes_are_shared_and_config_is_skipped() {
        let table = VenusProjection::new().routes();
        assert_eq!(
            table.route(GOVERNOR_BRAVO, sig::VOTE_CAST),
            Some(Route::Apply { kind: VenusEvent::VoteCast, scope: Scope::SharedAggregate })
        );
        assert_eq!(
            table.route(VTOKEN, sig::TRANSFER),
            Some(Route::Apply { kind: VenusEvent::Transfer, scope: Scope::Isolated })
        );
        assert_eq!(table.route(COMPTROLLER, "NewCloseFactor(uint256,uint256)"), Some(Route::Skip));
        assert_eq!(table.route(VTOKEN, sig::MARKET_LISTED), None);
        assert_eq!(
            table.coverage().skipped.len(),
            sig::COMPTROLLER_CONFIG.len() + sig::VTOKEN_CONFIG.len() + sig::GOVERNANCE_CONFIG.len()
        );
    }
}
