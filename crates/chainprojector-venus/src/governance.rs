//! Governor Bravo proposals, votes and governance parameters.
//!
//! Proposal and vote handlers update shared aggregates (the governance
//! singleton, delegates, proposal tallies) and are routed with shared scope.
//! Tallies are incremental, so each is guarded by the existence of the
//! entity the log creates. A second `ProposalCreated` for the same id
//! changes nothing; a second `VoteCast` for the same voter and proposal
//! changes nothing when it repeats the recorded vote and is an invariant
//! violation when it contradicts it.

use chainprojector_core::codec::{i32_le_hex, normalize_address, ZERO_ADDRESS};
use chainprojector_core::{HandlerContext, LogEvent, Mantissa, ProjectionError};
use num_traits::ToPrimitive;

use crate::entities::{
    Delegate, Governance, Proposal, ProposalType, TxRecord, Vote, VoteSupport, GOVERNANCE_ID,
};
use crate::events::{sig, AddressChange, MaxOperationsUpdated, ProposalCreated, ProposalLifecycle, VoteCast};

const GOVERNANCE_READS: &[&str] = &[
    "implementation",
    "admin",
    "pendingAdmin",
    "guardian",
    "quorumVotes",
    "proposalMaxOperations",
];

/// The governance singleton, seeded from the governor's storage on first use.
async fn load_governance(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<Governance, ProjectionError> {
    if let Some(existing) = cx.load::<Governance>(GOVERNANCE_ID).await? {
        return Ok(existing);
    }
    let governor = normalize_address(&log.address)?;
    cx.prefetch(&governor, GOVERNANCE_READS).await?;
    let pending_admin = cx.read_address(&governor, "pendingAdmin").await?;
    let governance = Governance {
        id: GOVERNANCE_ID.to_string(),
        total_proposals: 0,
        total_delegates: 0,
        total_voters: 0,
        total_votes_mantissa: Mantissa::zero(),
        quorum_votes_mantissa: cx.read_mantissa(&governor, "quorumVotes").await?,
        implementation: cx.read_address(&governor, "implementation").await?,
        pending_admin: (pending_admin != ZERO_ADDRESS).then_some(pending_admin),
        admin: cx.read_address(&governor, "admin").await?,
        guardian: cx.read_address(&governor, "guardian").await?,
        proposal_max_operations: cx.read_mantissa(&governor, "proposalMaxOperations").await?,
    };
    tracing::debug!(%governor, quorum = %governance.quorum_votes_mantissa, "Governance created");
    Ok(governance)
}

/// Existing delegate, or a new one counted in `governance.total_delegates`.
async fn load_delegate(
    cx: &mut HandlerContext<'_>,
    governance: &mut Governance,
    address: &str,
) -> Result<Delegate, ProjectionError> {
    let (delegate, created) = cx.get_or_create(address, || Delegate::new(address)).await?;
    if created {
        governance.total_delegates += 1;
    }
    Ok(delegate)
}

fn tx_record(cx: &HandlerContext<'_>) -> TxRecord {
    let event = cx.event();
    TxRecord {
        block_number: event.block_number,
        tx_hash: event.tx_hash.clone(),
        timestamp: event.block_timestamp,
    }
}

// ─── Proposals ────────────────────────────────────────────────────────────────

pub async fn proposal_created(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: ProposalCreated = log.decode()?;
    let id = args.id.to_string();
    if cx.load::<Proposal>(&id).await?.is_some() {
        tracing::debug!(proposal = %id, "Proposal already recorded");
        return Ok(());
    }
    let proposal_type = ProposalType::from_index(args.proposal_type).ok_or_else(|| {
        ProjectionError::malformed(
            sig::PROPOSAL_CREATED,
            format!("unknown proposal type {}", args.proposal_type),
        )
    })?;
    let proposer = normalize_address(&args.proposer)?;
    let targets = args
        .targets
        .iter()
        .map(|t| normalize_address(t))
        .collect::<Result<Vec<_>, _>>()?;

    let mut governance = load_governance(log, cx).await?;
    let mut proposer_delegate = load_delegate(cx, &mut governance, &proposer).await?;
    proposer_delegate.proposals_created += 1;
    governance.total_proposals += 1;

    let proposal = Proposal {
        id: id.clone(),
        proposer,
        targets,
        values: args.values.iter().map(ToString::to_string).collect(),
        signatures: args.signatures,
        calldatas: args.calldatas,
        start_block: args.start_block,
        end_block: args.end_block,
        description: args.description,
        proposal_type,
        for_votes: Mantissa::zero(),
        against_votes: Mantissa::zero(),
        abstain_votes: Mantissa::zero(),
        passing: false,
        execution_eta: None,
        created: tx_record(cx),
        canceled: None,
        queued: None,
        executed: None,
    };
    cx.save(&proposal)?;
    cx.save(&proposer_delegate)?;
    cx.save(&governance)?;
    tracing::info!(proposal = %id, kind = ?proposal_type, "Proposal created");
    Ok(())
}

/// `voterLower` followed by the little-endian hex of the proposal id.
pub fn vote_id(voter: &str, proposal_id: &Mantissa) -> Result<String, ProjectionError> {
    let id = proposal_id.as_bigint().to_i32().ok_or_else(|| {
        ProjectionError::malformed(sig::VOTE_CAST, format!("proposal id {proposal_id} out of range"))
    })?;
    Ok(format!("{}{}", voter.to_ascii_lowercase(), i32_le_hex(id)))
}

pub async fn vote_cast(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: VoteCast = log.decode()?;
    let voter = normalize_address(&args.voter)?;
    let support = VoteSupport::from_index(args.support).ok_or_else(|| {
        ProjectionError::malformed(sig::VOTE_CAST, format!("unknown support value {}", args.support))
    })?;
    let id = vote_id(&voter, &args.proposal_id)?;
    let proposal_id = args.proposal_id.to_string();

    if let Some(existing) = cx.load::<Vote>(&id).await? {
        if existing.support == support && existing.votes_mantissa == args.votes {
            tracing::debug!(vote = %id, "Vote already counted");
            return Ok(());
        }
        return Err(ProjectionError::invariant(
            "VoteCast",
            format!(
                "vote {id} recorded as {:?} {} but log {} says {:?} {}",
                existing.support,
                existing.votes_mantissa,
                log.id(),
                support,
                args.votes
            ),
        ));
    }

    let mut proposal = cx.get::<Proposal>(&proposal_id).await?;
    let mut governance = load_governance(log, cx).await?;
    let mut voter_delegate = load_delegate(cx, &mut governance, &voter).await?;
    if voter_delegate.votes_cast == 0 {
        governance.total_voters += 1;
    }
    voter_delegate.votes_cast += 1;
    governance.total_votes_mantissa = &governance.total_votes_mantissa + &args.votes;

    let tally = match support {
        VoteSupport::Against => &mut proposal.against_votes,
        VoteSupport::For => &mut proposal.for_votes,
        VoteSupport::Abstain => &mut proposal.abstain_votes,
    };
    *tally = &*tally + &args.votes;
    proposal.passing = proposal.is_passing(&governance.quorum_votes_mantissa);

    cx.save(&Vote {
        id,
        proposal: proposal_id,
        voter,
        support,
        votes_mantissa: args.votes,
        reason: args.reason.filter(|r| !r.is_empty()),
    })?;
    cx.save(&proposal)?;
    cx.save(&voter_delegate)?;
    cx.save(&governance)
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

pub async fn proposal_canceled(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: ProposalLifecycle = log.decode()?;
    let mut proposal = cx.get::<Proposal>(&args.id.to_string()).await?;
    proposal.canceled = Some(tx_record(cx));
    cx.save(&proposal)
}

pub async fn proposal_queued(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: ProposalLifecycle = log.decode()?;
    let eta = args
        .eta
        .ok_or_else(|| ProjectionError::malformed(sig::PROPOSAL_QUEUED, "missing eta"))?;
    let mut proposal = cx.get::<Proposal>(&args.id.to_string()).await?;
    proposal.queued = Some(tx_record(cx));
    proposal.execution_eta = Some(eta);
    cx.save(&proposal)
}

pub async fn proposal_executed(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: ProposalLifecycle = log.decode()?;
    let mut proposal = cx.get::<Proposal>(&args.id.to_string()).await?;
    proposal.executed = Some(tx_record(cx));
    cx.save(&proposal)
}

// ─── Parameters ───────────────────────────────────────────────────────────────

/// Governance address fields set by `New*` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernanceRole {
    Implementation,
    Admin,
    PendingAdmin,
    Guardian,
}

pub async fn address_changed(
    role: GovernanceRole,
    log: &LogEvent,
    cx: &mut HandlerContext<'_>,
) -> Result<(), ProjectionError> {
    let args: AddressChange = log.decode()?;
    let value = normalize_address(&args.new_value)?;
    let mut governance = load_governance(log, cx).await?;
    match role {
        GovernanceRole::Implementation => governance.implementation = value,
        GovernanceRole::Admin => governance.admin = value,
        GovernanceRole::PendingAdmin => {
            governance.pending_admin = (value != ZERO_ADDRESS).then_some(value)
        }
        GovernanceRole::Guardian => governance.guardian = value,
    }
    cx.save(&governance)
}

pub async fn max_operations_updated(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: MaxOperationsUpdated = log.decode()?;
    let mut governance = load_governance(log, cx).await?;
    governance.proposal_max_operations = args.new_max_operations;
    cx.save(&governance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_ids_use_little_endian_proposal_hex() {
        let voter = "0xAbC0000000000000000000000000000000000001";
        assert_eq!(
            vote_id(voter, &Mantissa::from(22u64)).unwrap(),
            "0xabc000000000000000000000000000000000000116000000"
        );
        assert_eq!(
            vote_id(voter, &Mantissa::from(24u64)).unwrap(),
            "0xabc000000000000000000000000000000000000118000000"
        );
        assert!(vote_id(voter, &Mantissa::from(u64::MAX)).is_err());
    }
}
