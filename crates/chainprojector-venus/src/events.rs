//! Canonical signatures and decoded argument shapes of the events the
//! projections consume. Addresses are decoded as raw strings and
//! normalised by the handlers.

use chainprojector_core::Mantissa;
use serde::Deserialize;

// ─── Templates ────────────────────────────────────────────────────────────────

pub const POOL_REGISTRY: &str = "PoolRegistry";
pub const COMPTROLLER: &str = "Comptroller";
pub const VTOKEN: &str = "VToken";
pub const GOVERNOR_BRAVO: &str = "GovernorBravo";

// ─── Signatures ───────────────────────────────────────────────────────────────

pub mod sig {
    pub const POOL_REGISTERED: &str = "PoolRegistered(uint256,(string,address,address,uint256,uint256))";
    pub const POOL_NAME_SET: &str = "PoolNameSet(uint256,string)";
    pub const POOL_METADATA_UPDATED: &str =
        "PoolMetadataUpdated(uint256,(uint8,string,string,string),(uint8,string,string,string))";

    pub const MARKET_LISTED: &str = "MarketListed(address)";
    pub const MARKET_ENTERED: &str = "MarketEntered(address,address)";
    pub const MARKET_EXITED: &str = "MarketExited(address,address)";
    pub const COMPTROLLER_CONFIG: &[&str] = &[
        "NewCloseFactor(uint256,uint256)",
        "NewCollateralFactor(address,uint256,uint256)",
        "NewLiquidationIncentive(uint256,uint256)",
        "NewPriceOracle(address,address)",
        "NewPauseGuardian(address,address)",
        "ActionPausedMarket(address,uint8,bool)",
        "NewBorrowCap(address,uint256)",
        "NewSupplyCap(address,uint256)",
        "NewMinLiquidatableCollateral(uint256,uint256)",
    ];

    pub const ACCRUE_INTEREST: &str = "AccrueInterest(uint256,uint256,uint256,uint256)";
    pub const MINT: &str = "Mint(address,uint256,uint256,uint256)";
    pub const REDEEM: &str = "Redeem(address,uint256,uint256,uint256)";
    pub const BORROW: &str = "Borrow(address,uint256,uint256,uint256)";
    pub const REPAY_BORROW: &str = "RepayBorrow(address,address,uint256,uint256,uint256)";
    pub const TRANSFER: &str = "Transfer(address,address,uint256)";
    pub const VTOKEN_CONFIG: &[&str] = &[
        "Approval(address,address,uint256)",
        "LiquidateBorrow(address,address,uint256,address,uint256)",
        "ReservesAdded(address,uint256,uint256)",
        "ReservesReduced(address,uint256,uint256)",
        "NewMarketInterestRateModel(address,address)",
        "NewReserveFactor(uint256,uint256)",
    ];

    pub const PROPOSAL_CREATED: &str =
        "ProposalCreated(uint256,address,address[],uint256[],string[],bytes[],uint256,uint256,string,uint8)";
    /// Pre-routing proposals carry no type.
    pub const PROPOSAL_CREATED_UNTYPED: &str =
        "ProposalCreated(uint256,address,address[],uint256[],string[],bytes[],uint256,uint256,string)";
    pub const VOTE_CAST: &str = "VoteCast(address,uint256,uint8,uint256,string)";
    pub const PROPOSAL_CANCELED: &str = "ProposalCanceled(uint256)";
    pub const PROPOSAL_QUEUED: &str = "ProposalQueued(uint256,uint256)";
    pub const PROPOSAL_EXECUTED: &str = "ProposalExecuted(uint256)";
    pub const NEW_IMPLEMENTATION: &str = "NewImplementation(address,address)";
    pub const NEW_ADMIN: &str = "NewAdmin(address,address)";
    pub const NEW_PENDING_ADMIN: &str = "NewPendingAdmin(address,address)";
    pub const NEW_GUARDIAN: &str = "NewGuardian(address,address)";
    pub const PROPOSAL_MAX_OPERATIONS_UPDATED: &str = "ProposalMaxOperationsUpdated(uint256,uint256)";
    pub const GOVERNANCE_CONFIG: &[&str] = &[
        "VotingDelaySet(uint256,uint256)",
        "VotingPeriodSet(uint256,uint256)",
        "ProposalThresholdSet(uint256,uint256)",
    ];
}

// ─── Pool registry ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredPool {
    pub name: String,
    pub creator: String,
    pub comptroller: String,
    pub block_posted: Mantissa,
    pub timestamp_posted: Mantissa,
}

#[derive(Debug, Deserialize)]
pub struct PoolRegistered {
    pub index: Mantissa,
    pub pool: RegisteredPool,
}

#[derive(Debug, Deserialize)]
pub struct PoolNameSet {
    pub index: Mantissa,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetadata {
    pub risk_rating: u8,
    pub category: String,
    #[serde(rename = "logoURL")]
    pub logo_url: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetadataUpdated {
    pub index: Mantissa,
    pub new_metadata: PoolMetadata,
}

// ─── Comptroller ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketListed {
    pub c_token: String,
}

/// `MarketEntered` and `MarketExited`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketMembership {
    pub c_token: String,
    pub account: String,
}

// ─── VToken ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mint {
    pub minter: String,
    pub mint_amount: Mantissa,
    pub mint_tokens: Mantissa,
    pub account_balance: Mantissa,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redeem {
    pub redeemer: String,
    pub redeem_amount: Mantissa,
    pub redeem_tokens: Mantissa,
    pub account_balance: Mantissa,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Borrow {
    pub borrower: String,
    pub borrow_amount: Mantissa,
    pub account_borrows: Mantissa,
    pub total_borrows: Mantissa,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepayBorrow {
    pub payer: String,
    pub borrower: String,
    pub repay_amount: Mantissa,
    pub account_borrows: Mantissa,
    pub total_borrows: Mantissa,
}

#[derive(Debug, Deserialize)]
pub struct Transfer {
    pub from: String,
    pub to: String,
    pub amount: Mantissa,
}

// ─── Governance ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalCreated {
    pub id: Mantissa,
    pub proposer: String,
    pub targets: Vec<String>,
    pub values: Vec<Mantissa>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<String>,
    pub start_block: Mantissa,
    pub end_block: Mantissa,
    pub description: String,
    #[serde(default)]
    pub proposal_type: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCast {
    pub voter: String,
    pub proposal_id: Mantissa,
    pub support: u8,
    pub votes: Mantissa,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `ProposalCanceled`, `ProposalExecuted`, and `ProposalQueued` (with `eta`).
#[derive(Debug, Deserialize)]
pub struct ProposalLifecycle {
    pub id: Mantissa,
    #[serde(default)]
    pub eta: Option<Mantissa>,
}

/// Two-address setters (`NewAdmin(oldAdmin, newAdmin)` and friends); only
/// the new value matters.
#[derive(Debug, Deserialize)]
pub struct AddressChange {
    #[serde(
        alias = "newImplementation",
        alias = "newAdmin",
        alias = "newPendingAdmin",
        alias = "newGuardian"
    )]
    pub new_value: String,
}

/// `ProposalMaxOperationsUpdated(oldMaxOperations, newMaxOperations)`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxOperationsUpdated {
    pub new_max_operations: Mantissa,
}
