//! Entities produced by the lending and governance projections.
//!
//! Documents serialise camelCase. Raw on-chain integers are [`Mantissa`]
//! strings; derived decimals (`cash`, `underlyingPriceUsd`) are
//! `BigDecimal` strings truncated to the underlying token's decimals.

use bigdecimal::BigDecimal;
use chainprojector_core::{EntityRecord, LogId, Mantissa};
use serde::{Deserialize, Serialize};

/// Implements [`EntityRecord`] for a struct with an `id: String` field.
macro_rules! entity {
    ($ty:ident, $name:literal) => {
        impl EntityRecord for $ty {
            const TYPE: &'static str = $name;
            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

// ─── Isolated pools ───────────────────────────────────────────────────────────

/// Pool risk category as published in the registry metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRating {
    VeryHighRisk,
    HighRisk,
    MediumRisk,
    LowRisk,
    MinimalRisk,
}

impl RiskRating {
    /// Registry enum index → rating. `None` for an out-of-range index.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::VeryHighRisk),
            1 => Some(Self::HighRisk),
            2 => Some(Self::MediumRisk),
            3 => Some(Self::LowRisk),
            4 => Some(Self::MinimalRisk),
            _ => None,
        }
    }
}

/// A lending pool, keyed by its comptroller address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub id: String,
    pub registry_index: String,
    pub name: String,
    pub creator: String,
    pub block_posted: Mantissa,
    pub timestamp_posted: Mantissa,
    pub category: String,
    pub logo_url: String,
    pub description: String,
    pub risk_rating: Option<RiskRating>,
}

entity!(Pool, "Pool");

/// Registry index → comptroller. Name and metadata events carry only the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolIndex {
    pub id: String,
    pub pool: String,
}

entity!(PoolIndex, "PoolIndex");

/// A listed vToken market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: String,
    pub pool: String,
    pub name: String,
    pub symbol: String,
    pub underlying_address: String,
    pub underlying_name: String,
    pub underlying_symbol: String,
    pub underlying_decimals: i64,
    pub underlying_price_usd: BigDecimal,
    pub vtoken_decimals: i64,
    /// Block of the last refresh; equals the on-chain accrual block after `AccrueInterest`.
    pub accrual_block_number: u64,
    pub block_timestamp: i64,
    pub exchange_rate_mantissa: Mantissa,
    pub borrow_index_mantissa: Mantissa,
    pub reserves_mantissa: Mantissa,
    pub cash: BigDecimal,
    pub borrow_rate_mantissa: Mantissa,
    pub supply_rate_mantissa: Mantissa,
    pub treasury_total_borrows_mantissa: Mantissa,
    pub treasury_total_supply_mantissa: Mantissa,
}

entity!(Market, "Market");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub has_borrowed: bool,
}

entity!(Account, "Account");

impl Account {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            has_borrowed: false,
        }
    }
}

/// An account's position in one market, keyed `"{market}-{account}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountVToken {
    pub id: String,
    pub market: String,
    pub account: String,
    pub symbol: String,
    /// `None` until the account enters or exits the market explicitly.
    pub entered_market: Option<bool>,
    pub accrual_block_number: u64,
    pub user_supply_balance_mantissa: Mantissa,
    pub user_borrow_balance_mantissa: Mantissa,
    pub account_borrow_index_mantissa: Mantissa,
    pub total_underlying_redeemed_mantissa: Mantissa,
    /// Last `Transfer` folded into the supply balance.
    pub last_transfer: Option<LogId>,
}

entity!(AccountVToken, "AccountVToken");

impl AccountVToken {
    pub fn id_for(market: &str, account: &str) -> String {
        format!("{market}-{account}")
    }

    pub fn new(market: &str, account: &str, symbol: &str, block_number: u64) -> Self {
        Self {
            id: Self::id_for(market, account),
            market: market.to_string(),
            account: account.to_string(),
            symbol: symbol.to_string(),
            entered_market: None,
            accrual_block_number: block_number,
            user_supply_balance_mantissa: Mantissa::zero(),
            user_borrow_balance_mantissa: Mantissa::zero(),
            account_borrow_index_mantissa: Mantissa::zero(),
            total_underlying_redeemed_mantissa: Mantissa::zero(),
            last_transfer: None,
        }
    }

    /// Whether `log` was already folded into this position.
    pub fn has_seen(&self, log: &LogId) -> bool {
        self.last_transfer.as_ref().is_some_and(|last| log <= last)
    }
}

/// Audit row of an event touching a position, keyed `"{account}-{tx}-{logIndex}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountVTokenTransaction {
    pub id: String,
    pub account: String,
    pub tx_hash: String,
    pub timestamp: i64,
    pub block: u64,
    pub log_index: u32,
}

entity!(AccountVTokenTransaction, "AccountVTokenTransaction");

// ─── Governance ───────────────────────────────────────────────────────────────

pub const GOVERNANCE_ID: &str = "GOVERNANCE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Governance {
    pub id: String,
    pub total_proposals: u64,
    pub total_delegates: u64,
    pub total_voters: u64,
    pub total_votes_mantissa: Mantissa,
    pub quorum_votes_mantissa: Mantissa,
    pub implementation: String,
    pub pending_admin: Option<String>,
    pub admin: String,
    pub guardian: String,
    pub proposal_max_operations: Mantissa,
}

entity!(Governance, "Governance");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegate {
    pub id: String,
    pub proposals_created: u64,
    pub votes_cast: u64,
}

entity!(Delegate, "Delegate");

impl Delegate {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            proposals_created: 0,
            votes_cast: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalType {
    Normal,
    FastTrack,
    Critical,
}

impl ProposalType {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Normal),
            1 => Some(Self::FastTrack),
            2 => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteSupport {
    Against,
    For,
    Abstain,
}

impl VoteSupport {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Against),
            1 => Some(Self::For),
            2 => Some(Self::Abstain),
            _ => None,
        }
    }
}

/// Where and when a lifecycle event happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRecord {
    pub block_number: u64,
    pub tx_hash: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub proposer: String,
    pub targets: Vec<String>,
    pub values: Vec<String>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<String>,
    pub start_block: Mantissa,
    pub end_block: Mantissa,
    pub description: String,
    #[serde(rename = "type")]
    pub proposal_type: ProposalType,
    pub for_votes: Mantissa,
    pub against_votes: Mantissa,
    pub abstain_votes: Mantissa,
    pub passing: bool,
    pub execution_eta: Option<Mantissa>,
    pub created: TxRecord,
    pub canceled: Option<TxRecord>,
    pub queued: Option<TxRecord>,
    pub executed: Option<TxRecord>,
}

entity!(Proposal, "Proposal");

impl Proposal {
    /// `for > against && for >= quorum`.
    pub fn is_passing(&self, quorum: &Mantissa) -> bool {
        self.for_votes > self.against_votes && &self.for_votes >= quorum
    }
}

/// One vote, keyed by the lower-cased voter followed by the little-endian
/// hex of the proposal id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: String,
    pub proposal: String,
    pub voter: String,
    pub support: VoteSupport,
    pub votes_mantissa: Mantissa,
    pub reason: Option<String>,
}

entity!(Vote, "Vote");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_and_type_indices() {
        assert_eq!(RiskRating::from_index(0), Some(RiskRating::VeryHighRisk));
        assert_eq!(RiskRating::from_index(4), Some(RiskRating::MinimalRisk));
        assert_eq!(RiskRating::from_index(5), None);
        assert_eq!(ProposalType::from_index(1), Some(ProposalType::FastTrack));
        assert_eq!(
            serde_json::to_value(RiskRating::VeryHighRisk).unwrap(),
            serde_json::json!("VERY_HIGH_RISK")
        );
        assert_eq!(
            serde_json::to_value(ProposalType::FastTrack).unwrap(),
            serde_json::json!("FAST_TRACK")
        );
    }

    #[test]
    fn transfer_watermark() {
        let mut position = AccountVToken::new("0xm", "0xa", "vUSDT", 1);
        let log = |block_number, log_index| LogId {
            block_number,
            log_index,
            tx_hash: "0x1".into(),
        };
        assert!(!position.has_seen(&log(5, 0)));
        position.last_transfer = Some(log(5, 3));
        assert!(position.has_seen(&log(5, 3)));
        assert!(position.has_seen(&log(4, 9)));
        assert!(!position.has_seen(&log(5, 4)));
    }
}
