//! Contract state accessor — a read-through cache over contract calls.
//!
//! Reads are cached per `(address, selector, block)` for as long as that
//! block is being applied. The cache belongs to one block hash, so a
//! sibling block at the same height never sees it. A reverted call is not an error: the accessor
//! substitutes the zero sentinel, records a diagnostic and lets the handler
//! carry on. Some contract variants revert on methods they do not implement,
//! and some revert only on their first call, so reverts are expected.
//! Transport failures are different: the block cannot be applied without
//! the value, so they surface as `ProjectionError::Rpc`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::codec::{Mantissa, ZERO_ADDRESS};
use crate::error::ProjectionError;
use crate::types::BlockSummary;

// ─── Values ───────────────────────────────────────────────────────────────────

/// A decoded contract call result or argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallValue {
    Uint(Mantissa),
    Address(String),
    Bool(bool),
    Str(String),
    /// Substituted for a reverted call. Reads as 0, the zero address, `false` or `""`.
    Zero,
}

impl CallValue {
    pub fn as_mantissa(&self) -> Option<Mantissa> {
        match self {
            Self::Uint(m) => Some(m.clone()),
            Self::Zero => Some(Mantissa::zero()),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<String> {
        match self {
            Self::Address(a) => Some(a.to_ascii_lowercase()),
            Self::Zero => Some(ZERO_ADDRESS.to_string()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Zero => Some(false),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Zero => Some(""),
            _ => None,
        }
    }

    pub fn is_zero_sentinel(&self) -> bool {
        matches!(self, Self::Zero)
    }
}

impl fmt::Display for CallValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(m) => write!(f, "{m}"),
            Self::Address(a) => write!(f, "{}", a.to_ascii_lowercase()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Zero => write!(f, "0"),
        }
    }
}

/// Cache selector of a call: `method(arg,…)`, or the bare method name without args.
pub fn selector(method: &str, args: &[CallValue]) -> String {
    if args.is_empty() {
        return method.to_string();
    }
    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
    format!("{method}({})", args.join(","))
}

// ─── Caller seam ──────────────────────────────────────────────────────────────

/// Why a contract call produced no value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("execution reverted: {reason}")]
    Reverted { reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Executes read-only contract calls at a given block.
///
/// Implemented by the chain-data provider; tests and replays use
/// [`RecordedCaller`].
#[async_trait]
pub trait ContractCaller: Send + Sync {
    async fn call(
        &self,
        address: &str,
        method: &str,
        args: &[CallValue],
        block_number: u64,
    ) -> Result<CallValue, CallError>;
}

// ─── Reader ───────────────────────────────────────────────────────────────────

/// A call that reverted while applying the current block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDiagnostic {
    pub address: String,
    pub method: String,
    pub block_number: u64,
    pub reason: String,
}

type CacheKey = (String, String, u64);

#[derive(Default)]
struct ReaderState {
    /// Number and hash of the block the cache belongs to.
    block: Option<(u64, String)>,
    cache: HashMap<CacheKey, CallValue>,
    diagnostics: Vec<CallDiagnostic>,
}

/// Block-scoped read-through cache in front of a [`ContractCaller`].
pub struct ContractStateReader {
    caller: Arc<dyn ContractCaller>,
    state: Mutex<ReaderState>,
}

impl ContractStateReader {
    pub fn new(caller: Arc<dyn ContractCaller>) -> Self {
        Self {
            caller,
            state: Mutex::new(ReaderState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, ReaderState>, ProjectionError> {
        self.state
            .lock()
            .map_err(|_| ProjectionError::Other("contract reader lock poisoned".into()))
    }

    /// Scope the cache to `block`, dropping entries of any other block,
    /// including a different block at the same height.
    pub fn begin_block(&self, block: &BlockSummary) -> Result<(), ProjectionError> {
        let mut state = self.state()?;
        let current = state
            .block
            .as_ref()
            .is_some_and(|(number, hash)| *number == block.number && *hash == block.hash);
        if !current {
            state.cache.clear();
            state.diagnostics.clear();
            state.block = Some((block.number, block.hash.clone()));
        }
        Ok(())
    }

    /// Drop every cached value (after a rollback or an abandoned block).
    pub fn clear(&self) -> Result<(), ProjectionError> {
        let mut state = self.state()?;
        *state = ReaderState::default();
        Ok(())
    }

    /// Number of cached values.
    pub fn cached(&self) -> usize {
        self.state().map(|s| s.cache.len()).unwrap_or(0)
    }

    /// Reverts recorded since the current block began.
    pub fn diagnostics(&self) -> Vec<CallDiagnostic> {
        self.state().map(|s| s.diagnostics.clone()).unwrap_or_default()
    }

    /// Read `method(args)` on `address` as of `block_number`.
    pub async fn read(
        &self,
        address: &str,
        method: &str,
        args: &[CallValue],
        block_number: u64,
    ) -> Result<CallValue, ProjectionError> {
        let address = address.to_ascii_lowercase();
        let key = (address.clone(), selector(method, args), block_number);
        let cached = self.state()?.cache.get(&key).cloned();
        if let Some(hit) = cached {
            tracing::debug!(%address, method, block = block_number, "contract read cache hit");
            return Ok(hit);
        }

        let value = match self.caller.call(&address, method, args, block_number).await {
            Ok(value) => value,
            Err(CallError::Reverted { reason }) => {
                let err = ProjectionError::ExternalCallReverted {
                    address: address.clone(),
                    method: method.to_string(),
                    block_number,
                };
                tracing::warn!(%err, %reason, "substituting zero for reverted call");
                self.state()?.diagnostics.push(CallDiagnostic {
                    address: address.clone(),
                    method: method.to_string(),
                    block_number,
                    reason,
                });
                CallValue::Zero
            }
            Err(CallError::Transport(msg)) => {
                return Err(ProjectionError::Rpc(format!(
                    "{method}() on {address} at block {block_number}: {msg}"
                )));
            }
        };

        self.state()?.cache.insert(key, value.clone());
        Ok(value)
    }

    /// Read an integer result.
    pub async fn read_mantissa(
        &self,
        address: &str,
        method: &str,
        args: &[CallValue],
        block_number: u64,
    ) -> Result<Mantissa, ProjectionError> {
        let value = self.read(address, method, args, block_number).await?;
        value.as_mantissa().ok_or_else(|| unexpected(address, method, "uint", &value))
    }

    /// Read an address result (lower-cased).
    pub async fn read_address(
        &self,
        address: &str,
        method: &str,
        block_number: u64,
    ) -> Result<String, ProjectionError> {
        let value = self.read(address, method, &[], block_number).await?;
        value.as_address().ok_or_else(|| unexpected(address, method, "address", &value))
    }

    /// Read a string result.
    pub async fn read_string(
        &self,
        address: &str,
        method: &str,
        block_number: u64,
    ) -> Result<String, ProjectionError> {
        let value = self.read(address, method, &[], block_number).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected(address, method, "string", &value))
    }

    /// Warm the cache with argument-less reads of `methods`, concurrently.
    pub async fn prefetch(
        &self,
        address: &str,
        methods: &[&str],
        block_number: u64,
    ) -> Result<(), ProjectionError> {
        let reads = methods
            .iter()
            .map(|method| self.read(address, method, &[], block_number));
        for result in futures::future::join_all(reads).await {
            result?;
        }
        Ok(())
    }
}

fn unexpected(address: &str, method: &str, expected: &str, got: &CallValue) -> ProjectionError {
    ProjectionError::Rpc(format!(
        "{method}() on {address} returned {got:?}, expected {expected}"
    ))
}

// ─── Recorded caller ──────────────────────────────────────────────────────────

/// One recorded call result. `block` pins the value to a single block;
/// without it the value answers at every block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedCall {
    pub address: String,
    /// Bare method name, or a full selector such as `balanceOf(0xabc…)`.
    pub method: String,
    #[serde(default)]
    pub block: Option<u64>,
    /// `None` records a revert.
    #[serde(default)]
    pub value: Option<CallValue>,
}

/// A [`ContractCaller`] that answers from recorded results.
///
/// Calls with no recorded result revert, which the reader turns into the
/// zero sentinel.
#[derive(Default)]
pub struct RecordedCaller {
    results: HashMap<(String, String, Option<u64>), Option<CallValue>>,
    calls: AtomicUsize,
}

impl RecordedCaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<RecordedCall>) -> Self {
        let mut caller = Self::new();
        for r in records {
            caller
                .results
                .insert((r.address.to_ascii_lowercase(), r.method, r.block), r.value);
        }
        caller
    }

    /// Answer `method` on `address` with `value` at every block.
    pub fn with_value(mut self, address: &str, method: &str, value: CallValue) -> Self {
        self.set(address, method, None, Some(value));
        self
    }

    /// Answer `method` on `address` with `value` at `block` only.
    pub fn with_value_at(mut self, address: &str, method: &str, block: u64, value: CallValue) -> Self {
        self.set(address, method, Some(block), Some(value));
        self
    }

    /// Make `method` on `address` revert.
    pub fn with_revert(mut self, address: &str, method: &str) -> Self {
        self.set(address, method, None, None);
        self
    }

    fn set(&mut self, address: &str, method: &str, block: Option<u64>, value: Option<CallValue>) {
        self.results
            .insert((address.to_ascii_lowercase(), method.to_string(), block), value);
    }

    /// Calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ContractCaller for RecordedCaller {
    async fn call(
        &self,
        address: &str,
        method: &str,
        args: &[CallValue],
        block_number: u64,
    ) -> Result<CallValue, CallError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let address = address.to_ascii_lowercase();
        let full = selector(method, args);
        let candidates = [
            (full.clone(), Some(block_number)),
            (full.clone(), None),
            (method.to_string(), Some(block_number)),
            (method.to_string(), None),
        ];
        for (sel, block) in candidates {
            if let Some(result) = self.results.get(&(address.clone(), sel, block)) {
                return result.clone().ok_or_else(|| CallError::Reverted {
                    reason: format!("{full} reverted"),
                });
            }
        }
        Err(CallError::Reverted {
            reason: format!("no recorded result for {full}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKET: &str = "0x00000000000000000000000000000000000000aa";

    struct FailingCaller;

    #[async_trait]
    impl ContractCaller for FailingCaller {
        async fn call(
            &self,
            _address: &str,
            _method: &str,
            _args: &[CallValue],
            _block_number: u64,
        ) -> Result<CallValue, CallError> {
            Err(CallError::Transport("connection reset".into()))
        }
    }

    fn header(number: u64, hash: &str) -> BlockSummary {
        BlockSummary {
            number,
            hash: hash.into(),
            parent_hash: format!("0x{}", number - 1),
            timestamp: number as i64 * 3,
        }
    }

    fn caller() -> Arc<RecordedCaller> {
        Arc::new(
            RecordedCaller::new()
                .with_value(MARKET, "exchangeRateStored", CallValue::Uint(Mantissa::from(42u64)))
                .with_value(MARKET, "symbol", CallValue::Str("vBNB".into()))
                .with_revert(MARKET, "supplyRatePerBlock"),
        )
    }

    #[tokio::test]
    async fn reads_are_cached_per_block() {
        let caller = caller();
        let reader = ContractStateReader::new(caller.clone());
        reader.begin_block(&header(10, "0x10")).unwrap();

        let a = reader.read_mantissa(MARKET, "exchangeRateStored", &[], 10).await.unwrap();
        let b = reader.read_mantissa(MARKET, "exchangeRateStored", &[], 10).await.unwrap();
        assert_eq!(a, Mantissa::from(42u64));
        assert_eq!(a, b);
        assert_eq!(caller.call_count(), 1);

        reader.begin_block(&header(11, "0x11")).unwrap();
        assert_eq!(reader.cached(), 0);
        reader.read_mantissa(MARKET, "exchangeRateStored", &[], 11).await.unwrap();
        assert_eq!(caller.call_count(), 2);
    }

    #[tokio::test]
    async fn sibling_block_at_same_height_starts_cold() {
        let caller = caller();
        let reader = ContractStateReader::new(caller.clone());
        reader.begin_block(&header(10, "0x10a")).unwrap();
        reader.read_mantissa(MARKET, "exchangeRateStored", &[], 10).await.unwrap();
        reader.read_mantissa(MARKET, "supplyRatePerBlock", &[], 10).await.unwrap();
        assert_eq!(reader.diagnostics().len(), 1);

        // Same block again keeps its reads.
        reader.begin_block(&header(10, "0x10a")).unwrap();
        assert_eq!(reader.cached(), 2);

        reader.begin_block(&header(10, "0x10b")).unwrap();
        assert_eq!(reader.cached(), 0);
        assert!(reader.diagnostics().is_empty());
        reader.read_mantissa(MARKET, "exchangeRateStored", &[], 10).await.unwrap();
        assert_eq!(caller.call_count(), 3);
    }

    #[tokio::test]
    async fn revert_yields_zero_and_diagnostic() {
        let reader = ContractStateReader::new(caller());
        reader.begin_block(&header(5, "0x5")).unwrap();
        let rate = reader.read_mantissa(MARKET, "supplyRatePerBlock", &[], 5).await.unwrap();
        assert!(rate.is_zero());

        let diags = reader.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].method, "supplyRatePerBlock");
        assert_eq!(diags[0].block_number, 5);
    }

    #[tokio::test]
    async fn transport_failure_is_an_rpc_error() {
        let reader = ContractStateReader::new(Arc::new(FailingCaller));
        let err = reader.read(MARKET, "symbol", &[], 1).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Rpc(_)));
        assert!(err.is_block_fatal());
    }

    #[tokio::test]
    async fn type_mismatch_is_reported() {
        let reader = ContractStateReader::new(caller());
        let err = reader.read_mantissa(MARKET, "symbol", &[], 1).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Rpc(_)));
    }

    #[tokio::test]
    async fn prefetch_warms_the_cache() {
        let caller = caller();
        let reader = ContractStateReader::new(caller.clone());
        reader.begin_block(&header(3, "0x3")).unwrap();
        reader
            .prefetch(MARKET, &["exchangeRateStored", "symbol", "supplyRatePerBlock"], 3)
            .await
            .unwrap();
        assert_eq!(reader.cached(), 3);
        reader.read_string(MARKET, "symbol", 3).await.unwrap();
        assert_eq!(caller.call_count(), 3);
    }

    #[tokio::test]
    async fn block_pinned_values_win() {
        let caller = RecordedCaller::new()
            .with_value(MARKET, "getCash", CallValue::Uint(Mantissa::from(1u64)))
            .with_value_at(MARKET, "getCash", 7, CallValue::Uint(Mantissa::from(7u64)));
        let at7 = caller.call(MARKET, "getCash", &[], 7).await.unwrap();
        let at8 = caller.call(MARKET, "getCash", &[], 8).await.unwrap();
        assert_eq!(at7, CallValue::Uint(Mantissa::from(7u64)));
        assert_eq!(at8, CallValue::Uint(Mantissa::from(1u64)));
    }

    #[test]
    fn selectors_include_arguments() {
        assert_eq!(selector("symbol", &[]), "symbol");
        assert_eq!(
            selector("balanceOf", &[CallValue::Address("0xABC".into())]),
            "balanceOf(0xabc)"
        );
    }

    #[test]
    fn recorded_calls_parse_from_json() {
        let records: Vec<RecordedCall> = serde_json::from_str(
            r#"[{"address":"0xAA","method":"symbol","value":{"str":"vUSDT"}},
                {"address":"0xAA","method":"supplyRatePerBlock"}]"#,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[1].value.is_none());
        assert_eq!(records[0].value, Some(CallValue::Str("vUSDT".into())));
    }
}
