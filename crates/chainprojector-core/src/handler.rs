//! Projection trait, routing table and the context handed to handlers.
//!
//! Routing is static: a projection declares up front which
//! `(template, signature)` pairs it applies and which it deliberately
//! skips. Anything not in the table is unroutable and skipped by the
//! dispatcher. `coverage()` shows both lists so intentional omissions can
//! be told apart from forgotten ones.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use crate::accessor::{CallValue, ContractStateReader};
use crate::cache::EntityCache;
use crate::codec::Mantissa;
use crate::entity::{from_document, to_document, EntityKey, EntityRecord};
use crate::error::ProjectionError;
use crate::sources::SourceRegistry;
use crate::types::{EventContext, LogEvent};

// ─── Routing ──────────────────────────────────────────────────────────────────

/// What a failure of the handler would put at risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Touches state owned by the emitting contract only; a failure fails the log.
    Isolated,
    /// Touches aggregates shared across contracts; a failure aborts the block.
    SharedAggregate,
}

/// Routing decision for one `(template, signature)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<K> {
    Apply { kind: K, scope: Scope },
    /// Known event with no entity-relevant state.
    Skip,
}

/// Routed and skipped signatures per template.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Coverage {
    pub applied: Vec<(String, String)>,
    pub skipped: Vec<(String, String)>,
}

/// Static `(template, signature) → Route` table built at startup.
#[derive(Debug, Clone)]
pub struct RoutingTable<K> {
    routes: BTreeMap<(String, String), Route<K>>,
}

impl<K: Copy> RoutingTable<K> {
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    fn insert(mut self, template: &str, signature: &str, route: Route<K>) -> Self {
        self.routes
            .insert((template.to_string(), signature.to_string()), route);
        self
    }

    /// Route `signature` on `template` to `kind`, failures isolated to the log.
    pub fn apply(self, template: &str, signature: &str, kind: K) -> Self {
        self.insert(template, signature, Route::Apply { kind, scope: Scope::Isolated })
    }

    /// Route `signature` on `template` to `kind`, failures abort the block.
    pub fn apply_shared(self, template: &str, signature: &str, kind: K) -> Self {
        self.insert(
            template,
            signature,
            Route::Apply { kind, scope: Scope::SharedAggregate },
        )
    }

    /// Mark `signature` on `template` as intentionally ignored.
    pub fn skip(self, template: &str, signature: &str) -> Self {
        self.insert(template, signature, Route::Skip)
    }

    /// `None` if the pair is unroutable.
    pub fn route(&self, template: &str, signature: &str) -> Option<Route<K>> {
        self.routes
            .get(&(template.to_string(), signature.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn coverage(&self) -> Coverage {
        let mut coverage = Coverage::default();
        for (pair, route) in &self.routes {
            match route {
                Route::Apply { .. } => coverage.applied.push(pair.clone()),
                Route::Skip => coverage.skipped.push(pair.clone()),
            }
        }
        coverage
    }
}

impl<K: Copy> Default for RoutingTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Handler context ──────────────────────────────────────────────────────────

/// Everything a handler may touch while applying one log.
///
/// Entity reads see writes of earlier logs in the same block; writes stay
/// private to the block until it commits. Contract reads and source
/// registrations are implicitly pinned to the log's block.
pub struct HandlerContext<'a> {
    event: EventContext,
    cache: &'a mut EntityCache,
    reader: &'a ContractStateReader,
    sources: &'a mut SourceRegistry,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        event: EventContext,
        cache: &'a mut EntityCache,
        reader: &'a ContractStateReader,
        sources: &'a mut SourceRegistry,
    ) -> Self {
        Self {
            event,
            cache,
            reader,
            sources,
        }
    }

    pub fn event(&self) -> &EventContext {
        &self.event
    }

    pub fn block_number(&self) -> u64 {
        self.event.block_number
    }

    pub fn timestamp(&self) -> i64 {
        self.event.block_timestamp
    }

    // ─── Entities ─────────────────────────────────────────────────────────────

    pub async fn load<T: EntityRecord>(&self, id: &str) -> Result<Option<T>, ProjectionError> {
        match self.cache.get(&EntityKey::of::<T>(id)).await? {
            Some(doc) => Ok(Some(from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// Like [`load`](Self::load), but a missing entity is `NotFound`.
    pub async fn get<T: EntityRecord>(&self, id: &str) -> Result<T, ProjectionError> {
        self.load(id).await?.ok_or_else(|| ProjectionError::NotFound {
            key: EntityKey::of::<T>(id).to_string(),
        })
    }

    /// Existing entity, or `init()` persisted as a new one. The flag is `true` when created.
    pub async fn get_or_create<T, F>(&mut self, id: &str, init: F) -> Result<(T, bool), ProjectionError>
    where
        T: EntityRecord,
        F: FnOnce() -> T + Send,
    {
        if let Some(existing) = self.load(id).await? {
            return Ok((existing, false));
        }
        let created = init();
        self.save(&created)?;
        Ok((created, true))
    }

    pub fn save<T: EntityRecord>(&mut self, entity: &T) -> Result<(), ProjectionError> {
        let doc = to_document(entity)?;
        self.cache.set(entity.key(), doc);
        Ok(())
    }

    // ─── Contract state ───────────────────────────────────────────────────────

    pub async fn read(
        &self,
        address: &str,
        method: &str,
        args: &[CallValue],
    ) -> Result<CallValue, ProjectionError> {
        self.reader.read(address, method, args, self.block_number()).await
    }

    pub async fn read_mantissa(&self, address: &str, method: &str) -> Result<Mantissa, ProjectionError> {
        self.reader
            .read_mantissa(address, method, &[], self.block_number())
            .await
    }

    pub async fn read_mantissa_with(
        &self,
        address: &str,
        method: &str,
        args: &[CallValue],
    ) -> Result<Mantissa, ProjectionError> {
        self.reader
            .read_mantissa(address, method, args, self.block_number())
            .await
    }

    pub async fn read_address(&self, address: &str, method: &str) -> Result<String, ProjectionError> {
        self.reader.read_address(address, method, self.block_number()).await
    }

    pub async fn read_string(&self, address: &str, method: &str) -> Result<String, ProjectionError> {
        self.reader.read_string(address, method, self.block_number()).await
    }

    pub async fn prefetch(&self, address: &str, methods: &[&str]) -> Result<(), ProjectionError> {
        self.reader.prefetch(address, methods, self.block_number()).await
    }

    // ─── Sources ──────────────────────────────────────────────────────────────

    /// Start dispatching logs from `address` through `template`, from this log on.
    pub fn register_source(&mut self, address: &str, template: &str) -> bool {
        let block = self.block_number();
        self.sources.register(address, template, block)
    }

    pub fn is_tracked(&self, address: &str) -> bool {
        self.sources.is_tracked(address)
    }
}

// ─── Projection ───────────────────────────────────────────────────────────────

/// A set of handlers that turn logs into entities.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Closed set of event kinds this projection handles.
    type Kind: Copy + fmt::Debug + Send + Sync + 'static;

    fn name(&self) -> &str;

    fn routes(&self) -> RoutingTable<Self::Kind>;

    /// Apply one log. Must depend only on the log and the visible state.
    async fn apply(
        &self,
        kind: Self::Kind,
        log: &LogEvent,
        cx: &mut HandlerContext<'_>,
    ) -> Result<(), ProjectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::RecordedCaller;
    use crate::store::MemoryEntityStore;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Listed,
        Vote,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        id: String,
        hits: u32,
    }

    impl EntityRecord for Counter {
        const TYPE: &'static str = "Counter";
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn table() -> RoutingTable<Kind> {
        RoutingTable::new()
            .apply("Pool", "MarketListed(address)", Kind::Listed)
            .apply_shared("Gov", "VoteCast(address,uint256,uint8,uint256)", Kind::Vote)
            .skip("Pool", "NewCloseFactor(uint256,uint256)")
    }

    #[test]
    fn routing_table_lookup() {
        let t = table();
        assert_eq!(
            t.route("Pool", "MarketListed(address)"),
            Some(Route::Apply { kind: Kind::Listed, scope: Scope::Isolated })
        );
        assert_eq!(
            t.route("Gov", "VoteCast(address,uint256,uint8,uint256)"),
            Some(Route::Apply { kind: Kind::Vote, scope: Scope::SharedAggregate })
        );
        assert_eq!(t.route("Pool", "NewCloseFactor(uint256,uint256)"), Some(Route::Skip));
        assert_eq!(t.route("Gov", "MarketListed(address)"), None);
    }

    #[test]
    fn coverage_separates_skips() {
        let cov = table().coverage();
        assert_eq!(cov.applied.len(), 2);
        assert_eq!(
            cov.skipped,
            vec![("Pool".to_string(), "NewCloseFactor(uint256,uint256)".to_string())]
        );
    }

    #[tokio::test]
    async fn get_or_create_persists_into_the_log_overlay() {
        let store = Arc::new(MemoryEntityStore::new());
        let mut cache = EntityCache::new(store);
        let reader = ContractStateReader::new(Arc::new(RecordedCaller::new()));
        let mut sources = SourceRegistry::default();
        let event = EventContext {
            chain: "bsc".into(),
            block_number: 9,
            block_timestamp: 90,
            tx_hash: "0x9".into(),
            log_index: 0,
        };
        let mut cx = HandlerContext::new(event, &mut cache, &reader, &mut sources);

        let (c, created) = cx
            .get_or_create("c1", || Counter { id: "c1".into(), hits: 0 })
            .await
            .unwrap();
        assert!(created);
        assert_eq!(c.hits, 0);

        let (_, created) = cx
            .get_or_create("c1", || Counter { id: "c1".into(), hits: 99 })
            .await
            .unwrap();
        assert!(!created);

        let missing = cx.get::<Counter>("nope").await.unwrap_err();
        assert!(matches!(missing, ProjectionError::NotFound { .. }));

        assert!(cx.register_source("0xBEEF", "VToken"));
        assert!(cx.is_tracked("0xbeef"));
    }
}
