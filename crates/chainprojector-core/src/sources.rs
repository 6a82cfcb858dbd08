//! Dynamic source registry — which contract addresses are dispatched, and
//! through which template.
//!
//! Static sources come from configuration. Dynamic sources are added by
//! factory events while a block is being applied and are visible to the
//! dispatcher immediately, so a log from the new contract later in the same
//! block is not missed. They persist with the block that created them and
//! disappear again if that block is rolled back.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A contract address registered at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSource {
    pub address: String,
    pub template: String,
    pub created_at_block: u64,
}

/// Tracks every address the projector listens to.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    static_sources: HashMap<String, String>,
    dynamic: HashMap<String, DynamicSource>,
    /// Registered during the block being applied, in registration order.
    pending: Vec<DynamicSource>,
    /// `pending.len()` when the current log started.
    log_mark: usize,
}

fn canonical(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

impl SourceRegistry {
    /// Create a registry from `(address, template)` pairs known at startup.
    pub fn new<I, A, T>(static_sources: I) -> Self
    where
        I: IntoIterator<Item = (A, T)>,
        A: AsRef<str>,
        T: Into<String>,
    {
        Self {
            static_sources: static_sources
                .into_iter()
                .map(|(a, t)| (canonical(a.as_ref()), t.into()))
                .collect(),
            ..Default::default()
        }
    }

    /// Reload dynamic sources persisted by earlier runs.
    pub fn restore(&mut self, sources: Vec<DynamicSource>) {
        for source in sources {
            self.dynamic.insert(canonical(&source.address), source);
        }
    }

    /// Start tracking `address` with `template`.
    ///
    /// Returns `false` if the address was already tracked (no-op).
    pub fn register(&mut self, address: &str, template: &str, block_number: u64) -> bool {
        let address = canonical(address);
        if self.static_sources.contains_key(&address) || self.dynamic.contains_key(&address) {
            return false;
        }
        let source = DynamicSource {
            address: address.clone(),
            template: template.to_string(),
            created_at_block: block_number,
        };
        tracing::debug!(%address, template, block = block_number, "source registered");
        self.dynamic.insert(address, source.clone());
        self.pending.push(source);
        true
    }

    /// Template that handles logs from `address`, if it is tracked.
    pub fn template_of(&self, address: &str) -> Option<&str> {
        let address = canonical(address);
        self.static_sources
            .get(&address)
            .map(String::as_str)
            .or_else(|| self.dynamic.get(&address).map(|s| s.template.as_str()))
    }

    pub fn is_tracked(&self, address: &str) -> bool {
        self.template_of(address).is_some()
    }

    /// Number of tracked addresses (static + dynamic).
    pub fn len(&self) -> usize {
        self.static_sources.len() + self.dynamic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dynamic sources in creation order.
    pub fn dynamic_sources(&self) -> Vec<DynamicSource> {
        let mut out: Vec<_> = self.dynamic.values().cloned().collect();
        out.sort_by(|a, b| {
            a.created_at_block
                .cmp(&b.created_at_block)
                .then_with(|| a.address.cmp(&b.address))
        });
        out
    }

    // ─── Block / log scoping ──────────────────────────────────────────────────

    pub(crate) fn begin_log(&mut self) {
        self.log_mark = self.pending.len();
    }

    /// Forget registrations made by the current (failed) log.
    pub(crate) fn discard_log(&mut self) {
        for source in self.pending.drain(self.log_mark..) {
            self.dynamic.remove(&source.address);
        }
    }

    /// Registrations made so far in the current block.
    pub(crate) fn pending(&self) -> &[DynamicSource] {
        &self.pending
    }

    /// Hand over this block's registrations for persistence.
    pub(crate) fn take_pending(&mut self) -> Vec<DynamicSource> {
        self.log_mark = 0;
        std::mem::take(&mut self.pending)
    }

    /// Forget every registration made by the current (aborted) block.
    pub(crate) fn discard_pending(&mut self) {
        for source in self.pending.drain(..) {
            self.dynamic.remove(&source.address);
        }
        self.log_mark = 0;
    }

    /// Drop dynamic sources created after `block_number`.
    pub fn rollback_to(&mut self, block_number: u64) {
        self.discard_pending();
        self.dynamic
            .retain(|_, source| source.created_at_block <= block_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SourceRegistry {
        SourceRegistry::new([("0xAAAA", "PoolRegistry")])
    }

    #[test]
    fn static_sources_are_case_insensitive() {
        let reg = registry();
        assert_eq!(reg.template_of("0xaaaa"), Some("PoolRegistry"));
        assert!(!reg.is_tracked("0xbbbb"));
    }

    #[test]
    fn register_is_idempotent() {
        let mut reg = registry();
        assert!(reg.register("0xBBBB", "VToken", 10));
        assert!(!reg.register("0xbbbb", "VToken", 11));
        assert!(!reg.register("0xaaaa", "VToken", 11));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.take_pending().len(), 1);
    }

    #[test]
    fn registration_visible_before_commit() {
        let mut reg = registry();
        reg.begin_log();
        reg.register("0xcccc", "VToken", 7);
        assert_eq!(reg.template_of("0xcccc"), Some("VToken"));
    }

    #[test]
    fn failed_log_forgets_its_registrations() {
        let mut reg = registry();
        reg.begin_log();
        reg.register("0x01", "VToken", 7);
        reg.begin_log();
        reg.register("0x02", "VToken", 7);
        reg.discard_log();
        assert!(reg.is_tracked("0x01"));
        assert!(!reg.is_tracked("0x02"));
        reg.discard_pending();
        assert!(!reg.is_tracked("0x01"));
    }

    #[test]
    fn rollback_drops_later_sources() {
        let mut reg = registry();
        reg.register("0x01", "VToken", 5);
        reg.register("0x02", "VToken", 9);
        reg.take_pending();
        reg.rollback_to(6);
        assert!(reg.is_tracked("0x01"));
        assert!(!reg.is_tracked("0x02"));
        assert!(reg.is_tracked("0xaaaa"));
    }

    #[test]
    fn restore_reloads_persisted_sources() {
        let mut reg = registry();
        reg.restore(vec![DynamicSource {
            address: "0xDDDD".into(),
            template: "Comptroller".into(),
            created_at_block: 3,
        }]);
        assert_eq!(reg.template_of("0xdddd"), Some("Comptroller"));
        assert_eq!(reg.dynamic_sources().len(), 1);
    }
}
