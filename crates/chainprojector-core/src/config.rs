//! Projector configuration, runtime state and the fluent builder.
//!
//! # Example
//!
//! ```rust
//! use chainprojector_core::config::ProjectorBuilder;
//!
//! let config = ProjectorBuilder::new()
//!     .id("venus-isolated")
//!     .chain("bsc")
//!     .start_block(29_000_000)
//!     .source("0x9F7b01A536aFA00EF10310A162877fd792cD0666", "PoolRegistry")
//!     .build_config();
//! assert_eq!(config.sources.len(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A contract address known at startup and the template handling its logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSource {
    pub address: String,
    pub template: String,
}

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive string, e.g. `"info,chainprojector_core=debug"`.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Configuration for a projector instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Unique name for this projector.
    pub id: String,
    /// Chain slug handed to every handler (e.g. `"bsc"`).
    pub chain: String,
    /// First block to apply when the store is empty.
    pub start_block: u64,
    /// Number of committed block headers kept for reorg detection.
    pub tracker_window: usize,
    /// After an isolated failure, fail the remaining logs of the same
    /// contract in that block instead of applying them.
    pub quarantine_failed_sources: bool,
    /// Addresses tracked from the start.
    pub sources: Vec<StaticSource>,
    pub log: LogConfig,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            id: "default".into(),
            chain: "bsc".into(),
            start_block: 0,
            tracker_window: 128,
            quarantine_failed_sources: true,
            sources: vec![],
            log: LogConfig::default(),
        }
    }
}

/// Runtime state of the projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectorState {
    /// Not yet started.
    Idle,
    /// Applying blocks.
    Running,
    /// Rolling back to a common ancestor.
    ReorgRecovery,
    /// Stopped by an invariant violation until `clear_halt()`.
    Halted,
    /// The inbound stream ended.
    Stopped,
}

impl std::fmt::Display for ProjectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Halted => write!(f, "halted"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Fluent builder for `ProjectorConfig`.
#[derive(Default)]
pub struct ProjectorBuilder {
    config: ProjectorConfig,
}

impl ProjectorBuilder {
    pub fn new() -> Self {
        Self {
            config: ProjectorConfig::default(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set the first block applied on an empty store.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    pub fn tracker_window(mut self, blocks: usize) -> Self {
        self.config.tracker_window = blocks;
        self
    }

    pub fn quarantine_failed_sources(mut self, enabled: bool) -> Self {
        self.config.quarantine_failed_sources = enabled;
        self
    }

    /// Track `address` through `template` from the start.
    pub fn source(mut self, address: impl Into<String>, template: impl Into<String>) -> Self {
        self.config.sources.push(StaticSource {
            address: address.into(),
            template: template.into(),
        });
        self
    }

    pub fn log(mut self, log: LogConfig) -> Self {
        self.config.log = log;
        self
    }

    pub fn build_config(self) -> ProjectorConfig {
        self.config
    }
}
