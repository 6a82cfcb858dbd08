//! chainprojector-core — event-sourced entity projection with reorg-safe,
//! replayable state.
//!
//! # Architecture
//!
//! ```text
//! ChainEvent stream → Projector
//!                       ├── SourceRegistry       (static + dynamic addresses → templates)
//!                       ├── RoutingTable         ((template, signature) → Apply | Skip)
//!                       ├── Projection           (user handlers over HandlerContext)
//!                       │     ├── EntityCache          (block / log write overlay)
//!                       │     └── ContractStateReader  (per-block call cache)
//!                       ├── BlockTracker + ReorgDetector (parent-hash chain, forks)
//!                       └── EntityStore          (versioned; memory / SQLite)
//! ```
//!
//! A block's writes reach the store in a single `commit_block`; a reorg
//! rolls store, sources, tracker and call cache back to the common ancestor.

pub mod accessor;
pub mod cache;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod entity;
pub mod error;
pub mod handler;
pub mod projector;
pub mod query;
pub mod reorg;
pub mod sources;
pub mod store;
pub mod tracker;
pub mod types;

pub use accessor::{CallError, CallValue, ContractCaller, ContractStateReader, RecordedCaller};
pub use checkpoint::Checkpoint;
pub use codec::Mantissa;
pub use config::{LogConfig, ProjectorBuilder, ProjectorConfig, ProjectorState};
pub use entity::{EntityKey, EntityRecord};
pub use error::ProjectionError;
pub use handler::{HandlerContext, Projection, Route, RoutingTable, Scope};
pub use projector::{BlockOutcome, BlockReport, LogStatus, Projector, ReorgHandle};
pub use query::EntityQuery;
pub use reorg::{ReorgDetector, ReorgEvent, ReorgType};
pub use sources::{DynamicSource, SourceRegistry};
pub use store::{BlockCommit, DeadLetter, EntityStore, MemoryEntityStore};
pub use tracker::{BlockInfo, BlockTracker};
pub use types::{Block, BlockSummary, ChainEvent, EventContext, LogEvent, LogId};
