//! ChainProjector CLI — replay recorded chain data into a SQLite entity
//! store and inspect the result.
//!
//! # Commands
//! ```text
//! chainprojector info
//! chainprojector replay   --db <path> --events <file.jsonl> [--calls <file.json>] [--config <file.json>]
//! chainprojector status   --db <path>
//! chainprojector entity   --db <path> --type <Entity> --id <id> [--at <block>]
//! chainprojector list     --db <path> --type <Entity> [--field <name> --value <v>]
//! chainprojector rollback --db <path> --to <block>
//! ```

use anyhow::{bail, Context, Result};
use chainprojector_core::accessor::RecordedCall;
use chainprojector_core::{
    ChainEvent, EntityKey, EntityStore, LogConfig, Projection, Projector, ProjectorConfig,
    RecordedCaller,
};
use chainprojector_storage::SqliteStorage;
use chainprojector_venus::events::{GOVERNOR_BRAVO, POOL_REGISTRY};
use chainprojector_venus::VenusProjection;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

mod logging;

#[derive(Parser)]
#[command(
    name = "chainprojector",
    about = "Reorg-safe entity projections for Venus Protocol — ChainProjector CLI",
    version
)]
struct Cli {
    /// Global log level: trace | debug | info | warn | error
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show routed and skipped events per template
    Info,

    /// Apply a recorded stream of chain events
    Replay {
        /// SQLite database file (created if missing)
        #[arg(long)]
        db: String,
        /// JSON-lines file, one chain event per line
        #[arg(long)]
        events: PathBuf,
        /// JSON array of recorded contract call results
        #[arg(long)]
        calls: Option<PathBuf>,
        /// Projector configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Pool registry address (added as a static source)
        #[arg(long)]
        pool_registry: Option<String>,
        /// Governor address (added as a static source)
        #[arg(long)]
        governor: Option<String>,
    },

    /// Show the committed head, dynamic sources and dead letters
    Status {
        #[arg(long)]
        db: String,
    },

    /// Print one entity as JSON
    Entity {
        #[arg(long)]
        db: String,
        /// Entity type, e.g. Market
        #[arg(long = "type")]
        entity_type: String,
        #[arg(long)]
        id: String,
        /// Read the entity as of this block
        #[arg(long)]
        at: Option<u64>,
    },

    /// Print every entity of a type as JSON
    List {
        #[arg(long)]
        db: String,
        #[arg(long = "type")]
        entity_type: String,
        /// Only entities whose `field` equals `value`
        #[arg(long, requires = "value")]
        field: Option<String>,
        #[arg(long, requires = "field")]
        value: Option<String>,
    },

    /// Discard every block above `to`
    Rollback {
        #[arg(long)]
        db: String,
        #[arg(long)]
        to: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut log = LogConfig {
        level: cli.log_level.clone(),
        json: cli.json_logs,
        ..LogConfig::default()
    };

    match cli.command {
        Commands::Info => {
            logging::init_tracing(&log);
            cmd_info()
        }
        Commands::Replay {
            db,
            events,
            calls,
            config,
            pool_registry,
            governor,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(address) = pool_registry {
                config.sources.push(static_source(&address, POOL_REGISTRY));
            }
            if let Some(address) = governor {
                config.sources.push(static_source(&address, GOVERNOR_BRAVO));
            }
            log.components = config.log.components.clone();
            logging::init_tracing(&log);
            cmd_replay(&db, config, &events, calls.as_ref()).await
        }
        Commands::Status { db } => {
            logging::init_tracing(&log);
            cmd_status(&db).await
        }
        Commands::Entity {
            db,
            entity_type,
            id,
            at,
        } => {
            logging::init_tracing(&log);
            cmd_entity(&db, &entity_type, &id, at).await
        }
        Commands::List {
            db,
            entity_type,
            field,
            value,
        } => {
            logging::init_tracing(&log);
            cmd_list(&db, &entity_type, field.zip(value)).await
        }
        Commands::Rollback { db, to } => {
            logging::init_tracing(&log);
            cmd_rollback(&db, to).await
        }
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn static_source(address: &str, template: &str) -> chainprojector_core::config::StaticSource {
    chainprojector_core::config::StaticSource {
        address: address.to_ascii_lowercase(),
        template: template.to_string(),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ProjectorConfig> {
    let Some(path) = path else {
        return Ok(ProjectorConfig {
            id: "venus".into(),
            ..ProjectorConfig::default()
        });
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn load_events(path: &PathBuf) -> Result<Vec<ChainEvent>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading events {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid chain event", path.display(), n + 1))
        })
        .collect()
}

fn load_calls(path: Option<&PathBuf>) -> Result<RecordedCaller> {
    let Some(path) = path else {
        return Ok(RecordedCaller::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading calls {}", path.display()))?;
    let records: Vec<RecordedCall> =
        serde_json::from_str(&raw).with_context(|| format!("parsing calls {}", path.display()))?;
    Ok(RecordedCaller::from_records(records))
}

async fn open_store(db: &str) -> Result<Arc<SqliteStorage>> {
    let storage = SqliteStorage::open(db)
        .await
        .with_context(|| format!("opening {db}"))?;
    Ok(Arc::new(storage))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ─── Command implementations ─────────────────────────────────────────────────

fn cmd_info() -> Result<()> {
    let projection = VenusProjection::new();
    let coverage = projection.routes().coverage();
    println!("ChainProjector v{}", env!("CARGO_PKG_VERSION"));
    println!("  Projection: {}", projection.name());
    println!("  Storage backends: memory, SQLite");
    println!();
    println!("Applied ({}):", coverage.applied.len());
    for (template, signature) in &coverage.applied {
        println!("  {template:<14} {signature}");
    }
    println!("Skipped ({}):", coverage.skipped.len());
    for (template, signature) in &coverage.skipped {
        println!("  {template:<14} {signature}");
    }
    Ok(())
}

async fn cmd_replay(
    db: &str,
    config: ProjectorConfig,
    events: &PathBuf,
    calls: Option<&PathBuf>,
) -> Result<()> {
    if config.sources.is_empty() {
        bail!("no static sources: pass --pool-registry/--governor or list them in --config");
    }
    let events = load_events(events)?;
    let caller = Arc::new(load_calls(calls)?);
    let store = open_store(db).await?;

    let mut projector = Projector::open(config, VenusProjection::new(), store, caller).await?;
    let from = projector.next_block();
    let count = events.len();
    tracing::info!(db, events = count, from, "Replaying recorded events");
    let result = projector.run(futures::stream::iter(events)).await;

    match projector.head() {
        Some(head) => println!(
            "Replayed {count} events from block {from}; head is {} ({})",
            head.block_number, head.block_hash
        ),
        None => println!("Replayed {count} events; nothing committed"),
    }
    if let Some(reason) = projector.halt_reason() {
        println!("HALTED: {reason}");
    }
    result.context("replay stopped")
}

async fn cmd_status(db: &str) -> Result<()> {
    let store = open_store(db).await?;
    match store.head().await? {
        Some(head) => println!("Head: block {} ({})", head.block_number, head.block_hash),
        None => println!("Head: none"),
    }

    let sources = store.sources().await?;
    println!("Dynamic sources: {}", sources.len());
    for s in &sources {
        println!("  {} {:<12} since block {}", s.address, s.template, s.created_at_block);
    }

    let dead = store.dead_letters().await?;
    println!("Dead letters: {}", dead.len());
    for d in &dead {
        println!("  {} {} {}: {}", d.log, d.address, d.signature, d.reason);
    }
    Ok(())
}

async fn cmd_entity(db: &str, entity_type: &str, id: &str, at: Option<u64>) -> Result<()> {
    let store = open_store(db).await?;
    let key = EntityKey::new(entity_type, id);
    let doc = match at {
        Some(block) => store.get_at(&key, block).await?,
        None => store.get(&key).await?,
    };
    match doc {
        Some(doc) => print_json(&doc),
        None => bail!("{key} not found"),
    }
}

async fn cmd_list(db: &str, entity_type: &str, filter: Option<(String, String)>) -> Result<()> {
    let store = open_store(db).await?;
    let docs = match filter {
        Some((field, value)) => {
            store
                .list_by_field(entity_type, &field, &Value::String(value))
                .await?
        }
        None => store.list(entity_type).await?,
    };
    print_json(&Value::Array(docs))
}

async fn cmd_rollback(db: &str, to: u64) -> Result<()> {
    let store = open_store(db).await?;
    store.rollback_to(to).await?;
    match store.head().await? {
        Some(head) => println!("Rolled back; head is block {}", head.block_number),
        None => println!("Rolled back; store is empty"),
    }
    Ok(())
}
