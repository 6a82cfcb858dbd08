//! Pool registry and comptroller handlers.

use chainprojector_core::codec::normalize_address;
use chainprojector_core::{HandlerContext, LogEvent, ProjectionError};

use crate::entities::{Pool, PoolIndex, RiskRating};
use crate::events::{
    sig, MarketListed, MarketMembership, PoolMetadataUpdated, PoolNameSet, PoolRegistered,
    COMPTROLLER, VTOKEN,
};
use crate::market::{ensure_market, touch_position};

// ─── Pool registry ────────────────────────────────────────────────────────────

pub async fn pool_registered(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: PoolRegistered = log.decode()?;
    let comptroller = normalize_address(&args.pool.comptroller)?;
    let creator = normalize_address(&args.pool.creator)?;
    let index = args.index.to_string();

    let pool = match cx.load::<Pool>(&comptroller).await? {
        Some(existing) => Pool {
            registry_index: index.clone(),
            name: args.pool.name,
            creator,
            block_posted: args.pool.block_posted,
            timestamp_posted: args.pool.timestamp_posted,
            ..existing
        },
        None => Pool {
            id: comptroller.clone(),
            registry_index: index.clone(),
            name: args.pool.name,
            creator,
            block_posted: args.pool.block_posted,
            timestamp_posted: args.pool.timestamp_posted,
            category: String::new(),
            logo_url: String::new(),
            description: String::new(),
            risk_rating: None,
        },
    };
    cx.save(&pool)?;
    cx.save(&PoolIndex {
        id: index,
        pool: comptroller.clone(),
    })?;

    if cx.register_source(&comptroller, COMPTROLLER) {
        tracing::debug!(%comptroller, name = %pool.name, "Pool registered");
    }
    Ok(())
}

async fn pool_at(cx: &HandlerContext<'_>, index: &str) -> Result<Pool, ProjectionError> {
    let entry = cx.get::<PoolIndex>(index).await?;
    cx.get::<Pool>(&entry.pool).await
}

pub async fn pool_name_set(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: PoolNameSet = log.decode()?;
    let mut pool = pool_at(cx, &args.index.to_string()).await?;
    pool.name = args.name;
    cx.save(&pool)
}

pub async fn pool_metadata_updated(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: PoolMetadataUpdated = log.decode()?;
    let metadata = args.new_metadata;
    let rating = RiskRating::from_index(metadata.risk_rating).ok_or_else(|| {
        ProjectionError::malformed(
            sig::POOL_METADATA_UPDATED,
            format!("unknown risk rating {}", metadata.risk_rating),
        )
    })?;

    let mut pool = pool_at(cx, &args.index.to_string()).await?;
    pool.risk_rating = Some(rating);
    pool.category = metadata.category;
    pool.logo_url = metadata.logo_url;
    pool.description = metadata.description;
    cx.save(&pool)
}

// ─── Comptroller ──────────────────────────────────────────────────────────────

pub async fn market_listed(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: MarketListed = log.decode()?;
    let vtoken = normalize_address(&args.c_token)?;
    let comptroller = normalize_address(&log.address)?;

    cx.register_source(&vtoken, VTOKEN);
    let market = ensure_market(cx, &vtoken, &comptroller).await?;
    tracing::info!(market = %market.id, symbol = %market.symbol, pool = %comptroller, "Market listed");
    Ok(())
}

async fn set_membership(
    log: &LogEvent,
    cx: &mut HandlerContext<'_>,
    entered: bool,
) -> Result<(), ProjectionError> {
    let args: MarketMembership = log.decode()?;
    let vtoken = normalize_address(&args.c_token)?;
    let account = normalize_address(&args.account)?;
    let comptroller = normalize_address(&log.address)?;

    let market = ensure_market(cx, &vtoken, &comptroller).await?;
    let mut position = touch_position(cx, &market, &account).await?;
    position.entered_market = Some(entered);
    cx.save(&position)
}

pub async fn market_entered(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    set_membership(log, cx, true).await
}

pub async fn market_exited(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    set_membership(log, cx, false).await
}

