//! vToken markets and account positions.
//!
//! Market fields are refreshed from contract reads at most once per block.
//! Mint, Redeem, Borrow and RepayBorrow overwrite position balances with the
//! authoritative values the event carries. Transfers are deltas and are
//! folded in once per log, tracked by the position's transfer watermark.

use bigdecimal::BigDecimal;
use chainprojector_core::codec::{
    mantissa_to_decimal, normalize_address, truncate, underlying_from_vtokens, ZERO_ADDRESS,
};
use chainprojector_core::{CallValue, HandlerContext, LogEvent, Mantissa, ProjectionError};
use num_traits::{ToPrimitive, Zero};

use crate::entities::{Account, AccountVToken, AccountVTokenTransaction, Market};
use crate::events::{Borrow, Mint, Redeem, RepayBorrow, Transfer};

/// Decimals, name and symbol used when the underlying is the native coin.
const NATIVE_DECIMALS: i64 = 18;
const NATIVE_SYMBOL: &str = "BNB";

/// Oracle prices carry `36 - underlying decimals` fractional digits.
const PRICE_SCALE: i64 = 36;

const VTOKEN_DECIMALS: i64 = 8;

const MARKET_READS: &[&str] = &[
    "exchangeRateStored",
    "borrowIndex",
    "totalReserves",
    "getCash",
    "borrowRatePerBlock",
    "supplyRatePerBlock",
    "totalBorrows",
    "totalSupply",
];

// ─── Markets ──────────────────────────────────────────────────────────────────

fn to_decimals(address: &str, raw: Mantissa) -> Result<i64, ProjectionError> {
    raw.as_bigint().to_i64().ok_or_else(|| {
        ProjectionError::Rpc(format!("decimals() on {address} out of range: {raw}"))
    })
}

/// Load the market for `vtoken`, creating and refreshing it on first sight.
pub async fn ensure_market(
    cx: &mut HandlerContext<'_>,
    vtoken: &str,
    pool: &str,
) -> Result<Market, ProjectionError> {
    if let Some(market) = cx.load::<Market>(vtoken).await? {
        return Ok(market);
    }

    cx.prefetch(vtoken, &["name", "symbol", "underlying"]).await?;
    let name = cx.read_string(vtoken, "name").await?;
    let symbol = cx.read_string(vtoken, "symbol").await?;
    let underlying = cx.read_address(vtoken, "underlying").await?;

    let (underlying_name, underlying_symbol, underlying_decimals) = if underlying == ZERO_ADDRESS {
        (NATIVE_SYMBOL.to_string(), NATIVE_SYMBOL.to_string(), NATIVE_DECIMALS)
    } else {
        cx.prefetch(&underlying, &["name", "symbol", "decimals"]).await?;
        let decimals = to_decimals(&underlying, cx.read_mantissa(&underlying, "decimals").await?)?;
        (
            cx.read_string(&underlying, "name").await?,
            cx.read_string(&underlying, "symbol").await?,
            decimals,
        )
    };

    let mut market = Market {
        id: vtoken.to_string(),
        pool: pool.to_string(),
        name,
        symbol,
        underlying_address: underlying,
        underlying_name,
        underlying_symbol,
        underlying_decimals,
        underlying_price_usd: BigDecimal::zero(),
        vtoken_decimals: VTOKEN_DECIMALS,
        accrual_block_number: 0,
        block_timestamp: 0,
        exchange_rate_mantissa: Mantissa::zero(),
        borrow_index_mantissa: Mantissa::zero(),
        reserves_mantissa: Mantissa::zero(),
        cash: BigDecimal::zero(),
        borrow_rate_mantissa: Mantissa::zero(),
        supply_rate_mantissa: Mantissa::zero(),
        treasury_total_borrows_mantissa: Mantissa::zero(),
        treasury_total_supply_mantissa: Mantissa::zero(),
    };
    refresh_market(cx, &mut market).await?;
    cx.save(&market)?;
    tracing::debug!(market = %market.id, pool = %market.pool, symbol = %market.symbol, "Market created");
    Ok(market)
}

/// USD price of one underlying token, truncated to the underlying decimals.
///
/// A price that cannot be scaled is logged and reported as zero.
async fn underlying_price_usd(
    cx: &HandlerContext<'_>,
    vtoken: &str,
    underlying_decimals: i64,
) -> Result<BigDecimal, ProjectionError> {
    let comptroller = cx.read_address(vtoken, "comptroller").await?;
    let oracle = cx.read_address(&comptroller, "oracle").await?;
    if oracle == ZERO_ADDRESS {
        return Ok(BigDecimal::zero());
    }
    let raw = cx
        .read_mantissa_with(&oracle, "getUnderlyingPrice", &[CallValue::Address(vtoken.to_string())])
        .await?;
    match mantissa_to_decimal(raw.as_bigint(), PRICE_SCALE - underlying_decimals) {
        Ok(price) => Ok(truncate(&price, underlying_decimals)),
        Err(err @ ProjectionError::InvalidPrecision { .. }) => {
            tracing::warn!(market = vtoken, %err, "Unscalable oracle price, using zero");
            Ok(BigDecimal::zero())
        }
        Err(err) => Err(err),
    }
}

/// Re-read the market's contract state unless it was refreshed in this block.
pub async fn refresh_market(cx: &HandlerContext<'_>, market: &mut Market) -> Result<(), ProjectionError> {
    let block = cx.block_number();
    if market.accrual_block_number == block {
        return Ok(());
    }
    let vtoken = market.id.clone();
    cx.prefetch(&vtoken, MARKET_READS).await?;

    market.underlying_price_usd = underlying_price_usd(cx, &vtoken, market.underlying_decimals).await?;
    market.exchange_rate_mantissa = cx.read_mantissa(&vtoken, "exchangeRateStored").await?;
    market.borrow_index_mantissa = cx.read_mantissa(&vtoken, "borrowIndex").await?;
    market.reserves_mantissa = cx.read_mantissa(&vtoken, "totalReserves").await?;
    let cash = cx.read_mantissa(&vtoken, "getCash").await?;
    market.cash = truncate(&cash.to_decimal(market.underlying_decimals)?, market.underlying_decimals);
    market.borrow_rate_mantissa = cx.read_mantissa(&vtoken, "borrowRatePerBlock").await?;
    // reverts on some rate models; the reader substitutes zero
    market.supply_rate_mantissa = cx.read_mantissa(&vtoken, "supplyRatePerBlock").await?;
    market.treasury_total_borrows_mantissa = cx.read_mantissa(&vtoken, "totalBorrows").await?;
    market.treasury_total_supply_mantissa = cx.read_mantissa(&vtoken, "totalSupply").await?;
    market.accrual_block_number = block;
    market.block_timestamp = cx.timestamp();
    Ok(())
}

pub async fn accrue_interest(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let vtoken = normalize_address(&log.address)?;
    let mut market = cx.get::<Market>(&vtoken).await?;
    refresh_market(cx, &mut market).await?;
    cx.save(&market)
}

// ─── Positions ────────────────────────────────────────────────────────────────

/// Account and position for `account` in `market`, plus the audit row of
/// the current log. The position's accrual block is moved to this block.
pub async fn touch_position(
    cx: &mut HandlerContext<'_>,
    market: &Market,
    account: &str,
) -> Result<AccountVToken, ProjectionError> {
    cx.get_or_create(account, || Account::new(account)).await?;

    let block = cx.block_number();
    let id = AccountVToken::id_for(&market.id, account);
    let (mut position, _) = cx
        .get_or_create(&id, || AccountVToken::new(&market.id, account, &market.symbol, block))
        .await?;
    position.accrual_block_number = block;

    let event = cx.event().clone();
    cx.save(&AccountVTokenTransaction {
        id: format!("{account}-{}-{}", event.tx_hash, event.log_index),
        account: account.to_string(),
        tx_hash: event.tx_hash,
        timestamp: event.block_timestamp,
        block: event.block_number,
        log_index: event.log_index,
    })?;
    Ok(position)
}

async fn emitting_market(log: &LogEvent, cx: &HandlerContext<'_>) -> Result<Market, ProjectionError> {
    let vtoken = normalize_address(&log.address)?;
    cx.get::<Market>(&vtoken).await
}

pub async fn mint(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: Mint = log.decode()?;
    let market = emitting_market(log, cx).await?;
    let minter = normalize_address(&args.minter)?;
    let mut position = touch_position(cx, &market, &minter).await?;
    position.user_supply_balance_mantissa = args.account_balance;
    cx.save(&position)
}

pub async fn redeem(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: Redeem = log.decode()?;
    let market = emitting_market(log, cx).await?;
    let redeemer = normalize_address(&args.redeemer)?;
    let mut position = touch_position(cx, &market, &redeemer).await?;
    position.user_supply_balance_mantissa = args.account_balance;
    cx.save(&position)
}

async fn set_borrow(
    log: &LogEvent,
    cx: &mut HandlerContext<'_>,
    borrower: &str,
    account_borrows: Mantissa,
) -> Result<(), ProjectionError> {
    let market = emitting_market(log, cx).await?;
    let borrower = normalize_address(borrower)?;
    let borrow_index = cx.read_mantissa(&market.id, "borrowIndex").await?;
    let mut position = touch_position(cx, &market, &borrower).await?;
    position.user_borrow_balance_mantissa = account_borrows;
    position.account_borrow_index_mantissa = borrow_index;
    cx.save(&position)
}

pub async fn borrow(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: Borrow = log.decode()?;
    set_borrow(log, cx, &args.borrower, args.account_borrows).await?;

    let borrower = normalize_address(&args.borrower)?;
    let mut account = cx.get::<Account>(&borrower).await?;
    if !account.has_borrowed {
        account.has_borrowed = true;
        cx.save(&account)?;
    }
    Ok(())
}

pub async fn repay_borrow(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: RepayBorrow = log.decode()?;
    set_borrow(log, cx, &args.borrower, args.account_borrows).await
}

/// Folds a vToken transfer into both positions.
///
/// Legs against the zero address or the vToken itself are the mint and
/// redeem halves of those events: the mint leg is ignored, the redeem leg
/// only adds to the sender's redeemed-underlying total. Balances for both
/// come from the `Mint`/`Redeem` events.
pub async fn transfer(log: &LogEvent, cx: &mut HandlerContext<'_>) -> Result<(), ProjectionError> {
    let args: Transfer = log.decode()?;
    let market = emitting_market(log, cx).await?;
    let from = normalize_address(&args.from)?;
    let to = normalize_address(&args.to)?;
    let log_id = log.id();

    let is_mint = from == ZERO_ADDRESS || from == market.id;
    if is_mint {
        return Ok(());
    }
    let is_redeem = to == ZERO_ADDRESS || to == market.id;
    if from == to {
        touch_position(cx, &market, &from).await?;
        return Ok(());
    }

    let mut sender = touch_position(cx, &market, &from).await?;
    if !sender.has_seen(&log_id) {
        if is_redeem {
            let underlying = underlying_from_vtokens(&args.amount, &market.exchange_rate_mantissa);
            sender.total_underlying_redeemed_mantissa =
                &sender.total_underlying_redeemed_mantissa + &underlying;
        } else {
            sender.user_supply_balance_mantissa = sender
                .user_supply_balance_mantissa
                .checked_sub(&args.amount)
                .ok_or_else(|| {
                    ProjectionError::invariant(
                        "Transfer",
                        format!(
                            "supply balance of {} in {} would drop below zero ({} - {})",
                            from, market.id, sender.user_supply_balance_mantissa, args.amount
                        ),
                    )
                })?;
        }
        sender.last_transfer = Some(log_id.clone());
        cx.save(&sender)?;
    }

    if is_redeem {
        return Ok(());
    }
    let mut receiver = touch_position(cx, &market, &to).await?;
    if !receiver.has_seen(&log_id) {
        receiver.user_supply_balance_mantissa = &receiver.user_supply_balance_mantissa + &args.amount;
        receiver.last_transfer = Some(log_id);
        cx.save(&receiver)?;
    }
    Ok(())
}
