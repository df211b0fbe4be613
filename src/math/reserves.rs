// DANS: src/math/reserves.rs

use crate::decoders::PoolRecord;
use crate::error::{PoolSide, PoolSyncError};
use rust_decimal::{Decimal, RoundingStrategy};

/// Précision du prix stocké, en chiffres significatifs.
pub const PRICE_SIGNIFICANT_DIGITS: u32 = 20;

/// Réserves nettes et prix spot d'un pool, dérivés des soldes de ses vaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveQuote {
    pub base_reserve: u128,
    pub quote_reserve: u128,
    /// Prix quote par base, normalisé par les décimales de chaque côté.
    pub price: Decimal,
}

/// Calcule les réserves nettes (solde du vault moins le montant dû au protocole)
/// et le prix spot `(quote / 10^qd) / (base / 10^bd)`.
pub fn compute(
    record: &PoolRecord,
    base_vault_balance: u128,
    quote_vault_balance: u128,
) -> Result<ReserveQuote, PoolSyncError> {
    let base_reserve = net_reserve(PoolSide::Base, base_vault_balance, record.base_need_take_pnl() as u128)?;
    let quote_reserve = net_reserve(PoolSide::Quote, quote_vault_balance, record.quote_need_take_pnl() as u128)?;

    if base_reserve == 0 {
        return Err(PoolSyncError::DivisionByZero);
    }

    let base = scaled(base_reserve, record.base_decimal())?;
    let quote = scaled(quote_reserve, record.quote_decimal())?;
    let price = quote
        .checked_div(base)
        .ok_or_else(|| PoolSyncError::PriceOutOfRange(format!("{} / {}", quote, base)))?
        .round_sf_with_strategy(PRICE_SIGNIFICANT_DIGITS, RoundingStrategy::MidpointAwayFromZero)
        .ok_or_else(|| PoolSyncError::PriceOutOfRange("arrondi du prix".to_string()))?
        .normalize();

    Ok(ReserveQuote { base_reserve, quote_reserve, price })
}

fn net_reserve(side: PoolSide, balance: u128, pending: u128) -> Result<u128, PoolSyncError> {
    balance
        .checked_sub(pending)
        .ok_or(PoolSyncError::NegativeReserve { side, balance, pending })
}

/// `amount / 10^decimals` en décimal exact.
fn scaled(amount: u128, decimals: u64) -> Result<Decimal, PoolSyncError> {
    let mantissa = i128::try_from(amount)
        .map_err(|_| PoolSyncError::PriceOutOfRange(format!("réserve {} trop grande", amount)))?;
    let scale = u32::try_from(decimals)
        .map_err(|_| PoolSyncError::PriceOutOfRange(format!("décimales {} invalides", decimals)))?;
    Decimal::try_from_i128_with_scale(mantissa, scale)
        .map_err(|e| PoolSyncError::PriceOutOfRange(format!("{} avec {} décimales : {}", amount, decimals, e)))
}
