//! Pari-mutuel arithmetic.
//!
//! Odds are never stored: they are the live ratio of the whole pool to one
//! option's pool, so every new stake moves every participant's implied odds.
//! The potential winnings recorded on a participation are a snapshot only.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::ledger::CREDIT_SCALE;

/// `total_pool / option_pool`, or 1.0 while nobody has backed the option.
pub fn odds(total_pool: Decimal, option_pool: Decimal) -> Decimal {
    if option_pool.is_zero() {
        Decimal::ONE
    } else {
        total_pool / option_pool
    }
}

/// Winnings a stake would return at `odds`, truncated to whole cents.
pub fn potential_winnings(stake: Decimal, odds: Decimal) -> Decimal {
    truncate(stake * odds)
}

/// A winner's pro-rata share of the entire pool. No house cut.
///
/// Truncated to whole cents so the sum over all winners never exceeds the pool.
pub fn payout(stake: Decimal, winning_pool: Decimal, total_pool: Decimal) -> Decimal {
    if winning_pool.is_zero() {
        return Decimal::ZERO;
    }
    truncate(stake * total_pool / winning_pool)
}

fn truncate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CREDIT_SCALE, RoundingStrategy::ToZero)
}
