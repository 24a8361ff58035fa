#![no_std]

//! Shared constants and calendar/pro-rata math used across the Tenure
//! contracts. Keeping the month arithmetic here guarantees the reward
//! manager and the staking ledger can never disagree on a month index.

use soroban_sdk::{contractclient, Env};

// ============================================================================
// Constants
// ============================================================================

/// Basis points representing 100% (10000 basis points = 100%)
pub const MAX_BASIS_POINTS: u32 = 10_000;

/// Fixed-length accounting month (30 days)
pub const SECONDS_PER_MONTH: u64 = 30 * 86_400;

/// Denominator of every plan's benefit rate: rates are expressed as
/// `numerator / 15`, e.g. 13/15 for a one-year plan.
pub const BENEFIT_RATE_DENOMINATOR: u32 = 15;

/// Denominator for the loan collateral fraction. A position may back a loan
/// up to `amount * benefit_fraction_of_15 / 30`, so a top-rate 15/15 plan
/// collateralizes at most half the position.
pub const LOAN_COLLATERAL_DENOMINATOR: u32 = 2 * BENEFIT_RATE_DENOMINATOR;

/// Cooldown after a position matures before a nominee may claim its residual
pub const NOMINEE_COOLDOWN_SECONDS: u64 = 12 * SECONDS_PER_MONTH;

// ============================================================================
// Reward period arithmetic
// ============================================================================

/// Month index for a wall-clock timestamp: elapsed fixed-length months since
/// genesis. Month 0 is the bootstrap month; timestamps before genesis also
/// map to month 0.
pub fn month_index(now: u64, genesis: u64) -> u64 {
    if now <= genesis {
        return 0;
    }
    (now - genesis) / SECONDS_PER_MONTH
}

/// A position accrues benefit for month `m` when it was locked throughout
/// that month: strictly after its start month and no later than its last
/// lock month. The start month itself never accrues.
pub fn is_active_month(start_month: u64, duration_months: u64, m: u64) -> bool {
    m > start_month && m <= start_month + duration_months
}

/// Wall-clock timestamp at which a position's lock expires
pub fn maturity_timestamp(start_month: u64, duration_months: u64, genesis: u64) -> u64 {
    genesis + (start_month + duration_months) * SECONDS_PER_MONTH
}

// ============================================================================
// Payout math
// ============================================================================

/// Pro-rata share of a monthly pool, floored so the sum of all shares can
/// never exceed the pool. Zero total active stake yields a zero share.
/// Returns None on arithmetic overflow.
pub fn pro_rata_share(pool: i128, amount: i128, total_active: i128) -> Option<i128> {
    if total_active <= 0 {
        return Some(0);
    }
    pool.checked_mul(amount)?.checked_div(total_active)
}

/// Fraction of an amount by integer numerator/denominator, floored.
/// Returns None on arithmetic overflow or a zero denominator.
pub fn fraction_of(amount: i128, numerator: u32, denominator: u32) -> Option<i128> {
    if denominator == 0 {
        return None;
    }
    amount
        .checked_mul(numerator as i128)?
        .checked_div(denominator as i128)
}

/// Split a benefit payout into its liquid and accrual halves. An odd unit
/// goes to the liquid side.
pub fn split_payout(total: i128) -> (i128, i128) {
    let accrual = total / 2;
    (total - accrual, accrual)
}

// ============================================================================
// Cross-contract interfaces
// ============================================================================

/// Entry point the reward manager invokes on the staking ledger when it
/// releases a month's reward pool.
#[contractclient(name = "StakingPoolClient")]
pub trait StakingPoolInterface {
    /// Record `amount` as the reward pool for `month`. The matching tokens
    /// must already have been transferred to the staking contract.
    fn record_monthly_pool(env: Env, month: u64, amount: i128);
}

// ============================================================================
// Tests
// ============================================================================
