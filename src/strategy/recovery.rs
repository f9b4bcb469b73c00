//! Fibonacci-style recovery staking.
//!
//! Stakes follow `base, base, s[n-2] + s[n-1], ...` until a race pays at
//! least the win threshold. Two flavours differ only in the loss-cut:
//! the simple rule caps the number of races, the partitioned rule (one
//! ledger per location) caps the cumulative amount at risk.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use super::Rounding;
use crate::types::{LedgerError, WagerRecord};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Simple recovery: one ledger per ticket type, count-based loss-cut.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// First stake of a fresh ledger.
    pub base_stake: Decimal,
    /// Realized multiplier at or above which a race counts as won.
    pub win_threshold: Decimal,
    /// History length at which the ledger is abandoned.
    pub loss_cut_count: usize,
    pub rounding: Rounding,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            base_stake: dec!(100),
            win_threshold: dec!(2.6),
            loss_cut_count: 14,
            rounding: Rounding::default(),
        }
    }
}

/// Partitioned recovery: one ledger per (ticket, location), amount-based
/// loss-cut.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PartitionedConfig {
    pub base_stake: Decimal,
    pub win_threshold: Decimal,
    /// Cumulative stake above which the ledger is abandoned.
    pub stake_ceiling: Decimal,
    pub rounding: Rounding,
}

impl Default for PartitionedConfig {
    fn default() -> Self {
        Self {
            base_stake: dec!(100),
            win_threshold: dec!(2.6),
            stake_ceiling: dec!(20000),
            rounding: Rounding::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Escalation
// ---------------------------------------------------------------------------

/// Next stake from the history so far (before rounding).
///
/// - empty history: `base`
/// - one record: repeat its stake
/// - otherwise: sum of the last two stakes
pub fn fibonacci_stake(history: &[WagerRecord], base: Decimal) -> Result<Decimal, LedgerError> {
    let stake_of = |r: &WagerRecord| {
        let total = r.total_stake();
        if total <= Decimal::ZERO {
            Err(LedgerError::Integrity(format!(
                "race {} has non-positive stake {total}",
                r.race_id
            )))
        } else {
            Ok(total)
        }
    };

    match history {
        [] => Ok(base),
        [only] => stake_of(only),
        [.., prev, last] => Ok(stake_of(prev)? + stake_of(last)?),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
