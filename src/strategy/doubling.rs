//! Progressive doubling with deferred aggression.
//!
//! Stakes stay at one base unit until `aggression_after` consecutive
//! losses. From then on each race stakes twice the oldest outstanding loss
//! unit. Losses queue their unit at the tail; each win retires the oldest
//! unit, and an empty queue means every loss has been recovered.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::info;

use super::{ResetReason, Rounding, Verdict};
use crate::types::Ledger;

/// Deferred-doubling parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DoublingConfig {
    /// Stake for one unit.
    pub base_stake: Decimal,
    /// Consecutive losses before units start doubling.
    pub aggression_after: u32,
    pub rounding: Rounding,
}

impl Default for DoublingConfig {
    fn default() -> Self {
        Self {
            base_stake: dec!(100),
            aggression_after: 2,
            rounding: Rounding::default(),
        }
    }
}

impl DoublingConfig {
    /// Unit multiple for the next race.
    pub fn next_unit(&self, ledger: &Ledger) -> u32 {
        if !ledger.aggressive {
            return 1;
        }
        ledger
            .loss_units
            .front()
            .map(|u| u.saturating_mul(2))
            .unwrap_or(1)
    }

    /// Update the loss queue after a race staked at `unit` settled.
    pub(crate) fn settle(&self, ledger: &mut Ledger, won: bool, unit: u32) -> Verdict {
        if won {
            ledger.consecutive_losses = 0;
            ledger.loss_units.pop_front();
            if ledger.loss_units.is_empty() {
                ledger.reset();
                return Verdict {
                    won,
                    reset: Some(ResetReason::Win),
                };
            }
            return Verdict { won, reset: None };
        }

        ledger.loss_units.push_back(unit);
        ledger.consecutive_losses += 1;
        if !ledger.aggressive && ledger.consecutive_losses >= self.aggression_after {
            ledger.aggressive = true;
            info!(
                losses = ledger.consecutive_losses,
                queued = ledger.loss_units.len(),
                "Deferred doubling turned aggressive"
            );
        }
        Verdict { won, reset: None }
    }
}
