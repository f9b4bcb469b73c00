//! Target-profit staking across several candidates.
//!
//! Every race aims for one payout `T`: the base profit goal on a fresh
//! ledger, afterwards everything paid so far times `want_rate`. Each
//! candidate is staked `T / odds` so that whichever one wins returns
//! roughly `T`. Once the ledger is longer than `limit_count` the rate drops
//! to 1.0 (break-even) to slow the escalation; longer than `max_count` and
//! the ledger is abandoned.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use super::{Rounding, StakePlan};
use crate::types::{Candidate, Ledger, LedgerError, StakedSelection};

/// Target-profit parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetProfitConfig {
    /// Payout target for the first race of a fresh ledger.
    pub base_profit: Decimal,
    /// Multiplier on cumulative stake for later targets.
    pub want_rate: Decimal,
    /// History length after which `want_rate` is forced to 1.0.
    pub limit_count: usize,
    /// History length after which the ledger is abandoned.
    pub max_count: usize,
    /// Ranked candidates to stake per race.
    pub candidates: usize,
    pub rounding: Rounding,
}

impl Default for TargetProfitConfig {
    fn default() -> Self {
        Self {
            base_profit: dec!(1000),
            want_rate: dec!(1.5),
            limit_count: 5,
            max_count: 10,
            candidates: 3,
            rounding: Rounding::default(),
        }
    }
}

impl TargetProfitConfig {
    /// Effective rate for a ledger of `n` records.
    pub fn rate_for(&self, n: usize) -> Decimal {
        if n > self.limit_count {
            Decimal::ONE
        } else {
            self.want_rate
        }
    }

    /// Payout target for the next race.
    pub fn target(&self, ledger: &Ledger) -> Decimal {
        let n = ledger.history.len();
        if n == 0 {
            self.base_profit
        } else {
            ledger.cumulative_stake() * self.rate_for(n)
        }
    }

    pub(crate) fn plan(
        &self,
        ledger: &Ledger,
        candidates: &[Candidate],
    ) -> Result<StakePlan, LedgerError> {
        let target = self.target(ledger);
        let take = self.candidates.max(1);

        let selections = candidates
            .iter()
            .take(take)
            .map(|c| {
                if c.odds <= Decimal::ZERO {
                    return Err(LedgerError::InvalidCandidate(format!(
                        "selection {} has non-positive odds {}",
                        c.selection, c.odds
                    )));
                }
                let stake = self.rounding.apply(target / c.odds);
                Ok(StakedSelection::new(c.selection.clone(), stake).with_odds(c.odds))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StakePlan {
            selections,
            unit: 1,
        })
    }
}
