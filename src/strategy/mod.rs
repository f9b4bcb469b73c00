//! Stake progression rules.
//!
//! Four recovery-style staking systems share one shape: look at a
//! partition's history, decide the next stake(s), and after each settlement
//! decide whether the partition has won back its losses (reset) or hit its
//! loss-cut bound (reset) or keeps escalating.
//!
//! `Progression` is the closed set of rules. The ledger store and the
//! settlement engine only ever talk to it, never to a specific variant.

pub mod doubling;
pub mod recovery;
pub mod target;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::debug;

use crate::types::{Candidate, Ledger, LedgerError, StakedSelection, Variant, WagerRecord};
use doubling::DoublingConfig;
use recovery::{PartitionedConfig, RecoveryConfig};
use target::TargetProfitConfig;

// ---------------------------------------------------------------------------
// Rounding
// ---------------------------------------------------------------------------

/// Bet-size rounding: nearest `increment`, never below `floor`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Rounding {
    pub increment: Decimal,
    pub floor: Decimal,
}

impl Default for Rounding {
    fn default() -> Self {
        Self {
            increment: dec!(100),
            floor: dec!(100),
        }
    }
}

impl Rounding {
    /// Round to the nearest increment (midpoint away from zero) and clamp to
    /// the minimum bet.
    pub fn apply(&self, amount: Decimal) -> Decimal {
        let rounded = if self.increment > Decimal::ZERO {
            (amount / self.increment)
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                * self.increment
        } else {
            amount
        };
        rounded.max(self.floor).normalize()
    }
}

// ---------------------------------------------------------------------------
// Plans and verdicts
// ---------------------------------------------------------------------------

/// Stakes decided for the next race.
#[derive(Debug, Clone, PartialEq)]
pub struct StakePlan {
    pub selections: Vec<StakedSelection>,
    /// Loss-unit multiple the stakes were derived from.
    pub unit: u32,
}

impl StakePlan {
    fn single(candidate: &Candidate, stake: Decimal, unit: u32) -> Self {
        Self {
            selections: vec![
                StakedSelection::new(candidate.selection.clone(), stake).with_odds(candidate.odds)
            ],
            unit,
        }
    }

    pub fn total(&self) -> Decimal {
        self.selections.iter().map(|s| s.stake).sum()
    }
}

/// Why a ledger went back to EMPTY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// The partition won (or, for deferred doubling, recovered every loss).
    Win,
    /// The escalation bound was reached.
    LossCut,
}

/// What a settlement did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub won: bool,
    pub reset: Option<ResetReason>,
}

// ---------------------------------------------------------------------------
// Progression
// ---------------------------------------------------------------------------

/// One stake progression rule with its configuration.
#[derive(Debug, Clone)]
pub enum Progression {
    SimpleRecovery(RecoveryConfig),
    TargetProfit(TargetProfitConfig),
    PartitionedRecovery(PartitionedConfig),
    DeferredDoubling(DoublingConfig),
}

impl Progression {
    pub fn variant(&self) -> Variant {
        match self {
            Progression::SimpleRecovery(_) => Variant::SimpleRecovery,
            Progression::TargetProfit(_) => Variant::TargetProfit,
            Progression::PartitionedRecovery(_) => Variant::PartitionedRecovery,
            Progression::DeferredDoubling(_) => Variant::DeferredDoubling,
        }
    }

    /// How many ranked candidates a placement should receive.
    pub fn candidate_count(&self) -> usize {
        match self {
            Progression::TargetProfit(cfg) => cfg.candidates.max(1),
            _ => 1,
        }
    }

    /// Compute the stakes for the next race. The ledger must not have an
    /// outstanding record.
    pub fn next_stakes(
        &self,
        ledger: &Ledger,
        race_id: &str,
        candidates: &[Candidate],
    ) -> Result<StakePlan, LedgerError> {
        if candidates.is_empty() {
            return Err(LedgerError::NoCandidates(race_id.to_string()));
        }
        if ledger.pending().is_some() {
            return Err(LedgerError::Integrity(
                "stake requested while a wager is outstanding".into(),
            ));
        }

        let plan = match self {
            Progression::SimpleRecovery(cfg) => {
                let stake = cfg.rounding.apply(recovery::fibonacci_stake(
                    &ledger.history,
                    cfg.base_stake,
                )?);
                StakePlan::single(&candidates[0], stake, 1)
            }
            Progression::PartitionedRecovery(cfg) => {
                let stake = cfg.rounding.apply(recovery::fibonacci_stake(
                    &ledger.history,
                    cfg.base_stake,
                )?);
                StakePlan::single(&candidates[0], stake, 1)
            }
            Progression::TargetProfit(cfg) => cfg.plan(ledger, candidates)?,
            Progression::DeferredDoubling(cfg) => {
                let unit = cfg.next_unit(ledger);
                let stake = cfg.rounding.apply(cfg.base_stake * Decimal::from(unit));
                StakePlan::single(&candidates[0], stake, unit)
            }
        };

        debug!(
            variant = %self.variant(),
            race_id,
            history = ledger.history.len(),
            total = %plan.total(),
            unit = plan.unit,
            "Stake computed"
        );
        Ok(plan)
    }

    /// Whether a resolved record counts as a win under this rule.
    pub fn is_win(&self, record: &WagerRecord) -> bool {
        let Some(multiplier) = record.realized_multiplier else {
            return false;
        };
        match self {
            Progression::SimpleRecovery(cfg) => multiplier >= cfg.win_threshold,
            Progression::PartitionedRecovery(cfg) => multiplier >= cfg.win_threshold,
            Progression::TargetProfit(_) | Progression::DeferredDoubling(_) => {
                multiplier > Decimal::ONE
            }
        }
    }

    /// Whether the ledger has reached its escalation bound.
    pub fn loss_cut_reached(&self, ledger: &Ledger) -> bool {
        match self {
            Progression::SimpleRecovery(cfg) => ledger.history.len() >= cfg.loss_cut_count,
            Progression::PartitionedRecovery(cfg) => ledger.cumulative_stake() > cfg.stake_ceiling,
            Progression::TargetProfit(cfg) => ledger.history.len() > cfg.max_count,
            Progression::DeferredDoubling(_) => false,
        }
    }

    /// Apply the win/reset rule after the record at `index` was resolved.
    pub fn apply_settlement(
        &self,
        ledger: &mut Ledger,
        index: usize,
    ) -> Result<Verdict, LedgerError> {
        let record = ledger.history.get(index).ok_or_else(|| {
            LedgerError::Integrity(format!("no record at position {index}"))
        })?;
        if !record.resolved {
            return Err(LedgerError::Integrity(format!(
                "race {} is not resolved",
                record.race_id
            )));
        }
        let won = self.is_win(record);
        let unit = record.unit;

        if let Progression::DeferredDoubling(cfg) = self {
            return Ok(cfg.settle(ledger, won, unit));
        }

        let reset = if won {
            Some(ResetReason::Win)
        } else if self.loss_cut_reached(ledger) {
            Some(ResetReason::LossCut)
        } else {
            None
        };
        if reset.is_some() {
            ledger.reset();
        }
        Ok(Verdict { won, reset })
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// `[progression]` table: one sub-table per rule, all optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    pub simple_recovery: RecoveryConfig,
    pub target_profit: TargetProfitConfig,
    pub partitioned_recovery: PartitionedConfig,
    pub deferred_doubling: DoublingConfig,
}

impl ProgressionConfig {
    /// Build the rule for a variant from its configured parameters.
    pub fn rule(&self, variant: Variant) -> Progression {
        match variant {
            Variant::SimpleRecovery => Progression::SimpleRecovery(self.simple_recovery.clone()),
            Variant::TargetProfit => Progression::TargetProfit(self.target_profit.clone()),
            Variant::PartitionedRecovery => {
                Progression::PartitionedRecovery(self.partitioned_recovery.clone())
            }
            Variant::DeferredDoubling => {
                Progression::DeferredDoubling(self.deferred_doubling.clone())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
