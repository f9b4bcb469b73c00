//! Placement — decide and record the stake for the next race.
//!
//! Runs entirely inside the ledger's lock: load, refuse if a wager is still
//! outstanding, compute the stakes, append the unresolved record, save.
//! Submitting the order is the caller's job.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::storage::LedgerStore;
use crate::strategy::{ProgressionConfig, ResetReason};
use crate::types::{Candidate, LedgerError, LedgerKey, StakedSelection, WagerRecord};

/// Result of a placement attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementOutcome {
    /// A new unresolved record was saved with these stakes.
    Placed {
        race_id: String,
        stakes: Vec<StakedSelection>,
        /// Set when the ledger was already at its loss-cut bound and was
        /// cleared before staking.
        reset_before: Option<ResetReason>,
    },
    /// The partition still has an unsettled wager.
    Skipped { pending_race: String },
}

impl PlacementOutcome {
    pub fn stakes(&self) -> &[StakedSelection] {
        match self {
            PlacementOutcome::Placed { stakes, .. } => stakes,
            PlacementOutcome::Skipped { .. } => &[],
        }
    }

    pub fn is_placed(&self) -> bool {
        matches!(self, PlacementOutcome::Placed { .. })
    }
}

/// Executes placements against the ledger store.
pub struct Placer {
    store: Arc<LedgerStore>,
    progressions: Arc<ProgressionConfig>,
    clock: Arc<dyn Clock>,
}

impl Placer {
    pub fn new(
        store: Arc<LedgerStore>,
        progressions: Arc<ProgressionConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            progressions,
            clock,
        }
    }

    pub fn progressions(&self) -> &ProgressionConfig {
        &self.progressions
    }

    /// Stake the next race for one partition.
    pub async fn place(
        &self,
        key: &LedgerKey,
        race_id: &str,
        candidates: &[Candidate],
    ) -> Result<PlacementOutcome, LedgerError> {
        if candidates.is_empty() {
            return Err(LedgerError::NoCandidates(race_id.to_string()));
        }
        let rule = self.progressions.rule(key.variant);

        let handle = self.store.lock(key).await?;
        let mut ledger = handle.load()?;

        if let Some(pending) = ledger.pending() {
            info!(
                ledger = %key,
                race_id,
                pending_race = %pending.race_id,
                "Placement skipped, awaiting prior settlement"
            );
            return Ok(PlacementOutcome::Skipped {
                pending_race: pending.race_id.clone(),
            });
        }

        let mut reset_before = None;
        if !ledger.is_empty() && rule.loss_cut_reached(&ledger) {
            warn!(
                ledger = %key,
                records = ledger.history.len(),
                at_risk = %ledger.cumulative_stake(),
                "Loss-cut reached before placement, resetting ledger"
            );
            ledger.reset();
            reset_before = Some(ResetReason::LossCut);
        }

        let plan = rule.next_stakes(&ledger, race_id, candidates)?;
        ledger.history.push(WagerRecord::new(
            race_id,
            plan.selections.clone(),
            plan.unit,
            self.clock.now_utc(),
        ));
        handle.save(&ledger)?;

        info!(
            ledger = %key,
            race_id,
            sequence = ledger.history.len(),
            total = %plan.total(),
            selections = plan.selections.len(),
            "Wager placed"
        );

        Ok(PlacementOutcome::Placed {
            race_id: race_id.to_string(),
            stakes: plan.selections,
            reset_before,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
