//! Race desk — one race, end to end.
//!
//! Asks the candidate source for the ranked list, hands the top entries to
//! placement, and submits the resulting stakes. Simulation ledgers never
//! reach the order placer.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::placement::{PlacementOutcome, Placer};
use crate::platforms::{CandidateSource, OrderPlacer, OrderReceipt};
use crate::types::LedgerKey;

/// What happened for one race.
#[derive(Debug, Clone)]
pub struct DeskReport {
    pub race_id: String,
    pub outcome: PlacementOutcome,
    /// Present only when an order was actually submitted.
    pub receipt: Option<OrderReceipt>,
}

pub struct RaceDesk {
    placer: Arc<Placer>,
    candidates: Arc<dyn CandidateSource>,
    orders: Option<Arc<dyn OrderPlacer>>,
}

impl RaceDesk {
    pub fn new(
        placer: Arc<Placer>,
        candidates: Arc<dyn CandidateSource>,
        orders: Option<Arc<dyn OrderPlacer>>,
    ) -> Self {
        Self {
            placer,
            candidates,
            orders,
        }
    }

    /// Stake one race for one partition.
    ///
    /// The wager is persisted before any order is sent. An order failure is
    /// returned as an error and the record stays in the ledger, to be
    /// settled like any other.
    pub async fn run_race(&self, key: &LedgerKey, race_id: &str) -> Result<DeskReport> {
        let mut ranked = self
            .candidates
            .candidates(race_id)
            .await
            .with_context(|| format!("Failed to fetch candidates for race {race_id}"))?;
        ranked.truncate(self.placer.progressions().rule(key.variant).candidate_count());

        let outcome = self.placer.place(key, race_id, &ranked).await?;

        let stakes = match &outcome {
            PlacementOutcome::Skipped { .. } => {
                return Ok(DeskReport {
                    race_id: race_id.to_string(),
                    outcome,
                    receipt: None,
                })
            }
            PlacementOutcome::Placed { stakes, .. } => stakes,
        };

        if !key.mode.is_live() {
            for s in stakes {
                info!(
                    ledger = %key,
                    race_id,
                    selection = %s.selection,
                    stake = %s.stake,
                    "[SIMULATION] Would submit order"
                );
            }
            return Ok(DeskReport {
                race_id: race_id.to_string(),
                outcome,
                receipt: None,
            });
        }

        let Some(orders) = &self.orders else {
            warn!(ledger = %key, race_id, "Live ledger but no order placer configured");
            return Ok(DeskReport {
                race_id: race_id.to_string(),
                outcome,
                receipt: None,
            });
        };

        let receipt = orders
            .submit(race_id, stakes)
            .await
            .with_context(|| format!("Order submission failed for race {race_id}"))?;
        info!(ledger = %key, %receipt, "Order submitted");

        Ok(DeskReport {
            race_id: race_id.to_string(),
            outcome,
            receipt: Some(receipt),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
