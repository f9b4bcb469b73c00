//! Settlement — reconcile the outstanding wager with its race result.
//!
//! Runs inside the ledger's lock for the whole cycle, including the result
//! fetch. A provider failure counts as "no result yet". With no result,
//! the record stays pending until the daily cutoff, after which it is
//! force-resolved as a loss so the partition can never be stuck.
//!
//! A record placed on an earlier local date is force-resolved on the first
//! settlement without a result, even before today's cutoff.

use std::sync::Arc;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::platforms::ResultProvider;
use crate::storage::LedgerStore;
use crate::strategy::{ProgressionConfig, Verdict};
use crate::types::{LedgerError, LedgerKey, RaceResult};

/// Default daily cutoff for forced resolution (local time).
pub fn default_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Which record to settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleTarget {
    /// The record for a specific race.
    Race(String),
    /// Whatever is outstanding (how the poller calls it).
    Oldest,
}

/// Result of a settlement attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// No unresolved record in the partition.
    NothingPending,
    /// The requested race is not in the ledger (e.g. already reset away).
    UnknownRace { race_id: String },
    /// The requested race was settled earlier; nothing changed.
    AlreadyResolved { race_id: String },
    /// No result yet and still before the cutoff.
    Pending { race_id: String },
    /// The record was resolved and the variant's rule applied.
    Resolved {
        race_id: String,
        multiplier: Option<Decimal>,
        forced: bool,
        verdict: Verdict,
    },
}

/// Executes settlements against the ledger store.
pub struct Settler {
    store: Arc<LedgerStore>,
    progressions: Arc<ProgressionConfig>,
    provider: Arc<dyn ResultProvider>,
    clock: Arc<dyn Clock>,
    cutoff: NaiveTime,
}

impl Settler {
    pub fn new(
        store: Arc<LedgerStore>,
        progressions: Arc<ProgressionConfig>,
        provider: Arc<dyn ResultProvider>,
        clock: Arc<dyn Clock>,
        cutoff: NaiveTime,
    ) -> Self {
        Self {
            store,
            progressions,
            provider,
            clock,
            cutoff,
        }
    }

    /// Settle one record of one partition.
    pub async fn settle(
        &self,
        key: &LedgerKey,
        target: &SettleTarget,
    ) -> Result<SettlementOutcome, LedgerError> {
        let handle = self.store.lock(key).await?;
        let mut ledger = handle.load()?;

        let index = match target {
            SettleTarget::Oldest => match ledger.oldest_pending() {
                Some(i) => i,
                None => return Ok(SettlementOutcome::NothingPending),
            },
            SettleTarget::Race(race_id) => match ledger.position_of(race_id) {
                Some(i) if ledger.history[i].resolved => {
                    debug!(ledger = %key, race_id = %race_id, "Already resolved");
                    return Ok(SettlementOutcome::AlreadyResolved {
                        race_id: race_id.clone(),
                    });
                }
                Some(i) => i,
                None => {
                    return Ok(SettlementOutcome::UnknownRace {
                        race_id: race_id.clone(),
                    })
                }
            },
        };

        let race_id = ledger.history[index].race_id.clone();
        let result = self.fetch(key, &race_id).await;

        let forced = match &result {
            Some(_) => false,
            None => {
                let now = self.clock.now_local();
                let placed = self.clock.to_local(ledger.history[index].placed_at);
                if now.time() < self.cutoff && placed.date() >= now.date() {
                    debug!(ledger = %key, race_id = %race_id, "Result not available yet");
                    return Ok(SettlementOutcome::Pending { race_id });
                }
                warn!(
                    ledger = %key,
                    race_id = %race_id,
                    cutoff = %self.cutoff,
                    "No result by cutoff, forcing resolution as a loss"
                );
                true
            }
        };

        let now = self.clock.now_utc();
        let record = &mut ledger.history[index];
        match &result {
            Some(r) => record.resolve(|sel| r.multiplier(sel), false, now),
            None => record.resolve(|_| None, true, now),
        }
        let multiplier = record.realized_multiplier;

        let rule = self.progressions.rule(key.variant);
        let verdict = rule.apply_settlement(&mut ledger, index)?;
        handle.save(&ledger)?;

        info!(
            ledger = %key,
            race_id = %race_id,
            multiplier = ?multiplier,
            forced,
            won = verdict.won,
            reset = ?verdict.reset,
            "Wager settled"
        );

        Ok(SettlementOutcome::Resolved {
            race_id,
            multiplier,
            forced,
            verdict,
        })
    }

    async fn fetch(&self, key: &LedgerKey, race_id: &str) -> Option<RaceResult> {
        match self.provider.fetch_result(race_id).await {
            Ok(result) => result,
            Err(e) => {
                warn!(ledger = %key, race_id, error = %e, "Result fetch failed");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
