//! Settlement poller — periodic sweep over every configured partition.
//!
//! Each tick settles the oldest outstanding wager of every partition,
//! concurrently across partitions. Failures are logged and counted; the
//! loop itself never stops on a per-partition error.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info};

use super::settlement::{SettleTarget, SettlementOutcome, Settler};
use crate::strategy::ResetReason;
use crate::types::LedgerKey;

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

/// Outcome counts for one or more sweeps. Callers fold these together
/// instead of keeping process-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepTally {
    pub checked: u64,
    pub idle: u64,
    pub pending: u64,
    pub won: u64,
    pub lost: u64,
    pub forced: u64,
    pub loss_cuts: u64,
    pub errors: u64,
}

impl SweepTally {
    pub fn record(&mut self, outcome: &SettlementOutcome) {
        self.checked += 1;
        match outcome {
            SettlementOutcome::NothingPending
            | SettlementOutcome::UnknownRace { .. }
            | SettlementOutcome::AlreadyResolved { .. } => self.idle += 1,
            SettlementOutcome::Pending { .. } => self.pending += 1,
            SettlementOutcome::Resolved {
                forced, verdict, ..
            } => {
                if verdict.won {
                    self.won += 1;
                } else {
                    self.lost += 1;
                }
                if *forced {
                    self.forced += 1;
                }
                if verdict.reset == Some(ResetReason::LossCut) {
                    self.loss_cuts += 1;
                }
            }
        }
    }

    pub fn record_error(&mut self) {
        self.checked += 1;
        self.errors += 1;
    }

    /// Fold another tally into this one.
    pub fn absorb(&mut self, other: &SweepTally) {
        self.checked += other.checked;
        self.idle += other.idle;
        self.pending += other.pending;
        self.won += other.won;
        self.lost += other.lost;
        self.forced += other.forced;
        self.loss_cuts += other.loss_cuts;
        self.errors += other.errors;
    }

    /// Won / (won + lost) as a percentage. 0.0 before any settlement.
    pub fn hit_rate(&self) -> f64 {
        let settled = self.won + self.lost;
        if settled == 0 {
            0.0
        } else {
            self.won as f64 / settled as f64 * 100.0
        }
    }
}

impl fmt::Display for SweepTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked={} pending={} won={} lost={} (forced={}) ",
            self.checked, self.pending, self.won, self.lost, self.forced,
        )?;
        write!(
            f,
            "loss_cuts={} errors={} hit_rate={:.1}%",
            self.loss_cuts,
            self.errors,
            self.hit_rate(),
        )
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct SettlementPoller {
    settler: Arc<Settler>,
    keys: Vec<LedgerKey>,
    interval: Duration,
}

impl SettlementPoller {
    pub fn new(settler: Arc<Settler>, keys: Vec<LedgerKey>, interval: Duration) -> Self {
        Self {
            settler,
            keys,
            interval,
        }
    }

    pub fn keys(&self) -> &[LedgerKey] {
        &self.keys
    }

    /// Settle the oldest outstanding wager of every partition once.
    pub async fn sweep(&self) -> SweepTally {
        let settles = self.keys.iter().map(|key| async move {
            let result = self.settler.settle(key, &SettleTarget::Oldest).await;
            (key, result)
        });

        let mut tally = SweepTally::default();
        for (key, result) in join_all(settles).await {
            match result {
                Ok(outcome) => tally.record(&outcome),
                Err(e) => {
                    error!(ledger = %key, error = %e, "Settlement failed");
                    tally.record_error();
                }
            }
        }
        tally
    }

    /// Sweep on a fixed interval until `shutdown` resolves. Returns the
    /// tally accumulated over the whole run.
    pub async fn run<F>(&self, shutdown: F) -> SweepTally
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            partitions = self.keys.len(),
            interval_secs = self.interval.as_secs(),
            "Settlement poller started"
        );

        let mut total = SweepTally::default();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let tally = self.sweep().await;
                    if tally.won + tally.lost + tally.errors > 0 {
                        info!(%tally, "Sweep complete");
                    }
                    total.absorb(&tally);
                }
                _ = &mut shutdown => {
                    info!(%total, "Settlement poller stopped");
                    break;
                }
            }
        }
        total
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
