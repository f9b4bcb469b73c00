//! End-to-end ledger cycles: race desk placement, settlement, poller sweeps.

use chrono::{FixedOffset, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use stakebook::clock::FixedClock;
use stakebook::engine::desk::RaceDesk;
use stakebook::engine::placement::{PlacementOutcome, Placer};
use stakebook::engine::poller::SettlementPoller;
use stakebook::engine::settlement::{default_cutoff, SettleTarget, SettlementOutcome, Settler};
use stakebook::storage::LedgerStore;
use stakebook::strategy::{ProgressionConfig, ResetReason};
use stakebook::types::{LedgerKey, Mode, PartitionKey, Variant};

use crate::fakes::{total, FakeRacing, TempRoot};

struct Harness {
    _root: TempRoot,
    store: Arc<LedgerStore>,
    racing: Arc<FakeRacing>,
    clock: Arc<FixedClock>,
    settler: Arc<Settler>,
    desk: RaceDesk,
}

fn local(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 5, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

impl Harness {
    fn new() -> Self {
        Self::with_racing(FakeRacing::new())
    }

    fn with_racing(racing: FakeRacing) -> Self {
        let root = TempRoot::new();
        let store = Arc::new(LedgerStore::new(&root.0));
        let racing = Arc::new(racing);
        let jst = FixedOffset::east_opt(9 * 3600).unwrap();
        let clock = Arc::new(FixedClock::at_local(local(2, 12, 0), jst));
        let progressions = Arc::new(ProgressionConfig::default());

        let placer = Arc::new(Placer::new(
            store.clone(),
            progressions.clone(),
            clock.clone(),
        ));
        let settler = Arc::new(Settler::new(
            store.clone(),
            progressions,
            racing.clone(),
            clock.clone(),
            default_cutoff(),
        ));
        let desk = RaceDesk::new(placer, racing.clone(), Some(racing.clone()));

        Self {
            _root: root,
            store,
            racing,
            clock,
            settler,
            desk,
        }
    }

    /// Place through the desk and return the staked total (zero if skipped).
    async fn place(&self, key: &LedgerKey, race: &str) -> Decimal {
        let report = self.desk.run_race(key, race).await.unwrap();
        total(report.outcome.stakes())
    }

    async fn settle(&self, key: &LedgerKey) -> SettlementOutcome {
        self.settler.settle(key, &SettleTarget::Oldest).await.unwrap()
    }

    fn unresolved(&self, key: &LedgerKey) -> usize {
        self.store.snapshot(key).unwrap().unresolved_count()
    }
}

fn key(variant: Variant, ticket: &str, mode: Mode) -> LedgerKey {
    LedgerKey::new(variant, PartitionKey::new(ticket), mode)
}

fn verdict_of(outcome: &SettlementOutcome) -> (bool, Option<ResetReason>) {
    match outcome {
        SettlementOutcome::Resolved { verdict, .. } => (verdict.won, verdict.reset),
        other => panic!("expected a resolution, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Recovery cycles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_recovery_cycle_escalates_then_resets_on_win() {
    let h = Harness::new();
    let k = key(Variant::SimpleRecovery, "win", Mode::Simulation);

    let mut stakes = Vec::new();
    for race in ["R1", "R2", "R3"] {
        stakes.push(h.place(&k, race).await);
        h.racing.publish_loss(race);
        assert_eq!(verdict_of(&h.settle(&k).await), (false, None));
    }
    stakes.push(h.place(&k, "R4").await);
    assert_eq!(stakes, vec![dec!(100), dec!(100), dec!(200), dec!(300)]);

    // "5" pays 3.10x, above the 2.60 threshold
    h.racing.publish("R4", "5", 310);
    assert_eq!(
        verdict_of(&h.settle(&k).await),
        (true, Some(ResetReason::Win))
    );
    assert!(h.store.snapshot(&k).unwrap().is_empty());
    assert_eq!(h.place(&k, "R5").await, dec!(100));
}

#[tokio::test]
async fn test_small_payout_is_not_a_recovery_win() {
    let h = Harness::new();
    let k = key(Variant::SimpleRecovery, "win", Mode::Simulation);

    h.place(&k, "R1").await;
    h.racing.publish("R1", "5", 180);
    let outcome = h.settle(&k).await;
    match &outcome {
        SettlementOutcome::Resolved { multiplier, .. } => assert_eq!(*multiplier, Some(dec!(1.80))),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(verdict_of(&outcome), (false, None));
    assert_eq!(h.place(&k, "R2").await, dec!(100));
    assert_eq!(h.store.snapshot(&k).unwrap().history.len(), 2);
}

#[tokio::test]
async fn test_fourteen_losses_cut_and_restart_at_base() {
    let h = Harness::new();
    let k = key(Variant::SimpleRecovery, "win", Mode::Simulation);

    for i in 0..14 {
        let race = format!("R{i}");
        assert!(h.place(&k, &race).await > Decimal::ZERO);
        h.racing.publish_loss(&race);
        h.settle(&k).await;
    }
    // The fourteenth loss already reached the bound and cleared the ledger.
    assert!(h.store.snapshot(&k).unwrap().is_empty());
    assert_eq!(h.place(&k, "R14").await, dec!(100));
}

#[tokio::test]
async fn test_partitioned_recovery_cuts_on_amount_at_risk() {
    let h = Harness::new();
    let k = LedgerKey::new(
        Variant::PartitionedRecovery,
        PartitionKey::with_location("place", "tokyo"),
        Mode::Simulation,
    );

    // 100 100 200 300 500 800 1300 2100 3400 5500 8900: cumulative 23200 > 20000
    let mut last = None;
    for i in 0..11 {
        let race = format!("P{i}");
        h.place(&k, &race).await;
        h.racing.publish_loss(&race);
        last = Some(h.settle(&k).await);
    }
    assert_eq!(
        verdict_of(&last.unwrap()),
        (false, Some(ResetReason::LossCut))
    );
    assert!(h.store.snapshot(&k).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Target profit and deferred doubling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_target_profit_raises_target_after_loss() {
    let h = Harness::new();
    let k = key(Variant::TargetProfit, "trio", Mode::Simulation);

    // T = 1000 on a fresh ledger: 250 -> 300, 500, 125 -> 100
    assert_eq!(h.place(&k, "T1").await, dec!(900));
    h.racing.publish_loss("T1");
    h.settle(&k).await;

    // T = 900 * 1.5 = 1350: 337.5 -> 300, 675 -> 700, 168.75 -> 200
    let report = h.desk.run_race(&k, "T2").await.unwrap();
    let stakes: Vec<Decimal> = report.outcome.stakes().iter().map(|s| s.stake).collect();
    assert_eq!(stakes, vec![dec!(300), dec!(700), dec!(200)]);

    // Any selection paying above 1.0x wins and clears the ledger.
    h.racing.publish("T2", "1", 210);
    assert_eq!(
        verdict_of(&h.settle(&k).await),
        (true, Some(ResetReason::Win))
    );
    assert!(h.store.snapshot(&k).unwrap().is_empty());
}

#[tokio::test]
async fn test_deferred_doubling_waits_then_doubles() {
    let h = Harness::new();
    let k = key(Variant::DeferredDoubling, "quinella", Mode::Simulation);

    assert_eq!(h.place(&k, "D1").await, dec!(100));
    h.racing.publish_loss("D1");
    h.settle(&k).await;
    assert_eq!(h.place(&k, "D2").await, dec!(100));
    h.racing.publish_loss("D2");
    h.settle(&k).await;

    // Two losses queued, now aggressive: twice the oldest unit.
    assert_eq!(h.place(&k, "D3").await, dec!(200));
    h.racing.publish("D3", "5", 150);
    assert_eq!(verdict_of(&h.settle(&k).await), (true, None));

    assert_eq!(h.place(&k, "D4").await, dec!(200));
    h.racing.publish("D4", "5", 150);
    assert_eq!(
        verdict_of(&h.settle(&k).await),
        (true, Some(ResetReason::Win))
    );
    assert_eq!(h.place(&k, "D5").await, dec!(100));
}

// ---------------------------------------------------------------------------
// Forced resolution and provider failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_result_forced_after_cutoff() {
    let h = Harness::new();
    let k = key(Variant::SimpleRecovery, "win", Mode::Simulation);

    h.clock.set_local(local(2, 20, 0));
    h.place(&k, "F1").await;
    assert_eq!(
        h.settle(&k).await,
        SettlementOutcome::Pending {
            race_id: "F1".into()
        }
    );
    assert_eq!(h.unresolved(&k), 1);

    h.clock.set_local(local(2, 23, 5));
    match h.settle(&k).await {
        SettlementOutcome::Resolved {
            forced, multiplier, verdict, ..
        } => {
            assert!(forced);
            assert_eq!(multiplier, None);
            assert!(!verdict.won);
        }
        other => panic!("unexpected {other:?}"),
    }
    let ledger = h.store.snapshot(&k).unwrap();
    assert!(ledger.history[0].forced);
    assert_eq!(ledger.unresolved_count(), 0);

    // Counted as a loss for escalation.
    assert_eq!(h.place(&k, "F2").await, dec!(100));
    h.clock.set_local(local(3, 9, 30));
    let (won, _) = verdict_of(&h.settle(&k).await);
    assert!(!won);
    assert_eq!(h.place(&k, "F3").await, dec!(200));
}

#[tokio::test]
async fn test_provider_outage_is_no_result_yet() {
    let h = Harness::new();
    let k = key(Variant::SimpleRecovery, "win", Mode::Simulation);

    h.place(&k, "O1").await;
    h.racing.publish("O1", "5", 400);
    h.racing.set_outage(true);
    assert!(matches!(
        h.settle(&k).await,
        SettlementOutcome::Pending { .. }
    ));

    h.racing.set_outage(false);
    assert_eq!(
        verdict_of(&h.settle(&k).await),
        (true, Some(ResetReason::Win))
    );
}

#[tokio::test]
async fn test_settling_same_race_twice_changes_nothing() {
    let h = Harness::new();
    let k = key(Variant::SimpleRecovery, "win", Mode::Simulation);

    h.place(&k, "I1").await;
    h.racing.publish_loss("I1");
    let target = SettleTarget::Race("I1".into());
    h.settler.settle(&k, &target).await.unwrap();
    let before = h.store.snapshot(&k).unwrap();

    assert_eq!(
        h.settler.settle(&k, &target).await.unwrap(),
        SettlementOutcome::AlreadyResolved {
            race_id: "I1".into()
        }
    );
    assert_eq!(h.store.snapshot(&k).unwrap(), before);
}

// ---------------------------------------------------------------------------
// Invariants across many operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_never_more_than_one_unresolved() {
    let h = Harness::new();
    let keys: Vec<LedgerKey> = Variant::ALL
        .iter()
        .map(|v| key(*v, "win", Mode::Simulation))
        .collect();

    for step in 0..40u32 {
        for k in &keys {
            let race = format!("{}-{step}", k.variant);
            // Two attempts per step; the second must always be refused.
            h.desk.run_race(k, &race).await.unwrap();
            let again = h.desk.run_race(k, &format!("{race}b")).await.unwrap();
            assert!(!again.outcome.is_placed());
            assert!(h.unresolved(k) <= 1);

            // Every third step the result is late and the wager stays open.
            let outstanding = h.store.snapshot(k).unwrap().pending().map(|r| r.race_id.clone());
            if let Some(open) = outstanding.filter(|_| step % 3 != 1) {
                if step % 5 == 4 {
                    h.racing.publish(&open, "5", 400);
                } else {
                    h.racing.publish_loss(&open);
                }
            }
            h.settle(k).await;
            let ledger = h.store.snapshot(k).unwrap();
            assert!(ledger.unresolved_count() <= 1);
            ledger.check_integrity().unwrap();
        }
    }
}

#[tokio::test]
async fn test_concurrent_desk_and_settlement_on_one_partition() {
    let h = Arc::new(Harness::new());
    let k = key(Variant::SimpleRecovery, "win", Mode::Simulation);
    for i in 0..20 {
        h.racing.publish_loss(&format!("C{i}"));
    }

    let mut tasks = Vec::new();
    for i in 0..20 {
        let h = h.clone();
        let k = k.clone();
        tasks.push(tokio::spawn(async move {
            h.desk.run_race(&k, &format!("C{i}")).await.unwrap();
            h.settle(&k).await;
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }
    let ledger = h.store.snapshot(&k).unwrap();
    assert!(ledger.unresolved_count() <= 1);
    ledger.check_integrity().unwrap();
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_simulation_and_live_are_isolated() {
    let h = Harness::new();
    let live = key(Variant::SimpleRecovery, "win", Mode::Live);
    let sim = key(Variant::SimpleRecovery, "win", Mode::Simulation);

    let report = h.desk.run_race(&live, "M1").await.unwrap();
    assert!(report.receipt.is_some());
    h.racing.publish_loss("M1");
    h.settle(&live).await;
    assert_eq!(h.place(&live, "M2").await, dec!(100));

    // The simulation ledger starts fresh and never submits.
    let report = h.desk.run_race(&sim, "M2").await.unwrap();
    assert!(report.receipt.is_none());
    assert!(report.outcome.is_placed());

    let submitted = h.racing.submitted();
    assert_eq!(submitted.len(), 2);
    assert!(submitted.iter().all(|(race, _)| race == "M1" || race == "M2"));

    assert_ne!(
        h.store.path_for(&live).unwrap(),
        h.store.path_for(&sim).unwrap()
    );
    assert_eq!(h.store.snapshot(&live).unwrap().history.len(), 2);
    assert_eq!(h.store.snapshot(&sim).unwrap().history.len(), 1);
    assert_eq!(h.store.keys(Mode::Simulation).unwrap(), vec![sim]);
}

#[tokio::test]
async fn test_poller_settles_every_partition() {
    let h = Harness::new();
    let a = key(Variant::SimpleRecovery, "win", Mode::Simulation);
    let b = key(Variant::TargetProfit, "trio", Mode::Simulation);
    let c = key(Variant::DeferredDoubling, "quinella", Mode::Simulation);

    h.place(&a, "S1").await;
    h.place(&b, "S1").await;
    h.racing.publish("S1", "5", 400);

    let poller = SettlementPoller::new(
        h.settler.clone(),
        vec![a.clone(), b.clone(), c],
        Duration::from_millis(5),
    );
    let tally = poller.sweep().await;
    assert_eq!(tally.won, 2);
    assert_eq!(tally.idle, 1);
    assert_eq!(tally.errors, 0);
    assert!(h.store.snapshot(&a).unwrap().is_empty());
    assert!(h.store.snapshot(&b).unwrap().is_empty());

    assert!(matches!(
        h.desk.run_race(&a, "S2").await.unwrap().outcome,
        PlacementOutcome::Placed { .. }
    ));
}
