//! In-memory collaborators for integration testing.
//!
//! `FakeRacing` plays all three external roles: it publishes results,
//! serves candidate lists and records submitted orders. Everything is
//! controllable from test code and nothing leaves the process.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

use stakebook::platforms::{CandidateSource, OrderPlacer, OrderReceipt, ResultProvider};
use stakebook::types::{Candidate, RaceResult, StakedSelection};

/// Deterministic stand-in for the racing API.
pub struct FakeRacing {
    results: Mutex<HashMap<String, RaceResult>>,
    ranked: Mutex<Vec<Candidate>>,
    orders: Mutex<Vec<(String, Vec<StakedSelection>)>>,
    /// While set, every result fetch fails.
    outage: Mutex<bool>,
}

impl FakeRacing {
    /// Ranked candidates "5" (4.0), "1" (2.0), "8" (8.0) for every race.
    pub fn new() -> Self {
        Self::with_candidates(vec![
            Candidate::new("5", dec!(4.0)),
            Candidate::new("1", dec!(2.0)),
            Candidate::new("8", dec!(8.0)),
        ])
    }

    pub fn with_candidates(ranked: Vec<Candidate>) -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            ranked: Mutex::new(ranked),
            orders: Mutex::new(Vec::new()),
            outage: Mutex::new(false),
        }
    }

    /// Publish a final result in which only `winner` paid `scaled` / 100.
    pub fn publish(&self, race_id: &str, winner: &str, scaled: u32) {
        let result = RaceResult::new(race_id).with_payout(winner, Some(scaled));
        self.results.lock().unwrap().insert(race_id.into(), result);
    }

    /// Publish a final result in which none of the usual selections paid.
    pub fn publish_loss(&self, race_id: &str) {
        self.publish(race_id, "99", 1500);
    }

    pub fn set_outage(&self, down: bool) {
        *self.outage.lock().unwrap() = down;
    }

    pub fn submitted(&self) -> Vec<(String, Vec<StakedSelection>)> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultProvider for FakeRacing {
    async fn fetch_result(&self, race_id: &str) -> Result<Option<RaceResult>> {
        if *self.outage.lock().unwrap() {
            return Err(anyhow!("Racing API unavailable"));
        }
        Ok(self.results.lock().unwrap().get(race_id).cloned())
    }
}

#[async_trait]
impl CandidateSource for FakeRacing {
    async fn candidates(&self, _race_id: &str) -> Result<Vec<Candidate>> {
        Ok(self.ranked.lock().unwrap().clone())
    }
}

#[async_trait]
impl OrderPlacer for FakeRacing {
    async fn submit(&self, race_id: &str, stakes: &[StakedSelection]) -> Result<OrderReceipt> {
        let mut orders = self.orders.lock().unwrap();
        orders.push((race_id.to_string(), stakes.to_vec()));
        Ok(OrderReceipt {
            order_id: format!("fake-{}", orders.len()),
            race_id: race_id.to_string(),
            accepted: true,
            submitted_at: Utc::now(),
        })
    }
}

/// Unique scratch directory, removed on drop.
pub struct TempRoot(pub PathBuf);

impl TempRoot {
    pub fn new() -> Self {
        Self(std::env::temp_dir().join(format!("stakebook_it_{}", Uuid::new_v4())))
    }
}

impl Drop for TempRoot {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.0).ok();
    }
}

/// Sum of stakes in a placement.
pub fn total(stakes: &[StakedSelection]) -> Decimal {
    stakes.iter().map(|s| s.stake).sum()
}
