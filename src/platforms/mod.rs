//! External collaborators.
//!
//! The ledger core consumes three narrow interfaces:
//! - `ResultProvider`: authoritative race results (read-only)
//! - `CandidateSource`: ranked selections with pre-event odds (read-only)
//! - `OrderPlacer`: submits placed stakes (live mode only)
//!
//! `racing_api` implements all three against the racing data provider's
//! REST API.

pub mod racing_api;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Candidate, RaceResult, StakedSelection};

/// Source of settled race results.
///
/// `Ok(None)` means the race is not final yet. `Err` is a provider failure;
/// callers treat it the same as `Ok(None)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultProvider: Send + Sync {
    async fn fetch_result(&self, race_id: &str) -> Result<Option<RaceResult>>;
}

/// Ranked candidate selections for a race, best first.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(&self, race_id: &str) -> Result<Vec<Candidate>>;
}

/// Receipt for a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub race_id: String,
    pub accepted: bool,
    pub submitted_at: DateTime<Utc>,
}

impl fmt::Display for OrderReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order {} for {} ({})",
            self.order_id,
            self.race_id,
            if self.accepted { "accepted" } else { "rejected" }
        )
    }
}

/// Order submission. Never called for simulation ledgers.
#[async_trait]
pub trait OrderPlacer: Send + Sync {
    async fn submit(&self, race_id: &str, stakes: &[StakedSelection]) -> Result<OrderReceipt>;
}
