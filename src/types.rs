//! Shared types for the STAKEBOOK ledger.
//!
//! These types form the data model used across all modules: ledger keys,
//! wager records, the ledger itself, race results from the provider and the
//! domain error enum. Strategy, storage and engine modules depend on them
//! without depending on each other.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Whether a ledger tracks real money or a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Live,
    Simulation,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Simulation => "simulation",
        }
    }

    pub fn is_live(&self) -> bool {
        *self == Mode::Live
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" | "real" => Ok(Mode::Live),
            "simulation" | "sim" | "paper" => Ok(Mode::Simulation),
            _ => Err(anyhow::anyhow!("Unknown mode: {s}")),
        }
    }
}

/// The four stake progression rules. Each variant owns its own family of
/// ledgers on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    SimpleRecovery,
    TargetProfit,
    PartitionedRecovery,
    DeferredDoubling,
}

impl Variant {
    /// All known variants (useful for iteration).
    pub const ALL: &'static [Variant] = &[
        Variant::SimpleRecovery,
        Variant::TargetProfit,
        Variant::PartitionedRecovery,
        Variant::DeferredDoubling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::SimpleRecovery => "simple_recovery",
            Variant::TargetProfit => "target_profit",
            Variant::PartitionedRecovery => "partitioned_recovery",
            Variant::DeferredDoubling => "deferred_doubling",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Variant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "simple_recovery" | "simple" => Ok(Variant::SimpleRecovery),
            "target_profit" | "target" => Ok(Variant::TargetProfit),
            "partitioned_recovery" | "partitioned" => Ok(Variant::PartitionedRecovery),
            "deferred_doubling" | "doubling" => Ok(Variant::DeferredDoubling),
            _ => Err(anyhow::anyhow!("Unknown progression variant: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Identifies one independent ledger scope: a ticket type, optionally split
/// further by location code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub ticket: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl PartitionKey {
    pub fn new(ticket: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
            location: None,
        }
    }

    pub fn with_location(ticket: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
            location: Some(location.into()),
        }
    }

    /// File stem used by the store: `ticket` or `ticket@location`.
    pub fn file_stem(&self) -> String {
        match &self.location {
            Some(loc) => format!("{}@{}", self.ticket, loc),
            None => self.ticket.clone(),
        }
    }

    /// Key parts become file names, so only `[A-Za-z0-9_-]` is accepted.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let valid = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        };
        if !valid(&self.ticket) {
            return Err(LedgerError::InvalidKey(self.ticket.clone()));
        }
        if let Some(loc) = &self.location {
            if !valid(loc) {
                return Err(LedgerError::InvalidKey(loc.clone()));
            }
        }
        Ok(())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

/// Full address of one persisted ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub variant: Variant,
    pub partition: PartitionKey,
    pub mode: Mode,
}

impl LedgerKey {
    pub fn new(variant: Variant, partition: PartitionKey, mode: Mode) -> Self {
        Self {
            variant,
            partition,
            mode,
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.mode, self.variant, self.partition)
    }
}

// ---------------------------------------------------------------------------
// Candidates and stakes
// ---------------------------------------------------------------------------

/// A ranked selection supplied by the candidate provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub selection: String,
    /// Pre-event decimal odds.
    pub odds: Decimal,
    #[serde(default)]
    pub probability: Option<Decimal>,
    #[serde(default)]
    pub expected_value: Option<Decimal>,
}

impl Candidate {
    pub fn new(selection: impl Into<String>, odds: Decimal) -> Self {
        Self {
            selection: selection.into(),
            odds,
            probability: None,
            expected_value: None,
        }
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.selection, self.odds)
    }
}

/// One selection inside a wager record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakedSelection {
    pub selection: String,
    pub stake: Decimal,
    #[serde(default)]
    pub odds: Option<Decimal>,
    /// Payout per unit stake once settled. `None` = no payout (or not yet
    /// settled, see `WagerRecord::resolved`).
    #[serde(default)]
    pub realized_multiplier: Option<Decimal>,
}

impl StakedSelection {
    pub fn new(selection: impl Into<String>, stake: Decimal) -> Self {
        Self {
            selection: selection.into(),
            stake,
            odds: None,
            realized_multiplier: None,
        }
    }

    pub fn with_odds(mut self, odds: Decimal) -> Self {
        self.odds = Some(odds);
        self
    }
}

// ---------------------------------------------------------------------------
// Wager record
// ---------------------------------------------------------------------------

fn default_unit() -> u32 {
    1
}

/// One staked decision for one race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerRecord {
    pub race_id: String,
    pub selections: Vec<StakedSelection>,
    /// Best payout multiplier across the selections; `None` = no payout.
    #[serde(default)]
    pub realized_multiplier: Option<Decimal>,
    pub resolved: bool,
    /// Loss-unit multiple the stake was derived from.
    #[serde(default = "default_unit")]
    pub unit: u32,
    pub placed_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Resolved by the cutoff fallback rather than a provider result.
    #[serde(default)]
    pub forced: bool,
}

impl WagerRecord {
    pub fn new(
        race_id: impl Into<String>,
        selections: Vec<StakedSelection>,
        unit: u32,
        placed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            race_id: race_id.into(),
            selections,
            realized_multiplier: None,
            resolved: false,
            unit,
            placed_at,
            resolved_at: None,
            forced: false,
        }
    }

    /// Total amount staked across all selections.
    pub fn total_stake(&self) -> Decimal {
        self.selections.iter().map(|s| s.stake).sum()
    }

    /// Mark the record settled. `payout_for` returns each selection's
    /// realized multiplier (`None` = lost).
    pub fn resolve<F>(&mut self, mut payout_for: F, forced: bool, at: DateTime<Utc>)
    where
        F: FnMut(&str) -> Option<Decimal>,
    {
        for sel in &mut self.selections {
            sel.realized_multiplier = if forced {
                None
            } else {
                payout_for(&sel.selection)
            };
        }
        self.realized_multiplier = self
            .selections
            .iter()
            .filter_map(|s| s.realized_multiplier)
            .max();
        self.resolved = true;
        self.forced = forced;
        self.resolved_at = Some(at);
    }
}

impl fmt::Display for WagerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let picks: Vec<String> = self
            .selections
            .iter()
            .map(|s| format!("{}:{}", s.selection, s.stake))
            .collect();
        let outcome = match (self.resolved, self.realized_multiplier) {
            (false, _) => "pending".to_string(),
            (true, Some(m)) => format!("x{m}"),
            (true, None) if self.forced => "forced loss".to_string(),
            (true, None) => "lost".to_string(),
        };
        write!(f, "{} [{}] {}", self.race_id, picks.join(", "), outcome)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Persistent state for one (variant, partition, mode).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub history: Vec<WagerRecord>,
    /// Outstanding loss units, oldest first (deferred doubling only).
    #[serde(default)]
    pub loss_units: VecDeque<u32>,
    /// Deferred doubling has switched to escalated units.
    #[serde(default)]
    pub aggressive: bool,
    #[serde(default)]
    pub consecutive_losses: u32,
}

impl Ledger {
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Back to EMPTY: history and every accumulator cleared.
    pub fn reset(&mut self) {
        *self = Ledger::default();
    }

    /// The outstanding (unresolved) record, if any.
    pub fn pending(&self) -> Option<&WagerRecord> {
        self.history.iter().find(|r| !r.resolved)
    }

    pub fn unresolved_count(&self) -> usize {
        self.history.iter().filter(|r| !r.resolved).count()
    }

    /// Sum of every stake in history, resolved or not.
    pub fn cumulative_stake(&self) -> Decimal {
        self.history.iter().map(WagerRecord::total_stake).sum()
    }

    /// Index of the most recent record for `race_id`.
    pub fn position_of(&self, race_id: &str) -> Option<usize> {
        self.history.iter().rposition(|r| r.race_id == race_id)
    }

    /// Index of the oldest unresolved record.
    pub fn oldest_pending(&self) -> Option<usize> {
        self.history.iter().position(|r| !r.resolved)
    }

    /// Verify the structural invariants. Violations are data-integrity
    /// failures and are never repaired.
    pub fn check_integrity(&self) -> Result<(), LedgerError> {
        let unresolved = self.unresolved_count();
        if unresolved > 1 {
            return Err(LedgerError::Integrity(format!(
                "{unresolved} unresolved records (at most one allowed)"
            )));
        }
        for record in &self.history {
            if record.selections.is_empty() {
                return Err(LedgerError::Integrity(format!(
                    "record for race {} has no selections",
                    record.race_id
                )));
            }
            if !record.resolved
                && (record.realized_multiplier.is_some()
                    || record
                        .selections
                        .iter()
                        .any(|s| s.realized_multiplier.is_some()))
            {
                return Err(LedgerError::Integrity(format!(
                    "unresolved record for race {} carries a payout",
                    record.race_id
                )));
            }
            let negative = |m: &Option<Decimal>| m.is_some_and(|m| m.is_sign_negative());
            if negative(&record.realized_multiplier)
                || record
                    .selections
                    .iter()
                    .any(|s| negative(&s.realized_multiplier))
            {
                return Err(LedgerError::Integrity(format!(
                    "record for race {} has a negative payout",
                    record.race_id
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_empty() { "EMPTY" } else { "ACTIVE" };
        write!(
            f,
            "{} | records={} | at_risk={} | pending={}",
            state,
            self.history.len(),
            self.cumulative_stake(),
            self.pending().map(|r| r.race_id.as_str()).unwrap_or("-"),
        )?;
        if !self.loss_units.is_empty() || self.aggressive {
            write!(
                f,
                " | loss_units={:?} | aggressive={}",
                self.loss_units, self.aggressive
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Race result
// ---------------------------------------------------------------------------

/// Authoritative result of a finished race.
///
/// Payouts use the provider's wire encoding: an integer scaled by 100
/// (`260` = 2.60x). A selection that is absent, or present with a null
/// payout, paid nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    pub race_id: String,
    pub payouts: HashMap<String, Option<u32>>,
}

impl RaceResult {
    pub fn new(race_id: impl Into<String>) -> Self {
        Self {
            race_id: race_id.into(),
            payouts: HashMap::new(),
        }
    }

    /// Builder helper: record a selection's scaled payout.
    pub fn with_payout(mut self, selection: impl Into<String>, scaled: Option<u32>) -> Self {
        self.payouts.insert(selection.into(), scaled);
        self
    }

    /// Realized multiplier for a selection, decoded from the scaled integer.
    pub fn multiplier(&self, selection: &str) -> Option<Decimal> {
        self.payouts
            .get(selection)
            .copied()
            .flatten()
            .map(|scaled| Decimal::new(i64::from(scaled), 2))
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the ledger core.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed ledger at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Ledger integrity violation: {0}")]
    Integrity(String),

    #[error("Invalid partition key component: {0:?}")]
    InvalidKey(String),

    #[error("No candidates supplied for race {0}")]
    NoCandidates(String),

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
