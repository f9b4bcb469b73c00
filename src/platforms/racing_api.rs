//! Racing data provider REST client.
//!
//! Endpoints (all JSON):
//! - `GET  {base}/races/{race_id}/result`      settled payouts (404 = not final)
//! - `GET  {base}/races/{race_id}/candidates`  ranked selections with odds
//! - `POST {base}/orders`                      submit stakes
//!
//! Auth: optional `X-Api-Key` header. Payouts are integers scaled by 100
//! (`260` = 2.60x); a null payout means the selection paid nothing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CandidateSource, OrderPlacer, OrderReceipt, ResultProvider};
use crate::types::{Candidate, RaceResult, StakedSelection};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const API_KEY_HEADER: &str = "X-Api-Key";

/// Result status the provider uses once payouts are official.
const FINAL_STATUS: &str = "final";

const DEFAULT_TIMEOUT_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ResultResponse {
    race_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payouts: Vec<PayoutEntry>,
}

#[derive(Debug, Deserialize)]
struct PayoutEntry {
    selection: String,
    /// Scaled by 100; null = no payout.
    #[serde(default)]
    payout: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CandidatesResponse {
    #[serde(default)]
    candidates: Vec<CandidateEntry>,
}

#[derive(Debug, Deserialize)]
struct CandidateEntry {
    selection: String,
    odds: Decimal,
    #[serde(default)]
    probability: Option<Decimal>,
    #[serde(default)]
    expected_value: Option<Decimal>,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    race_id: &'a str,
    client_ref: String,
    bets: Vec<OrderBet<'a>>,
}

#[derive(Debug, Serialize)]
struct OrderBet<'a> {
    selection: &'a str,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order_id: String,
    #[serde(default)]
    accepted: bool,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// REST client for the racing data provider.
pub struct RacingApiClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl RacingApiClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: Option<u64>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)))
            .user_agent("STAKEBOOK/0.1.0 (race-ledger)")
            .build()
            .context("Failed to build HTTP client for racing API")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(SecretString::new),
        })
    }

    fn race_url(&self, race_id: &str, tail: &str) -> String {
        format!(
            "{}/races/{}/{}",
            self.base_url,
            urlencoding::encode(race_id),
            tail
        )
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header(API_KEY_HEADER, key.expose_secret().as_str()),
            None => req,
        }
    }

    /// Wire result → domain result. Non-final statuses are "not yet".
    fn to_race_result(resp: ResultResponse) -> Option<RaceResult> {
        if let Some(status) = &resp.status {
            if !status.eq_ignore_ascii_case(FINAL_STATUS) {
                return None;
            }
        }
        let mut result = RaceResult::new(resp.race_id);
        for entry in resp.payouts {
            result.payouts.insert(entry.selection, entry.payout);
        }
        Some(result)
    }

    fn to_candidates(resp: CandidatesResponse) -> Vec<Candidate> {
        resp.candidates
            .into_iter()
            .map(|c| Candidate {
                selection: c.selection,
                odds: c.odds,
                probability: c.probability,
                expected_value: c.expected_value,
            })
            .collect()
    }
}

#[async_trait]
impl ResultProvider for RacingApiClient {
    async fn fetch_result(&self, race_id: &str) -> Result<Option<RaceResult>> {
        let url = self.race_url(race_id, "result");
        debug!(url = %url, "Fetching race result");

        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Racing API result request failed")?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Racing API error {status}: {body}");
        }

        let body: ResultResponse = resp
            .json()
            .await
            .context("Failed to parse race result response")?;
        Ok(Self::to_race_result(body))
    }
}

#[async_trait]
impl CandidateSource for RacingApiClient {
    async fn candidates(&self, race_id: &str) -> Result<Vec<Candidate>> {
        let url = self.race_url(race_id, "candidates");
        debug!(url = %url, "Fetching race candidates");

        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .context("Racing API candidates request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Racing API error {status}: {body}");
        }

        let body: CandidatesResponse = resp
            .json()
            .await
            .context("Failed to parse candidates response")?;
        Ok(Self::to_candidates(body))
    }
}

#[async_trait]
impl OrderPlacer for RacingApiClient {
    async fn submit(&self, race_id: &str, stakes: &[StakedSelection]) -> Result<OrderReceipt> {
        if self.api_key.is_none() {
            anyhow::bail!("Racing API key required to submit orders");
        }

        let request = OrderRequest {
            race_id,
            client_ref: uuid::Uuid::new_v4().to_string(),
            bets: stakes
                .iter()
                .map(|s| OrderBet {
                    selection: &s.selection,
                    amount: s.stake,
                })
                .collect(),
        };

        let url = format!("{}/orders", self.base_url);
        let resp = self
            .authed(self.http.post(&url))
            .json(&request)
            .send()
            .await
            .context("Racing API order request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Racing API order error {status}: {body}");
        }

        let body: OrderResponse = resp
            .json()
            .await
            .context("Failed to parse order response")?;

        if body.accepted {
            info!(race_id, order_id = %body.order_id, "Order accepted");
        } else {
            warn!(race_id, order_id = %body.order_id, "Order rejected by provider");
        }

        Ok(OrderReceipt {
            order_id: body.order_id,
            race_id: race_id.to_string(),
            accepted: body.accepted,
            submitted_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
