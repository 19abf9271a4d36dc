//! Candidate scanner.
//!
//! Pulls the market-wide gainers snapshot and filters it down to a short,
//! best-first list of gappers the decision loop can evaluate. The HTTP
//! source is one implementation of [`CandidateScanner`]; tests and
//! alternative feeds plug in behind the same trait.
//!
//! API: `{base_url}/v2/snapshot/locale/us/markets/stocks/gainers`
//! Auth: `apiKey` query param.
//!
//! Optional stages after the quote filter: market-cap and float bounds
//! (looked up through [`MarketData::ticker_meta`]) and halt/SSR exclusion
//! (through [`TradingStatus`]).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::market_data::MarketData;
use crate::engine::status::{exclude_restricted, TradingStatus};
use crate::types::Candidate;

/// Hard ceiling on candidates handed to one cycle.
pub const MAX_CANDIDATES: usize = 8;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Source of raw candidates.
///
/// Errors are allowed here; the decision loop degrades them (and timeouts)
/// to an empty scan.
#[async_trait]
pub trait CandidateScanner: Send + Sync {
    fn name(&self) -> &str;

    /// Ranked candidates, best first, excluding `held`.
    async fn scan(&self, held: &HashSet<String>) -> Result<Vec<Candidate>>;
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// One row of a market snapshot before filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRow {
    pub symbol: String,
    pub price: f64,
    pub percent_change: f64,
    pub volume: f64,
    /// Prior session close; 0 when the snapshot omits it.
    pub previous_close: f64,
    /// Filled in from reference data only when a bound needs it.
    pub market_cap: Option<f64>,
    pub float_shares: Option<f64>,
}

impl ScanRow {
    /// Day volume over `previous_close × 100_000`.
    pub fn relative_volume(&self) -> Option<f64> {
        (self.previous_close > 0.0).then(|| self.volume / (self.previous_close * 100_000.0))
    }
}

#[derive(Debug, Clone)]
pub struct ScanFilter {
    pub min_change_pct: f64,
    pub min_volume: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub max_candidates: usize,
    pub min_relative_volume: Option<f64>,
    pub max_market_cap: Option<f64>,
    pub max_float_shares: Option<f64>,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            min_change_pct: 15.0,
            min_volume: 750_000.0,
            min_price: 2.5,
            max_price: 20.0,
            max_candidates: MAX_CANDIDATES,
            min_relative_volume: None,
            max_market_cap: None,
            max_float_shares: None,
        }
    }
}

/// An unknown value fails a configured bound.
fn at_most(max: Option<f64>, value: Option<f64>) -> bool {
    match max {
        None => true,
        Some(max) => value.is_some_and(|v| v <= max),
    }
}

impl ScanFilter {
    /// Checks that need only the snapshot row.
    pub fn accepts_quote(&self, row: &ScanRow) -> bool {
        row.price.is_finite()
            && row.price > 0.0
            && row.price >= self.min_price
            && row.price <= self.max_price
            && row.percent_change >= self.min_change_pct
            && row.volume >= self.min_volume
            && self
                .min_relative_volume
                .map_or(true, |min| row.relative_volume().is_some_and(|r| r >= min))
    }

    pub fn accepts_fundamentals(&self, row: &ScanRow) -> bool {
        at_most(self.max_market_cap, row.market_cap) && at_most(self.max_float_shares, row.float_shares)
    }

    /// Whether any bound needs reference data.
    pub fn needs_fundamentals(&self) -> bool {
        self.max_market_cap.is_some() || self.max_float_shares.is_some()
    }

    pub fn cap(&self) -> usize {
        self.max_candidates.min(MAX_CANDIDATES)
    }

    /// Filter, dedupe and rank by percent change (descending), uncapped.
    pub fn rank(&self, rows: Vec<ScanRow>, held: &HashSet<String>) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut kept: Vec<ScanRow> = rows
            .into_iter()
            .filter(|r| !held.contains(&r.symbol))
            .filter(|r| self.accepts_quote(r) && self.accepts_fundamentals(r))
            .filter(|r| seen.insert(r.symbol.clone()))
            .collect();

        kept.sort_by(|a, b| b.percent_change.total_cmp(&a.percent_change));

        kept.into_iter()
            .map(|r| Candidate {
                symbol: r.symbol,
                price: r.price,
                percent_change: r.percent_change,
            })
            .collect()
    }

    /// [`rank`](Self::rank), capped.
    pub fn apply(&self, rows: Vec<ScanRow>, held: &HashSet<String>) -> Vec<Candidate> {
        let mut ranked = self.rank(rows, held);
        ranked.truncate(self.cap());
        ranked
    }
}

/// Fill market cap and float from reference data. A failed lookup, or a
/// zero the vendor uses for "unknown", leaves the field empty.
pub async fn attach_fundamentals(reference: &dyn MarketData, rows: Vec<ScanRow>) -> Vec<ScanRow> {
    let lookups = join_all(rows.iter().map(|r| reference.ticker_meta(&r.symbol))).await;
    rows.into_iter()
        .zip(lookups)
        .map(|(mut row, meta)| {
            match meta {
                Ok(meta) => {
                    row.market_cap = Some(meta.market_cap).filter(|v| *v > 0.0);
                    row.float_shares = Some(meta.float_shares).filter(|v| *v > 0.0);
                }
                Err(e) => debug!(symbol = %row.symbol, error = %e, "Reference data unavailable"),
            }
            row
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Snapshot API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    tickers: Vec<SnapshotTicker>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotTicker {
    ticker: String,
    #[serde(default)]
    todays_change_perc: f64,
    #[serde(default)]
    day: Option<SnapshotBar>,
    #[serde(default)]
    last_trade: Option<SnapshotTrade>,
    #[serde(default)]
    prev_day: Option<SnapshotBar>,
}

#[derive(Debug, Deserialize)]
struct SnapshotBar {
    #[serde(default)]
    c: f64,
    #[serde(default)]
    v: f64,
}

#[derive(Debug, Deserialize)]
struct SnapshotTrade {
    #[serde(default)]
    p: f64,
}

impl From<SnapshotTicker> for ScanRow {
    fn from(t: SnapshotTicker) -> Self {
        let day_close = t.day.as_ref().map(|d| d.c).unwrap_or(0.0);
        let price = t
            .last_trade
            .map(|lt| lt.p)
            .filter(|p| *p > 0.0)
            .unwrap_or(day_close);
        ScanRow {
            symbol: t.ticker,
            price,
            percent_change: t.todays_change_perc,
            volume: t.day.map(|d| d.v).unwrap_or(0.0),
            previous_close: t.prev_day.map(|d| d.c).unwrap_or(0.0),
            market_cap: None,
            float_shares: None,
        }
    }
}

fn parse_snapshot(body: &str) -> Result<Vec<ScanRow>> {
    let resp: SnapshotResponse =
        serde_json::from_str(body).context("Failed to parse gainers snapshot")?;
    Ok(resp.tickers.into_iter().map(ScanRow::from).collect())
}

// ---------------------------------------------------------------------------
// HTTP scanner
// ---------------------------------------------------------------------------

pub struct HttpGainersScanner {
    http: Client,
    base_url: String,
    api_key: SecretString,
    filter: ScanFilter,
    reference: Option<Arc<dyn MarketData>>,
    status: Option<Arc<dyn TradingStatus>>,
}

impl HttpGainersScanner {
    pub fn new(base_url: &str, api_key: SecretString, filter: ScanFilter, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("AlphaStream/0.1.0")
            .build()
            .context("Failed to build scanner HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            filter,
            reference: None,
            status: None,
        })
    }

    /// Reference data for the market-cap and float bounds. Without it those
    /// bounds reject every row.
    pub fn with_reference(mut self, reference: Arc<dyn MarketData>) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Drop halted and short-restricted symbols.
    pub fn with_trading_status(mut self, status: Arc<dyn TradingStatus>) -> Self {
        self.status = Some(status);
        self
    }
}

#[async_trait]
impl CandidateScanner for HttpGainersScanner {
    fn name(&self) -> &str {
        "gainers-snapshot"
    }

    async fn scan(&self, held: &HashSet<String>) -> Result<Vec<Candidate>> {
        let url = format!(
            "{}/v2/snapshot/locale/us/markets/stocks/gainers?apiKey={}",
            self.base_url,
            urlencoding::encode(self.api_key.expose_secret())
        );

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Gainers snapshot request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Gainers snapshot error: {status}");
        }

        let body = resp.text().await.context("Failed to read gainers snapshot")?;
        let rows = parse_snapshot(&body)?;
        let raw = rows.len();
        let mut rows: Vec<ScanRow> = rows
            .into_iter()
            .filter(|r| !held.contains(&r.symbol) && self.filter.accepts_quote(r))
            .collect();
        if self.filter.needs_fundamentals() {
            match &self.reference {
                Some(reference) => rows = attach_fundamentals(reference.as_ref(), rows).await,
                None => warn!("Fundamental bounds set without reference data"),
            }
        }

        let candidates = match &self.status {
            Some(status) => {
                let ranked = self.filter.rank(rows, held);
                exclude_restricted(status.as_ref(), ranked, self.filter.cap()).await
            }
            None => self.filter.apply(rows, held),
        };

        if candidates.is_empty() {
            debug!(raw, "No gainers passed the scan filter");
        } else {
            info!(
                raw,
                kept = candidates.len(),
                top = %candidates[0],
                "Gainers scanned"
            );
        }
        Ok(candidates)
    }
}

/// Static candidate list, handy for dry runs without a data key.
pub struct StaticScanner {
    candidates: Vec<Candidate>,
}

impl StaticScanner {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl CandidateScanner for StaticScanner {
    fn name(&self) -> &str {
        "static"
    }

    async fn scan(&self, held: &HashSet<String>) -> Result<Vec<Candidate>> {
        if self.candidates.is_empty() {
            warn!("Static scanner has no candidates configured");
        }
        Ok(self
            .candidates
            .iter()
            .filter(|c| !held.contains(&c.symbol))
            .take(MAX_CANDIDATES)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
