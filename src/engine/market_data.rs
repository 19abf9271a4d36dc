//! Bar-history and reference-data provider.
//!
//! API: `{base_url}/v2/aggs/ticker/{symbol}/range/1/minute/{from}/{to}` for
//! minute bars and `{base_url}/v3/reference/tickers/{symbol}` for static
//! ticker metadata. Auth: `apiKey` query param.
//!
//! Errors are typed so the caller can tell a thin listing
//! ([`DataError::InsufficientHistory`]) from a broken feed.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::types::{Bar, DataError, Sector, TickerMeta};

/// Calendar days of history requested so a full session survives weekends.
const HISTORY_DAYS: i64 = 5;
const SOURCE: &str = "market-data";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Up to `lookback` most recent one-minute bars, oldest first.
    async fn bars(&self, symbol: &str, lookback: usize) -> Result<Vec<Bar>, DataError>;

    async fn ticker_meta(&self, symbol: &str) -> Result<TickerMeta, DataError>;
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AggsResponse {
    #[serde(default)]
    results: Vec<AggBar>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    /// Bar start, Unix milliseconds.
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

#[derive(Debug, Deserialize)]
struct TickerDetailsResponse {
    results: TickerDetails,
}

#[derive(Debug, Deserialize)]
struct TickerDetails {
    ticker: String,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    share_class_shares_outstanding: Option<f64>,
    #[serde(default)]
    weighted_shares_outstanding: Option<f64>,
    #[serde(default)]
    sic_description: Option<String>,
}

/// Map a SIC industry description onto the coarse sector buckets.
pub fn sector_from_sic(description: &str) -> Sector {
    let d = description.to_lowercase();
    const TECH: &[&str] = &["software", "computer", "semiconductor", "electronic", "data processing"];
    const HEALTH: &[&str] = &["pharmaceutical", "biological", "medical", "surgical", "health", "diagnostic"];
    const CYCLICAL: &[&str] = &["retail", "apparel", "restaurant", "motor vehicle", "hotel", "eating"];

    if TECH.iter().any(|k| d.contains(k)) {
        Sector::Technology
    } else if HEALTH.iter().any(|k| d.contains(k)) {
        Sector::Healthcare
    } else if CYCLICAL.iter().any(|k| d.contains(k)) {
        Sector::ConsumerCyclical
    } else {
        Sector::Other
    }
}

fn parse_bars(symbol: &str, body: &str, lookback: usize) -> Result<Vec<Bar>, DataError> {
    let resp: AggsResponse = serde_json::from_str(body).map_err(|e| DataError::Decode {
        source_name: SOURCE.into(),
        message: format!("{symbol} bars: {e}"),
    })?;

    let mut bars: Vec<Bar> = resp
        .results
        .into_iter()
        .filter_map(|b| {
            Some(Bar {
                timestamp: DateTime::from_timestamp_millis(b.t)?,
                open: b.o,
                high: b.h,
                low: b.l,
                close: b.c,
                volume: b.v,
            })
        })
        .collect();
    bars.sort_by_key(|b| b.timestamp);

    if bars.is_empty() {
        return Err(DataError::InsufficientHistory {
            symbol: symbol.to_string(),
            needed: 1,
            got: 0,
        });
    }
    let skip = bars.len().saturating_sub(lookback);
    Ok(bars.split_off(skip))
}

fn parse_ticker_meta(body: &str) -> Result<TickerMeta, DataError> {
    let resp: TickerDetailsResponse = serde_json::from_str(body).map_err(|e| DataError::Decode {
        source_name: SOURCE.into(),
        message: format!("ticker details: {e}"),
    })?;
    let d = resp.results;
    Ok(TickerMeta {
        symbol: d.ticker,
        float_shares: d
            .share_class_shares_outstanding
            .or(d.weighted_shares_outstanding)
            .unwrap_or(0.0),
        // not carried by the reference endpoint
        short_interest: 0.0,
        market_cap: d.market_cap.unwrap_or(0.0),
        sector: d.sic_description.as_deref().map(sector_from_sic).unwrap_or(Sector::Other),
        reference_price: 0.0,
    })
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

pub struct HttpMarketData {
    http: Client,
    base_url: String,
    api_key: SecretString,
    timeout_secs: u64,
}

impl HttpMarketData {
    pub fn new(base_url: &str, api_key: SecretString, timeout_secs: u64) -> anyhow::Result<Self> {
        use anyhow::Context;
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("AlphaStream/0.1.0")
            .build()
            .context("Failed to build market-data HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs,
        })
    }

    async fn get_text(&self, url: &str, what: &str) -> Result<String, DataError> {
        let resp = self.http.get(url).send().await.map_err(|e| self.transport(what, e))?;
        if !resp.status().is_success() {
            return Err(DataError::Transport {
                source_name: SOURCE.into(),
                message: format!("{what}: HTTP {}", resp.status()),
            });
        }
        resp.text().await.map_err(|e| self.transport(what, e))
    }

    fn transport(&self, what: &str, e: reqwest::Error) -> DataError {
        if e.is_timeout() {
            DataError::Timeout(self.timeout_secs)
        } else {
            DataError::Transport {
                source_name: SOURCE.into(),
                message: format!("{what}: {e}"),
            }
        }
    }
}

#[async_trait]
impl MarketData for HttpMarketData {
    async fn bars(&self, symbol: &str, lookback: usize) -> Result<Vec<Bar>, DataError> {
        let to = Utc::now().date_naive();
        let from = to - Duration::days(HISTORY_DAYS);
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/minute/{from}/{to}?adjusted=true&sort=asc&limit=50000&apiKey={}",
            self.base_url,
            urlencoding::encode(symbol),
            urlencoding::encode(self.api_key.expose_secret())
        );
        let body = self.get_text(&url, &format!("{symbol} bars")).await?;
        let bars = parse_bars(symbol, &body, lookback)?;
        debug!(symbol, bars = bars.len(), "Bars fetched");
        Ok(bars)
    }

    async fn ticker_meta(&self, symbol: &str) -> Result<TickerMeta, DataError> {
        let url = format!(
            "{}/v3/reference/tickers/{}?apiKey={}",
            self.base_url,
            urlencoding::encode(symbol),
            urlencoding::encode(self.api_key.expose_secret())
        );
        let body = self.get_text(&url, &format!("{symbol} details")).await?;
        parse_ticker_meta(&body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
