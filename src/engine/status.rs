//! Trading-status lookups: halts and short-sale restrictions.
//!
//! API: `{base_url}/v2/reference/halt/{symbol}` and
//! `{base_url}/v2/reference/ssr/{symbol}`. Auth: `apiKey` query param.
//!
//! Lookups fail open. A symbol whose status cannot be fetched is treated as
//! tradeable, so a flaky status feed never empties the scan.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::types::Candidate;

#[async_trait]
pub trait TradingStatus: Send + Sync {
    async fn is_halted(&self, symbol: &str) -> Result<bool>;

    /// Short-sale restriction (SSR / Rule 201) is in effect.
    async fn is_short_restricted(&self, symbol: &str) -> Result<bool>;
}

/// Whether either lookup reports a restriction. Failed lookups count as clear.
pub async fn is_restricted(status: &dyn TradingStatus, symbol: &str) -> bool {
    let (halted, ssr) = tokio::join!(status.is_halted(symbol), status.is_short_restricted(symbol));
    let clear_on_error = |result: Result<bool>, what: &str| match result {
        Ok(flag) => flag,
        Err(e) => {
            debug!(symbol, lookup = what, error = %e, "Status lookup failed, assuming clear");
            false
        }
    };
    let halted = clear_on_error(halted, "halt");
    let ssr = clear_on_error(ssr, "ssr");
    if halted || ssr {
        info!(symbol, halted, ssr, "Excluding restricted candidate");
    }
    halted || ssr
}

/// Walk `ranked` best-first, dropping restricted symbols, until `cap`
/// candidates are kept. Symbols past the cap are never looked up.
pub async fn exclude_restricted(status: &dyn TradingStatus, ranked: Vec<Candidate>, cap: usize) -> Vec<Candidate> {
    let mut kept = Vec::with_capacity(cap.min(ranked.len()));
    for candidate in ranked {
        if kept.len() >= cap {
            break;
        }
        if !is_restricted(status, &candidate.symbol).await {
            kept.push(candidate);
        }
    }
    kept
}

// ---------------------------------------------------------------------------
// HTTP lookups
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HaltResponse {
    #[serde(default)]
    halted: bool,
}

#[derive(Debug, Deserialize)]
struct SsrResponse {
    #[serde(default)]
    ssr: bool,
}

pub struct HttpTradingStatus {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl HttpTradingStatus {
    pub fn new(base_url: &str, api_key: SecretString, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("AlphaStream/0.1.0")
            .build()
            .context("Failed to build status HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get_text(&self, kind: &str, symbol: &str) -> Result<String> {
        let url = format!(
            "{}/v2/reference/{kind}/{}?apiKey={}",
            self.base_url,
            urlencoding::encode(symbol),
            urlencoding::encode(self.api_key.expose_secret())
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("{kind} lookup for {symbol} failed"))?;
        if !resp.status().is_success() {
            anyhow::bail!("{kind} lookup for {symbol}: HTTP {}", resp.status());
        }
        resp.text().await.context("Failed to read status response")
    }
}

fn parse_halt(body: &str) -> Result<bool> {
    let resp: HaltResponse = serde_json::from_str(body).context("Failed to parse halt status")?;
    Ok(resp.halted)
}

fn parse_ssr(body: &str) -> Result<bool> {
    let resp: SsrResponse = serde_json::from_str(body).context("Failed to parse SSR status")?;
    Ok(resp.ssr)
}

#[async_trait]
impl TradingStatus for HttpTradingStatus {
    async fn is_halted(&self, symbol: &str) -> Result<bool> {
        parse_halt(&self.get_text("halt", symbol).await?)
    }

    async fn is_short_restricted(&self, symbol: &str) -> Result<bool> {
        parse_ssr(&self.get_text("ssr", symbol).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
