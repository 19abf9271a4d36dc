//! Mock market-data collaborator and deterministic bar fixtures.
//!
//! All series sit on one session day (2025-11-17) so `session_bars`
//! keeps them whole.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use mockall::mock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use alphastream::engine::market_data::MarketData;
use alphastream::types::{Bar, Candidate, DataError, Sector, TickerMeta};

mock! {
    pub Market {}

    #[async_trait]
    impl MarketData for Market {
        async fn bars(&self, symbol: &str, lookback: usize) -> Result<Vec<Bar>, DataError>;
        async fn ticker_meta(&self, symbol: &str) -> Result<TickerMeta, DataError>;
    }
}

fn session_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 17, 13, 30, 0).unwrap()
}

/// Minute bars with a fixed half-range around each close.
pub fn bars(closes: &[f64], half_range: f64, volume: f64) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            timestamp: session_open() + Duration::minutes(i as i64),
            open: c,
            high: c + half_range,
            low: c - half_range,
            close: c,
            volume,
        })
        .collect()
}

/// Constant per-bar growth, e.g. an index in a clean uptrend.
pub fn geometric(start: f64, step: f64, n: usize) -> Vec<Bar> {
    let closes: Vec<f64> = (0..n).map(|i| start * step.powi(i as i32)).collect();
    bars(&closes, 0.5, 1_000.0)
}

/// A gapper grinding from 9 to 10 into its high, above VWAP.
pub fn gapper_session() -> Vec<Bar> {
    let closes: Vec<f64> = (0..30).map(|i| 9.0 + i as f64 * (1.0 / 29.0)).collect();
    bars(&closes, 0.05, 50_000.0)
}

/// Index basket in a steady 0.4%-per-bar uptrend.
pub fn bull_basket() -> HashMap<String, Vec<Bar>> {
    [("SPY", 400.0), ("QQQ", 350.0), ("IWM", 200.0)]
        .iter()
        .map(|&(s, start)| (s.to_string(), geometric(start, 1.004, 70)))
        .collect()
}

pub fn candidate(symbol: &str, price: f64, change: f64) -> Candidate {
    Candidate {
        symbol: symbol.into(),
        price,
        percent_change: change,
    }
}

pub fn meta(symbol: &str) -> TickerMeta {
    TickerMeta {
        symbol: symbol.to_string(),
        float_shares: 8_000_000.0,
        short_interest: 500_000.0,
        market_cap: 200_000_000.0,
        sector: Sector::Healthcare,
        reference_price: 0.0,
    }
}

pub fn missing(symbol: &str) -> DataError {
    DataError::InsufficientHistory {
        symbol: symbol.to_string(),
        needed: 1,
        got: 0,
    }
}

/// Serves fixed series by symbol; unknown symbols have no history.
pub fn market_with(series: HashMap<String, Vec<Bar>>) -> MockMarket {
    let mut market = MockMarket::new();
    market.expect_bars().returning(move |symbol, lookback| match series.get(symbol) {
        Some(bars) => Ok(bars[bars.len().saturating_sub(lookback)..].to_vec()),
        None => Err(missing(symbol)),
    });
    market.expect_ticker_meta().returning(|symbol| Ok(meta(symbol)));
    market
}

/// Quotes from a shared, test-controlled price table. Reference data is
/// never requested.
pub fn quoting(prices: Arc<Mutex<HashMap<String, f64>>>) -> MockMarket {
    let mut market = MockMarket::new();
    market.expect_ticker_meta().never();
    market.expect_bars().returning(move |symbol, _| {
        let price = prices.lock().unwrap().get(symbol).copied();
        match price {
            Some(p) => Ok(bars(&[p], 0.0, 10_000.0)),
            None => Err(missing(symbol)),
        }
    });
    market
}

/// Every request fails at the transport layer.
pub fn outage() -> MockMarket {
    let mut market = MockMarket::new();
    market.expect_bars().returning(|_, _| {
        Err(DataError::Transport {
            source_name: "mock".into(),
            message: "connection reset".into(),
        })
    });
    market.expect_ticker_meta().returning(|_| Err(DataError::Timeout(10)));
    market
}
