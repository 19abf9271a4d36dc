//! Market regime classification.
//!
//! Averages trend, ADX and annualised volatility over a basket of broad
//! index series and maps the averages to a [`RegimeLabel`].

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::features::indicators;
use crate::math::std_dev;
use crate::types::{Bar, RegimeLabel};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RegimeConfig {
    /// Index symbols averaged into the regime.
    pub basket: Vec<String>,
    /// Bars per trading day, for annualising volatility (390 for 1-minute bars).
    pub bars_per_day: f64,
    /// Series shorter than this are skipped.
    pub min_bars: usize,
    pub trend_lookback: usize,
    pub adx_period: usize,
    pub vol_window: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            basket: vec!["SPY".into(), "QQQ".into(), "IWM".into()],
            bars_per_day: 390.0,
            min_bars: 60,
            trend_lookback: 30,
            adx_period: 14,
            vol_window: 20,
        }
    }
}

/// Basket-averaged regime inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeMetrics {
    pub trend: f64,
    pub adx: f64,
    pub annualized_vol: f64,
    /// How many basket symbols contributed.
    pub symbols_used: usize,
}

impl RegimeMetrics {
    /// First matching rule wins.
    pub fn label(&self) -> RegimeLabel {
        if self.trend > 0.10 && self.adx > 28.0 {
            RegimeLabel::BullTrend
        } else if self.trend < -0.06 && self.adx > 22.0 {
            RegimeLabel::BearTrend
        } else if self.annualized_vol > 0.32 {
            RegimeLabel::HighVolChop
        } else if self.trend > 0.03 && self.adx > 20.0 {
            RegimeLabel::WeakBull
        } else {
            RegimeLabel::Chop
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Average the regime inputs over basket symbols with enough history.
    /// Returns `None` when no basket symbol qualifies.
    pub fn metrics(&self, series: &HashMap<String, Vec<Bar>>) -> Option<RegimeMetrics> {
        let cfg = &self.config;
        let mut totals = (0.0, 0.0, 0.0);
        let mut used = 0usize;

        for symbol in &cfg.basket {
            let Some(bars) = series.get(symbol) else {
                debug!(symbol = %symbol, "No series for basket symbol");
                continue;
            };
            let needed = cfg.min_bars.max(cfg.trend_lookback + 1);
            if bars.len() < needed {
                debug!(symbol = %symbol, bars = bars.len(), needed, "Skipping short series");
                continue;
            }
            let Some(adx) = indicators::adx(bars, cfg.adx_period) else {
                continue;
            };

            let last = bars[bars.len() - 1].close;
            let past = bars[bars.len() - 1 - cfg.trend_lookback].close;
            if past <= 0.0 {
                continue;
            }
            let trend = last / past - 1.0;

            let rets = indicators::returns(bars);
            let window = &rets[rets.len().saturating_sub(cfg.vol_window)..];
            let vol = std_dev(window) * (252.0 * cfg.bars_per_day).sqrt();

            totals.0 += trend;
            totals.1 += adx;
            totals.2 += vol;
            used += 1;
        }

        if used == 0 {
            return None;
        }
        let n = used as f64;
        Some(RegimeMetrics {
            trend: totals.0 / n,
            adx: totals.1 / n,
            annualized_vol: totals.2 / n,
            symbols_used: used,
        })
    }

    /// Classify the basket; `None` when no symbol has enough history.
    pub fn classify(&self, series: &HashMap<String, Vec<Bar>>) -> Option<RegimeLabel> {
        let metrics = self.metrics(series)?;
        let label = metrics.label();
        debug!(
            trend = format!("{:.4}", metrics.trend),
            adx = format!("{:.1}", metrics.adx),
            vol = format!("{:.3}", metrics.annualized_vol),
            symbols = metrics.symbols_used,
            regime = %label,
            "Regime classified"
        );
        Some(label)
    }

    /// Classify, falling back to the most conservative label.
    pub fn classify_or_chop(&self, series: &HashMap<String, Vec<Bar>>) -> RegimeLabel {
        self.classify(series).unwrap_or_else(|| {
            warn!("No basket symbol has enough history, assuming CHOP");
            RegimeLabel::Chop
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
