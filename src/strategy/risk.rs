//! Risk-based position sizing.
//!
//! quantity = floor(equity × base_risk × kelly_mult × regime_mult / (atr × atr_multiple))
//! floored at one share. The Kelly-like multiplier steps on model score,
//! the regime multiplier rewards trending tape.

use tracing::debug;

use crate::types::RegimeLabel;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Fraction of equity risked per trade.
    pub base_risk_pct: f64,
    /// Stop distance in ATRs.
    pub atr_multiple: f64,
    /// Risk per share as a fraction of price when ATR is unusable.
    pub fallback_risk_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_risk_pct: 0.018,
            atr_multiple: 1.3,
            fallback_risk_pct: 0.04,
        }
    }
}

// ---------------------------------------------------------------------------
// Sizer
// ---------------------------------------------------------------------------

pub struct RiskSizer {
    config: RiskConfig,
}

impl Default for RiskSizer {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

impl RiskSizer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn kelly_multiplier(score: f64) -> f64 {
        if score > 0.78 {
            1.4
        } else if score > 0.75 {
            1.1
        } else {
            0.9
        }
    }

    pub fn regime_multiplier(regime: RegimeLabel) -> f64 {
        match regime {
            RegimeLabel::BullTrend => 1.3,
            RegimeLabel::WeakBull => 1.0,
            _ => 0.7,
        }
    }

    /// Share quantity, never below 1.
    ///
    /// A zero or non-finite ATR falls back to `fallback_risk_pct` of price so
    /// the result stays bounded. Buying power is not considered here.
    pub fn size(&self, equity: f64, price: f64, atr: f64, score: f64, regime: RegimeLabel) -> u64 {
        let equity = if equity.is_finite() { equity.max(0.0) } else { 0.0 };
        let mut risk_per_share = atr * self.config.atr_multiple;
        if !risk_per_share.is_finite() || risk_per_share <= 0.0 {
            risk_per_share = price * self.config.fallback_risk_pct;
        }
        if !risk_per_share.is_finite() || risk_per_share <= 0.0 {
            return 1;
        }

        let kelly = Self::kelly_multiplier(score);
        let regime_mult = Self::regime_multiplier(regime);
        let raw = equity * self.config.base_risk_pct * kelly * regime_mult / risk_per_share;

        let qty = raw.floor().max(1.0);

        debug!(
            equity = format!("${:.2}", equity),
            price,
            atr,
            score = format!("{:.3}", score),
            regime = %regime,
            kelly,
            regime_mult,
            qty,
            "Position sized"
        );

        if qty.is_finite() { qty as u64 } else { 1 }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
