//! Exit rules for open positions.
//!
//! Evaluated against every position after it is marked to market.
//! Checked in order: stop-loss, take-profit, partial profit, trailing stop.
//! A partial profit sells half the position once; every other rule closes
//! it outright.

use std::fmt;

use crate::types::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    PartialProfit,
    TrailingStop,
}

impl ExitReason {
    /// Tag written to the trade log.
    pub fn tag(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::PartialProfit => "PARTIAL_PROFIT",
            ExitReason::TrailingStop => "TRAILING_STOP",
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, ExitReason::PartialProfit)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Percent thresholds, each optional. `None` disables the rule.
#[derive(Debug, Clone, Default)]
pub struct ExitPolicy {
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    /// Gain at which half the position is sold, once.
    pub partial_profit_pct: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
}

impl ExitPolicy {
    /// Bracket of -4% / +10%, half off at +5%, with a 6% trail.
    pub fn bracket() -> Self {
        Self {
            stop_loss_pct: Some(0.04),
            take_profit_pct: Some(0.10),
            partial_profit_pct: Some(0.05),
            trailing_stop_pct: Some(0.06),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn evaluate(&self, position: &Position) -> Option<ExitReason> {
        let price = position.current_price;
        if let Some(stop) = self.stop_loss_pct {
            if price <= position.entry_price * (1.0 - stop) {
                return Some(ExitReason::StopLoss);
            }
        }
        if let Some(take) = self.take_profit_pct {
            if price >= position.entry_price * (1.0 + take) {
                return Some(ExitReason::TakeProfit);
            }
        }
        if let Some(partial) = self.partial_profit_pct {
            // a single share cannot be halved
            if !position.partial_done
                && position.quantity >= 2
                && price >= position.entry_price * (1.0 + partial)
            {
                return Some(ExitReason::PartialProfit);
            }
        }
        if let Some(trail) = self.trailing_stop_pct {
            // only armed once the position has traded above entry
            if position.high_water > position.entry_price
                && price <= position.high_water * (1.0 - trail)
            {
                return Some(ExitReason::TrailingStop);
            }
        }
        None
    }
}
