//! Accountant: mark-to-market, daily P&L and the loss circuit breaker.
//!
//! Reconciles each cycle: marks open positions to the latest prices,
//! recomputes the day's P&L (realized + unrealized) and trips the breaker
//! once it falls below the daily loss limit. The breaker never re-arms
//! itself; only [`AccountState::start_new_session`] clears it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::math::format_signed_currency;
use crate::types::AccountState;

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// What a cycle did, as counted by the decision loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleActivity {
    pub candidates: usize,
    pub entries_opened: usize,
    pub positions_closed: usize,
    /// Half-position sales; the positions stay open.
    pub partial_exits: usize,
    /// The cycle was skipped because the breaker was already tripped.
    pub skipped: bool,
}

/// Summary of a complete scan → evaluate → commit → mark cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub candidates: usize,
    pub entries_opened: usize,
    pub positions_closed: usize,
    pub partial_exits: usize,
    pub open_positions: usize,
    pub unrealized_pnl: f64,
    pub daily_pnl: f64,
    pub daily_pnl_display: String,
    pub halted: bool,
    /// The breaker tripped during this cycle.
    pub breaker_tripped: bool,
    pub skipped: bool,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Accountant {
    daily_loss_limit: f64,
}

impl Accountant {
    /// `daily_loss_limit` is a positive dollar amount (2000 trips below -$2,000).
    pub fn new(daily_loss_limit: f64) -> Self {
        Self {
            daily_loss_limit: daily_loss_limit.abs(),
        }
    }

    pub fn daily_loss_limit(&self) -> f64 {
        self.daily_loss_limit
    }

    /// Update `current_price` for every held symbol with a quote.
    /// Returns how many positions were marked.
    pub fn mark_to_market(account: &mut AccountState, prices: &HashMap<String, f64>) -> usize {
        let mut marked = 0;
        for (symbol, position) in account.positions.iter_mut() {
            if let Some(&price) = prices.get(symbol) {
                if price.is_finite() && price > 0.0 {
                    position.mark(price);
                    marked += 1;
                }
            }
        }
        marked
    }

    /// daily P&L = realized today + unrealized on open positions.
    pub fn refresh_daily_pnl(account: &mut AccountState) -> f64 {
        account.daily_pnl = account.realized_pnl + account.unrealized_pnl();
        account.daily_pnl
    }

    /// Trip the breaker if the day's P&L is below the limit.
    /// Returns true only on the cycle that trips it.
    pub fn enforce_loss_limit(&self, account: &mut AccountState) -> bool {
        if account.daily_max_loss_hit || account.daily_pnl >= -self.daily_loss_limit {
            return false;
        }
        account.daily_max_loss_hit = true;
        warn!(
            daily_pnl = %format_signed_currency(account.daily_pnl),
            limit = format!("${:.2}", self.daily_loss_limit),
            "Daily loss limit breached, trading halted for the session"
        );
        true
    }

    /// Refresh P&L, enforce the breaker and summarise the cycle.
    pub fn reconcile(&self, account: &mut AccountState, cycle_number: u64, activity: CycleActivity) -> CycleReport {
        let daily_pnl = Self::refresh_daily_pnl(account);
        let breaker_tripped = self.enforce_loss_limit(account);

        let report = CycleReport {
            cycle_number,
            candidates: activity.candidates,
            entries_opened: activity.entries_opened,
            positions_closed: activity.positions_closed,
            partial_exits: activity.partial_exits,
            open_positions: account.open_count(),
            unrealized_pnl: account.unrealized_pnl(),
            daily_pnl,
            daily_pnl_display: format_signed_currency(daily_pnl),
            halted: account.daily_max_loss_hit,
            breaker_tripped,
            skipped: activity.skipped,
            timestamp: Utc::now(),
        };

        info!(
            cycle = report.cycle_number,
            equity = format!("${:.2}", account.equity),
            daily_pnl = %report.daily_pnl_display,
            candidates = report.candidates,
            entries = report.entries_opened,
            exits = report.positions_closed,
            partials = report.partial_exits,
            open = report.open_positions,
            halted = report.halted,
            "Cycle reconciled"
        );

        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
