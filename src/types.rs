//! Shared types for the AlphaStream engine.
//!
//! These types form the data model used across all modules.
//! They are deliberately free of I/O so that features, strategy,
//! predictor and engine modules can depend on them without cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// (high + low + close) / 3, the price VWAP is weighted on.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Sector classification used by the one-hot sector features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sector {
    Technology,
    Healthcare,
    ConsumerCyclical,
    Other,
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sector::Technology => write!(f, "Technology"),
            Sector::Healthcare => write!(f, "Healthcare"),
            Sector::ConsumerCyclical => write!(f, "Consumer Cyclical"),
            Sector::Other => write!(f, "Other"),
        }
    }
}

/// Parse a sector name (case-insensitive). Unknown names map to `Other`
/// because reference data vendors use many spellings.
impl std::str::FromStr for Sector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "technology" | "tech" | "information technology" => Sector::Technology,
            "healthcare" | "health care" => Sector::Healthcare,
            "consumer cyclical" | "consumer discretionary" => Sector::ConsumerCyclical,
            _ => Sector::Other,
        })
    }
}

/// Static reference metadata for a ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerMeta {
    pub symbol: String,
    /// Float (tradeable shares outstanding).
    pub float_shares: f64,
    pub short_interest: f64,
    pub market_cap: f64,
    pub sector: Sector,
    /// Reference price the "parabolic" flag is measured against.
    pub reference_price: f64,
}

/// A scan hit: transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub price: f64,
    /// Percent change on the session (9.0 = +9%).
    pub percent_change: f64,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ ${:.2} ({:+.1}%)", self.symbol, self.price, self.percent_change)
    }
}

impl Candidate {
    /// Previous close implied by price and percent change.
    pub fn previous_close(&self) -> f64 {
        self.price / (1.0 + self.percent_change / 100.0)
    }
}

// ---------------------------------------------------------------------------
// Regime
// ---------------------------------------------------------------------------

/// Discrete broad-market regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeLabel {
    BullTrend,
    BearTrend,
    HighVolChop,
    WeakBull,
    Chop,
}

impl RegimeLabel {
    pub const ALL: &'static [RegimeLabel] = &[
        RegimeLabel::BullTrend,
        RegimeLabel::BearTrend,
        RegimeLabel::HighVolChop,
        RegimeLabel::WeakBull,
        RegimeLabel::Chop,
    ];
}

impl fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegimeLabel::BullTrend => write!(f, "BULL_TREND"),
            RegimeLabel::BearTrend => write!(f, "BEAR_TREND"),
            RegimeLabel::HighVolChop => write!(f, "HIGH_VOL_CHOP"),
            RegimeLabel::WeakBull => write!(f, "WEAK_BULL"),
            RegimeLabel::Chop => write!(f, "CHOP"),
        }
    }
}

// ---------------------------------------------------------------------------
// Positions & trade log
// ---------------------------------------------------------------------------

/// An open long position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub entry_price: f64,
    pub current_price: f64,
    pub quantity: u64,
    /// Highest mark seen since entry (trailing stop reference).
    pub high_water: f64,
    /// Half the position has already been sold into strength.
    #[serde(default)]
    pub partial_done: bool,
    pub opened_at: DateTime<Utc>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pnl = self.unrealized_pnl();
        write!(
            f,
            "{} x{} entry=${:.2} mark=${:.2} ({}{:.2})",
            self.symbol,
            self.quantity,
            self.entry_price,
            self.current_price,
            if pnl >= 0.0 { "+" } else { "" },
            pnl,
        )
    }
}

impl Position {
    pub fn new(symbol: &str, entry_price: f64, quantity: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            entry_price,
            current_price: entry_price,
            quantity,
            high_water: entry_price,
            partial_done: false,
            opened_at: Utc::now(),
        }
    }

    /// (current - entry) × quantity.
    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.entry_price) * self.quantity as f64
    }

    /// Update the mark; non-finite or non-positive quotes are ignored.
    pub fn mark(&mut self, price: f64) {
        if price.is_finite() && price > 0.0 {
            self.current_price = price;
            if price > self.high_water {
                self.high_water = price;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeKind {
    Entry,
    Exit,
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeKind::Entry => write!(f, "ENTRY"),
            TradeKind::Exit => write!(f, "EXIT"),
        }
    }
}

/// Append-only trade journal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogEntry {
    #[serde(rename = "type")]
    pub kind: TradeKind,
    pub symbol: String,
    pub price: f64,
    pub quantity: u64,
    pub reason: String,
    pub pnl: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for TradeLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} x{} @ ${:.2} ({})",
            self.timestamp.format("%H:%M:%S"),
            self.kind,
            self.symbol,
            self.quantity,
            self.price,
            self.reason,
        )?;
        if let Some(pnl) = self.pnl {
            write!(f, " pnl={pnl:+.2}")?;
        }
        Ok(())
    }
}

/// A completed round trip, used to train the predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: u64,
    pub pnl: f64,
    pub closed_at: DateTime<Utc>,
}

impl TradeOutcome {
    /// Return on entry notional as a fraction.
    pub fn pnl_pct(&self) -> f64 {
        let notional = self.entry_price * self.quantity as f64;
        if notional > 0.0 {
            self.pnl / notional
        } else {
            0.0
        }
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

// ---------------------------------------------------------------------------
// Account state
// ---------------------------------------------------------------------------

/// Process-wide account book owned by the decision loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub equity: f64,
    /// Realized today + unrealized on open positions.
    pub daily_pnl: f64,
    pub realized_pnl: f64,
    /// Keyed by symbol, so a symbol can only be held once.
    pub positions: BTreeMap<String, Position>,
    pub trade_log: Vec<TradeLogEntry>,
    pub daily_max_loss_hit: bool,
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "equity=${:.2} | day={} | open={} | trades={} | {}",
            self.equity,
            crate::math::format_signed_currency(self.daily_pnl),
            self.positions.len(),
            self.trade_log.len(),
            if self.daily_max_loss_hit { "HALTED" } else { "LIVE" },
        )
    }
}

impl AccountState {
    pub fn new(equity: f64) -> Self {
        Self {
            equity,
            daily_pnl: 0.0,
            realized_pnl: 0.0,
            positions: BTreeMap::new(),
            trade_log: Vec::new(),
            daily_max_loss_hit: false,
        }
    }

    pub fn holds(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn held_symbols(&self) -> HashSet<String> {
        self.positions.keys().cloned().collect()
    }

    /// Σ (current - entry) × quantity over open positions.
    pub fn unrealized_pnl(&self) -> f64 {
        self.positions.values().map(Position::unrealized_pnl).sum()
    }

    /// Open a position and journal the ENTRY.
    ///
    /// Duplicate symbols and a full book are rejected before anything
    /// is mutated.
    pub fn open_position(
        &mut self,
        position: Position,
        max_open: usize,
        reason: &str,
    ) -> Result<(), EngineError> {
        if self.holds(&position.symbol) {
            return Err(EngineError::DuplicatePosition(position.symbol));
        }
        if self.open_count() >= max_open {
            return Err(EngineError::PositionCapReached { cap: max_open });
        }
        if position.quantity == 0 {
            return Err(EngineError::InvalidQuantity(position.symbol));
        }

        self.trade_log.push(TradeLogEntry {
            kind: TradeKind::Entry,
            symbol: position.symbol.clone(),
            price: position.entry_price,
            quantity: position.quantity,
            reason: reason.to_string(),
            pnl: None,
            timestamp: Utc::now(),
        });
        self.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Close a held position at `price`, realize its P&L and journal the EXIT.
    /// Returns `None` if the symbol is not held.
    pub fn close_position(&mut self, symbol: &str, price: f64, reason: &str) -> Option<TradeOutcome> {
        let mut position = self.positions.remove(symbol)?;
        position.mark(price);
        let exit_price = position.current_price;
        let pnl = position.unrealized_pnl();

        self.realized_pnl += pnl;
        self.equity += pnl;
        self.trade_log.push(TradeLogEntry {
            kind: TradeKind::Exit,
            symbol: symbol.to_string(),
            price: exit_price,
            quantity: position.quantity,
            reason: reason.to_string(),
            pnl: Some(pnl),
            timestamp: Utc::now(),
        });
        self.daily_pnl = self.realized_pnl + self.unrealized_pnl();

        Some(TradeOutcome {
            symbol: symbol.to_string(),
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            pnl,
            closed_at: Utc::now(),
        })
    }

    /// Sell `quantity` shares of a held position at `price` and journal an
    /// EXIT for that lot. The remainder stays open and is flagged
    /// `partial_done`.
    ///
    /// Returns `None` if the symbol is not held or `quantity` is not
    /// strictly between zero and the held quantity.
    pub fn reduce_position(
        &mut self,
        symbol: &str,
        quantity: u64,
        price: f64,
        reason: &str,
    ) -> Option<TradeOutcome> {
        let position = self.positions.get_mut(symbol)?;
        if quantity == 0 || quantity >= position.quantity {
            return None;
        }
        position.mark(price);
        let exit_price = position.current_price;
        let entry_price = position.entry_price;
        let pnl = (exit_price - entry_price) * quantity as f64;
        position.quantity -= quantity;
        position.partial_done = true;

        self.realized_pnl += pnl;
        self.equity += pnl;
        self.trade_log.push(TradeLogEntry {
            kind: TradeKind::Exit,
            symbol: symbol.to_string(),
            price: exit_price,
            quantity,
            reason: reason.to_string(),
            pnl: Some(pnl),
            timestamp: Utc::now(),
        });
        self.daily_pnl = self.realized_pnl + self.unrealized_pnl();

        Some(TradeOutcome {
            symbol: symbol.to_string(),
            entry_price,
            exit_price,
            quantity,
            pnl,
            closed_at: Utc::now(),
        })
    }

    /// Day-boundary hook: clears the day's P&L and re-arms the breaker.
    /// Open positions and the journal are kept.
    pub fn start_new_session(&mut self) {
        self.realized_pnl = 0.0;
        self.daily_pnl = self.unrealized_pnl();
        self.daily_max_loss_hit = false;
    }

    pub fn entries(&self) -> impl Iterator<Item = &TradeLogEntry> {
        self.trade_log.iter().filter(|t| t.kind == TradeKind::Entry)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Engine-level errors. Invariant violations are reported here and
/// rejected before any state is mutated.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Already holding {0}")]
    DuplicatePosition(String),

    #[error("Open-position cap of {cap} reached")]
    PositionCapReached { cap: usize },

    #[error("Quantity for {0} must be at least one share")]
    InvalidQuantity(String),

    #[error("Feature schema mismatch: extractor v{extractor} ({extractor_len} keys), predictor v{predictor} ({predictor_len} keys)")]
    SchemaMismatch {
        extractor: u32,
        extractor_len: usize,
        predictor: u32,
        predictor_len: usize,
    },

    #[error("Invalid feature schema: {0}")]
    InvalidSchema(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failures of the bar-history / reference-data collaborator.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Insufficient history for {symbol}: need {needed} bars, got {got}")]
    InsufficientHistory {
        symbol: String,
        needed: usize,
        got: usize,
    },

    #[error("Transport error ({source_name}): {message}")]
    Transport { source_name: String, message: String },

    #[error("Decode error ({source_name}): {message}")]
    Decode { source_name: String, message: String },

    #[error("Timed out after {0}s")]
    Timeout(u64),
}

impl DataError {
    /// Insufficient history is expected for fresh listings and is
    /// reported separately from hard I/O failures.
    pub fn is_insufficient_history(&self) -> bool {
        matches!(self, DataError::InsufficientHistory { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
