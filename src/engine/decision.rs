//! Decision loop.
//!
//! One cycle walks `IDLE → SCANNING → EVALUATING → COMMITTING →
//! MARK_TO_MARKET → IDLE`, or parks in `HALTED` once the daily loss limit
//! is breached. All I/O (scan, bars, reference data, quotes) completes
//! before the book is touched, and every mutation happens synchronously
//! under `&mut self`, so the position cap and the no-duplicate rule hold at
//! every await point.
//!
//! Collaborator failures never escape a cycle: a failed or timed-out scan
//! is zero candidates, a candidate whose data cannot be fetched is skipped,
//! a missing regime basket is CHOP and a missing quote leaves the last mark.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::accountant::{Accountant, CycleActivity, CycleReport};
use crate::engine::market_data::MarketData;
use crate::engine::scanner::{CandidateScanner, MAX_CANDIDATES};
use crate::features::extractor::{ExtractInput, FeatureExtractor};
use crate::features::{indicators, FeatureVector};
use crate::math::format_signed_currency;
use crate::predictor::{OnlinePredictor, PredictorDiagnostics};
use crate::strategy::exits::{ExitPolicy, ExitReason};
use crate::strategy::regime::{RegimeClassifier, RegimeConfig};
use crate::strategy::risk::{RiskConfig, RiskSizer};
use crate::types::{AccountState, Bar, Candidate, EngineError, Position, RegimeLabel, TradeOutcome};

/// Session bars required before a candidate is evaluated.
const MIN_SESSION_BARS: usize = 20;
/// Bars in the near-high-of-day window.
const NEAR_HIGH_BARS: usize = 20;
/// Price must sit within this fraction of the window high.
const NEAR_HIGH_RATIO: f64 = 0.995;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    /// `floor(notional / price)` shares.
    Notional,
    /// Model-scored, ATR-based sizing through [`RiskSizer`].
    Risk,
}

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub max_open_positions: usize,
    pub notional_per_trade: f64,
    pub daily_loss_limit: f64,
    pub sizing: SizingMode,
    pub min_score: f64,
    /// Reason tag written on every ENTRY.
    pub strategy_tag: String,
    pub scan_timeout: Duration,
    pub require_above_vwap: bool,
    pub require_near_high: bool,
    pub benchmark_symbol: String,
    pub bar_lookback: usize,
    pub regime_lookback: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            max_open_positions: 5,
            notional_per_trade: 10_000.0,
            daily_loss_limit: 2_000.0,
            sizing: SizingMode::Notional,
            min_score: 0.5,
            strategy_tag: "GAPPER_MOMENTUM".into(),
            scan_timeout: Duration::from_secs(15),
            require_above_vwap: true,
            require_near_high: true,
            benchmark_symbol: "SPY".into(),
            bar_lookback: 390,
            regime_lookback: 70,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CyclePhase {
    Idle,
    Scanning,
    Evaluating,
    Committing,
    MarkToMarket,
    Halted,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CyclePhase::Idle => "IDLE",
            CyclePhase::Scanning => "SCANNING",
            CyclePhase::Evaluating => "EVALUATING",
            CyclePhase::Committing => "COMMITTING",
            CyclePhase::MarkToMarket => "MARK_TO_MARKET",
            CyclePhase::Halted => "HALTED",
        };
        f.write_str(s)
    }
}

/// An entry decided during evaluation, committed afterwards.
#[derive(Debug, Clone)]
struct EntryPlan {
    candidate: Candidate,
    quantity: u64,
    /// Present in risk mode; becomes the predictor's entry snapshot.
    features: Option<FeatureVector>,
    score: Option<f64>,
}

/// Read-only view published after every cycle.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub status: &'static str,
    pub phase: CyclePhase,
    pub account: AccountState,
    pub daily_pnl_display: String,
    pub regime: Option<RegimeLabel>,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub cycle_count: u64,
    pub model: PredictorDiagnostics,
}

// ---------------------------------------------------------------------------
// Decision loop
// ---------------------------------------------------------------------------

pub struct DecisionLoop {
    config: DecisionConfig,
    account: AccountState,
    predictor: OnlinePredictor,
    extractor: FeatureExtractor,
    regime: RegimeClassifier,
    sizer: RiskSizer,
    exits: ExitPolicy,
    accountant: Accountant,
    scanner: Arc<dyn CandidateScanner>,
    market: Arc<dyn MarketData>,
    phase: CyclePhase,
    cycle_count: u64,
    last_scan_at: Option<DateTime<Utc>>,
    last_regime: Option<RegimeLabel>,
}

impl DecisionLoop {
    /// Fails if the predictor was built for a different feature schema than
    /// the extractor produces.
    pub fn new(
        config: DecisionConfig,
        account: AccountState,
        predictor: OnlinePredictor,
        scanner: Arc<dyn CandidateScanner>,
        market: Arc<dyn MarketData>,
    ) -> Result<Self, EngineError> {
        let extractor = FeatureExtractor::new();
        let (ours, theirs) = (extractor.schema(), predictor.schema());
        if ours != theirs {
            return Err(EngineError::SchemaMismatch {
                extractor: ours.version(),
                extractor_len: ours.len(),
                predictor: theirs.version(),
                predictor_len: theirs.len(),
            });
        }
        if config.max_open_positions == 0 {
            return Err(EngineError::Config("max_open_positions must be at least 1".into()));
        }

        let phase = if account.daily_max_loss_hit {
            CyclePhase::Halted
        } else {
            CyclePhase::Idle
        };
        Ok(Self {
            accountant: Accountant::new(config.daily_loss_limit),
            config,
            account,
            predictor,
            extractor,
            regime: RegimeClassifier::new(RegimeConfig::default()),
            sizer: RiskSizer::default(),
            exits: ExitPolicy::disabled(),
            scanner,
            market,
            phase,
            cycle_count: 0,
            last_scan_at: None,
            last_regime: None,
        })
    }

    pub fn with_exit_policy(mut self, exits: ExitPolicy) -> Self {
        self.exits = exits;
        self
    }

    pub fn with_regime_config(mut self, config: RegimeConfig) -> Self {
        self.regime = RegimeClassifier::new(config);
        self
    }

    pub fn with_risk_config(mut self, config: RiskConfig) -> Self {
        self.sizer = RiskSizer::new(config);
        self
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn predictor(&self) -> &OnlinePredictor {
        &self.predictor
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn is_halted(&self) -> bool {
        self.account.daily_max_loss_hit
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            status: if self.is_halted() { "HALTED" } else { "LIVE" },
            phase: self.phase,
            account: self.account.clone(),
            daily_pnl_display: format_signed_currency(self.account.daily_pnl),
            regime: self.last_regime,
            last_scan_at: self.last_scan_at,
            cycle_count: self.cycle_count,
            model: self.predictor.diagnostics(),
        }
    }

    /// Day-boundary reset: clears the day's P&L and re-arms the breaker.
    pub fn start_new_session(&mut self) {
        self.account.start_new_session();
        self.phase = CyclePhase::Idle;
        info!(equity = format!("${:.2}", self.account.equity), "New trading session");
    }

    // -- Cycle --------------------------------------------------------------

    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle_count += 1;

        if self.account.daily_max_loss_hit {
            self.phase = CyclePhase::Halted;
            debug!(cycle = self.cycle_count, "Halted, skipping cycle");
            let activity = CycleActivity {
                skipped: true,
                ..CycleActivity::default()
            };
            return self.accountant.reconcile(&mut self.account, self.cycle_count, activity);
        }

        self.phase = CyclePhase::Scanning;
        let held = self.account.held_symbols();
        let candidates = self.scan(&held).await;
        self.last_scan_at = Some(Utc::now());

        self.phase = CyclePhase::Evaluating;
        let plans = match self.config.sizing {
            SizingMode::Notional => self.plan_notional(&candidates, &held),
            SizingMode::Risk => self.plan_risk(&candidates, &held).await,
        };

        self.phase = CyclePhase::Committing;
        let entries_opened = self.commit(plans);

        self.phase = CyclePhase::MarkToMarket;
        let (positions_closed, partial_exits) = self.mark_to_market().await;

        let activity = CycleActivity {
            candidates: candidates.len(),
            entries_opened,
            positions_closed,
            partial_exits,
            skipped: false,
        };
        let report = self.accountant.reconcile(&mut self.account, self.cycle_count, activity);
        self.phase = if report.halted { CyclePhase::Halted } else { CyclePhase::Idle };
        report
    }

    /// Scan with a timeout; any failure is zero candidates.
    async fn scan(&self, held: &HashSet<String>) -> Vec<Candidate> {
        let timeout = self.config.scan_timeout;
        let raw = match tokio::time::timeout(timeout, self.scanner.scan(held)).await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                warn!(scanner = self.scanner.name(), error = %e, "Scan failed, continuing with no candidates");
                return Vec::new();
            }
            Err(_) => {
                warn!(
                    scanner = self.scanner.name(),
                    timeout_secs = timeout.as_secs_f64(),
                    "Scan timed out, continuing with no candidates"
                );
                return Vec::new();
            }
        };

        raw.into_iter()
            .filter(|c| !held.contains(&c.symbol))
            .take(MAX_CANDIDATES)
            .collect()
    }

    fn open_slots(&self) -> usize {
        self.config.max_open_positions.saturating_sub(self.account.open_count())
    }

    fn plan_notional(&self, candidates: &[Candidate], held: &HashSet<String>) -> Vec<EntryPlan> {
        let slots = self.open_slots();
        let mut planned = HashSet::new();
        let mut plans = Vec::new();

        for c in candidates {
            if plans.len() >= slots {
                debug!(cap = self.config.max_open_positions, "Position cap reached");
                break;
            }
            if held.contains(&c.symbol) || planned.contains(&c.symbol) {
                continue;
            }
            let qty = if c.price.is_finite() && c.price > 0.0 {
                (self.config.notional_per_trade / c.price).floor()
            } else {
                0.0
            };
            if !(qty >= 1.0 && qty.is_finite()) {
                debug!(candidate = %c, "Notional buys zero shares, skipping");
                continue;
            }
            planned.insert(c.symbol.clone());
            plans.push(EntryPlan {
                candidate: c.clone(),
                quantity: qty as u64,
                features: None,
                score: None,
            });
        }
        plans
    }

    async fn plan_risk(&mut self, candidates: &[Candidate], held: &HashSet<String>) -> Vec<EntryPlan> {
        let slots = self.open_slots();
        if candidates.is_empty() || slots == 0 {
            return Vec::new();
        }

        let regime = self.refresh_regime().await;
        let benchmark_return = self.benchmark_return().await;

        let mut planned = HashSet::new();
        let mut plans = Vec::new();
        for c in candidates {
            if plans.len() >= slots {
                debug!(cap = self.config.max_open_positions, "Position cap reached");
                break;
            }
            if held.contains(&c.symbol) || planned.contains(&c.symbol) {
                continue;
            }
            if let Some(plan) = self.evaluate(c, regime, benchmark_return).await {
                planned.insert(c.symbol.clone());
                plans.push(plan);
            }
        }
        plans
    }

    async fn refresh_regime(&mut self) -> RegimeLabel {
        let basket = self.regime.config().basket.clone();
        let lookback = self.config.regime_lookback;
        let fetched = join_all(basket.iter().map(|s| self.market.bars(s, lookback))).await;

        let mut series = HashMap::new();
        for (symbol, result) in basket.into_iter().zip(fetched) {
            match result {
                Ok(bars) => {
                    series.insert(symbol, bars);
                }
                Err(e) => debug!(symbol = %symbol, error = %e, "Regime series unavailable"),
            }
        }
        let label = self.regime.classify_or_chop(&series);
        self.last_regime = Some(label);
        label
    }

    /// Same-session return of the benchmark; 0 when unavailable.
    async fn benchmark_return(&self) -> f64 {
        let symbol = &self.config.benchmark_symbol;
        match self.market.bars(symbol, self.config.bar_lookback).await {
            Ok(bars) => {
                let session = session_bars(&bars);
                match (session.first(), session.last()) {
                    (Some(first), Some(last)) if first.open > 0.0 => last.close / first.open - 1.0,
                    _ => 0.0,
                }
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Benchmark bars unavailable, assuming flat");
                0.0
            }
        }
    }

    async fn evaluate(&self, c: &Candidate, regime: RegimeLabel, benchmark_return: f64) -> Option<EntryPlan> {
        let (bars, meta) = tokio::join!(
            self.market.bars(&c.symbol, self.config.bar_lookback),
            self.market.ticker_meta(&c.symbol),
        );
        let bars = match bars {
            Ok(bars) => bars,
            Err(e) if e.is_insufficient_history() => {
                debug!(symbol = %c.symbol, error = %e, "Skipping candidate");
                return None;
            }
            Err(e) => {
                warn!(symbol = %c.symbol, error = %e, "Bars unavailable, skipping candidate");
                return None;
            }
        };
        let mut meta = match meta {
            Ok(meta) => meta,
            Err(e) => {
                warn!(symbol = %c.symbol, error = %e, "Ticker details unavailable, skipping candidate");
                return None;
            }
        };

        let session = session_bars(&bars);
        if session.len() < MIN_SESSION_BARS {
            debug!(symbol = %c.symbol, bars = session.len(), "Not enough session bars");
            return None;
        }
        let last = session.last()?;
        let vwap = indicators::vwap(session)?;

        if self.config.require_above_vwap && last.close <= vwap {
            debug!(symbol = %c.symbol, close = last.close, vwap, "Below VWAP");
            return None;
        }
        if self.config.require_near_high {
            let high = session
                .iter()
                .rev()
                .take(NEAR_HIGH_BARS)
                .map(|b| b.high)
                .fold(f64::NEG_INFINITY, f64::max);
            if last.close < high * NEAR_HIGH_RATIO {
                debug!(symbol = %c.symbol, close = last.close, high, "Off the high");
                return None;
            }
        }

        // prefer the prior session's last bar over the scan-implied close
        let previous_close = bars
            .len()
            .checked_sub(session.len() + 1)
            .map(|i| bars[i].close)
            .filter(|p| *p > 0.0)
            .unwrap_or_else(|| c.previous_close());
        if meta.reference_price <= 0.0 {
            meta.reference_price = previous_close;
        }

        let features = self.extractor.extract(&ExtractInput {
            ticker: &meta,
            bars: session,
            last_bar: last,
            vwap,
            benchmark_return,
            previous_close,
        });
        let score = self.predictor.score(&features);
        if score < self.config.min_score {
            debug!(symbol = %c.symbol, score = format!("{:.3}", score), "Score below threshold");
            return None;
        }

        let atr = FeatureExtractor::atr_or_fallback(session, last);
        let quantity = self.sizer.size(self.account.equity, c.price, atr, score, regime);
        Some(EntryPlan {
            candidate: c.clone(),
            quantity,
            features: Some(features),
            score: Some(score),
        })
    }

    /// Apply planned entries. Invariants are re-checked by the book itself.
    fn commit(&mut self, plans: Vec<EntryPlan>) -> usize {
        let mut opened = 0;
        for plan in plans {
            let symbol = plan.candidate.symbol.clone();
            let position = Position::new(&symbol, plan.candidate.price, plan.quantity);
            match self.account.open_position(position, self.config.max_open_positions, &self.config.strategy_tag) {
                Ok(()) => {
                    opened += 1;
                    info!(
                        symbol = %symbol,
                        price = format!("${:.2}", plan.candidate.price),
                        qty = plan.quantity,
                        change = format!("{:+.1}%", plan.candidate.percent_change),
                        score = plan.score.map(|s| format!("{:.3}", s)),
                        reason = %self.config.strategy_tag,
                        "Entry committed"
                    );
                    if let Some(features) = plan.features {
                        self.predictor.record_entry(&symbol, features);
                    }
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "Entry rejected"),
            }
        }
        opened
    }

    /// Mark open positions to the latest bar and apply exit rules.
    /// Returns (positions closed, partial exits taken).
    async fn mark_to_market(&mut self) -> (usize, usize) {
        if self.account.positions.is_empty() {
            return (0, 0);
        }
        let symbols: Vec<String> = self.account.positions.keys().cloned().collect();
        let quotes = join_all(symbols.iter().map(|s| self.market.bars(s, 1))).await;

        let mut prices = HashMap::new();
        for (symbol, quote) in symbols.into_iter().zip(quotes) {
            match quote {
                Ok(bars) => {
                    if let Some(bar) = bars.last() {
                        prices.insert(symbol, bar.close);
                    }
                }
                Err(e) => debug!(symbol = %symbol, error = %e, "No quote, keeping last mark"),
            }
        }
        Accountant::mark_to_market(&mut self.account, &prices);

        let exits: Vec<(String, f64, ExitReason)> = self
            .account
            .positions
            .values()
            .filter_map(|p| self.exits.evaluate(p).map(|r| (p.symbol.clone(), p.current_price, r)))
            .collect();

        let (mut closed, mut partials) = (0, 0);
        for (symbol, price, reason) in exits {
            if reason.is_partial() {
                if self.take_partial(&symbol, price).is_some() {
                    partials += 1;
                }
            } else if self.close_position(&symbol, price, reason.tag()).is_some() {
                closed += 1;
            }
        }
        (closed, partials)
    }

    /// Sell half of a held position and journal the lot as an EXIT.
    ///
    /// The entry snapshot stays pending, so the model learns once, from the
    /// close of the remainder.
    pub fn take_partial(&mut self, symbol: &str, price: f64) -> Option<TradeOutcome> {
        let half = self.account.positions.get(symbol)?.quantity / 2;
        let reason = ExitReason::PartialProfit.tag();
        let lot = self.account.reduce_position(symbol, half, price, reason)?;
        info!(
            symbol,
            price = format!("${:.2}", lot.exit_price),
            qty = lot.quantity,
            pnl = %format_signed_currency(lot.pnl),
            reason,
            "Partial profit taken"
        );
        Some(lot)
    }

    /// Close a held position, journal the EXIT and train on the outcome.
    pub fn close_position(&mut self, symbol: &str, price: f64, reason: &str) -> Option<TradeOutcome> {
        let outcome = self.account.close_position(symbol, price, reason)?;
        info!(
            symbol,
            price = format!("${:.2}", outcome.exit_price),
            qty = outcome.quantity,
            pnl = %format_signed_currency(outcome.pnl),
            reason,
            "Position closed"
        );
        self.on_trade_closed(&outcome);
        self.accountant.enforce_loss_limit(&mut self.account);
        if self.account.daily_max_loss_hit {
            self.phase = CyclePhase::Halted;
        }
        Some(outcome)
    }

    /// Forward a realised trade to the predictor. Returns whether it trained.
    pub fn on_trade_closed(&mut self, outcome: &TradeOutcome) -> bool {
        self.predictor.record_outcome(outcome)
    }
}

/// Bars sharing the last bar's UTC date.
pub fn session_bars(bars: &[Bar]) -> &[Bar] {
    let Some(last) = bars.last() else {
        return bars;
    };
    let day = last.timestamp.date_naive();
    let start = bars
        .iter()
        .rposition(|b| b.timestamp.date_naive() != day)
        .map(|i| i + 1)
        .unwrap_or(0);
    &bars[start..]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSchema;
    use crate::predictor::PredictorConfig;
    use crate::types::{DataError, Sector, TickerMeta, TradeKind};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    // -- Stubs ----------------------------------------------------------------

    enum ScanBehaviour {
        Fixed(Vec<Candidate>),
        Fail,
    }

    struct StubScanner {
        behaviour: Mutex<ScanBehaviour>,
    }

    impl StubScanner {
        fn new(behaviour: ScanBehaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour: Mutex::new(behaviour),
            })
        }

        fn set(&self, behaviour: ScanBehaviour) {
            *self.behaviour.lock().unwrap() = behaviour;
        }
    }

    #[async_trait]
    impl CandidateScanner for StubScanner {
        fn name(&self) -> &str {
            "stub"
        }

        async fn scan(&self, _held: &HashSet<String>) -> anyhow::Result<Vec<Candidate>> {
            let fixed = match &*self.behaviour.lock().unwrap() {
                ScanBehaviour::Fixed(c) => Some(c.clone()),
                ScanBehaviour::Fail => None,
            };
            match fixed {
                Some(c) => Ok(c),
                None => Err(anyhow::anyhow!("upstream 503")),
            }
        }
    }

    /// Never answers within any reasonable timeout.
    struct SlowScanner;

    #[async_trait]
    impl CandidateScanner for SlowScanner {
        fn name(&self) -> &str {
            "slow"
        }

        async fn scan(&self, _held: &HashSet<String>) -> anyhow::Result<Vec<Candidate>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![candidate("LATE", 5.0, 30.0)])
        }
    }

    #[derive(Default)]
    struct StubMarket {
        bars: Mutex<HashMap<String, Vec<Bar>>>,
    }

    impl StubMarket {
        fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
            self.bars.lock().unwrap().insert(symbol.to_string(), bars);
        }

        /// Single-bar series used purely as a quote.
        fn set_price(&self, symbol: &str, price: f64) {
            self.set_bars(symbol, session(&[price]));
        }
    }

    #[async_trait]
    impl MarketData for StubMarket {
        async fn bars(&self, symbol: &str, lookback: usize) -> Result<Vec<Bar>, DataError> {
            match self.bars.lock().unwrap().get(symbol) {
                Some(bars) => Ok(bars[bars.len().saturating_sub(lookback)..].to_vec()),
                None => Err(DataError::InsufficientHistory {
                    symbol: symbol.to_string(),
                    needed: 1,
                    got: 0,
                }),
            }
        }

        async fn ticker_meta(&self, symbol: &str) -> Result<TickerMeta, DataError> {
            Ok(TickerMeta {
                symbol: symbol.to_string(),
                float_shares: 8_000_000.0,
                short_interest: 500_000.0,
                market_cap: 200_000_000.0,
                sector: Sector::Healthcare,
                reference_price: 0.0,
            })
        }
    }

    // -- Fixtures -------------------------------------------------------------

    fn candidate(symbol: &str, price: f64, change: f64) -> Candidate {
        Candidate {
            symbol: symbol.into(),
            price,
            percent_change: change,
        }
    }

    /// Minute bars from 14:30 UTC on one session day.
    fn session(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 11, 17, 14, 30, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: start + chrono::Duration::minutes(i as i64),
                open: c,
                high: c + 0.05,
                low: c - 0.05,
                close: c,
                volume: 50_000.0,
            })
            .collect()
    }

    fn predictor() -> OnlinePredictor {
        OnlinePredictor::new(FeatureSchema::gapper(), PredictorConfig::default())
    }

    fn engine(
        config: DecisionConfig,
        scanner: Arc<dyn CandidateScanner>,
        market: Arc<StubMarket>,
    ) -> DecisionLoop {
        DecisionLoop::new(config, AccountState::new(25_000.0), predictor(), scanner, market).unwrap()
    }

    // -- Tests ----------------------------------------------------------------

    #[tokio::test]
    async fn test_reference_cycle_opens_notional_positions() {
        let scanner = StubScanner::new(ScanBehaviour::Fixed(vec![
            candidate("AAA", 10.0, 9.0),
            candidate("BBB", 20.0, 8.0),
        ]));
        let mut dl = engine(DecisionConfig::default(), scanner, Arc::new(StubMarket::default()));

        let report = dl.run_cycle().await;

        assert_eq!(report.entries_opened, 2);
        let account = dl.account();
        assert_eq!(account.positions["AAA"].quantity, 1000);
        assert_eq!(account.positions["BBB"].quantity, 500);
        let entries: Vec<_> = account.entries().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].symbol, "AAA");
        assert_eq!(entries[1].symbol, "BBB");
        assert_eq!(entries[0].kind, TradeKind::Entry);
        assert_eq!(entries[0].reason, "GAPPER_MOMENTUM");
        assert_eq!(report.daily_pnl_display, "+$0.00");
        assert_eq!(dl.phase(), CyclePhase::Idle);
    }

    #[tokio::test]
    async fn test_cap_and_no_duplicates() {
        let many: Vec<Candidate> = (0..8).map(|i| candidate(&format!("S{i}"), 5.0, 20.0)).collect();
        let scanner = StubScanner::new(ScanBehaviour::Fixed(many.clone()));
        let mut dl = engine(DecisionConfig::default(), scanner.clone(), Arc::new(StubMarket::default()));

        dl.run_cycle().await;
        assert_eq!(dl.account().open_count(), 5);

        // same list again plus an in-list duplicate
        let mut again = many;
        again.insert(0, candidate("NEW", 5.0, 50.0));
        again.insert(1, candidate("NEW", 5.0, 50.0));
        scanner.set(ScanBehaviour::Fixed(again));
        let report = dl.run_cycle().await;

        assert_eq!(report.entries_opened, 0);
        assert_eq!(dl.account().open_count(), 5);
        assert_eq!(dl.account().entries().count(), 5);
    }

    #[tokio::test]
    async fn test_duplicate_candidates_within_one_scan() {
        let scanner = StubScanner::new(ScanBehaviour::Fixed(vec![
            candidate("AAA", 10.0, 9.0),
            candidate("AAA", 10.5, 9.5),
        ]));
        let mut dl = engine(DecisionConfig::default(), scanner, Arc::new(StubMarket::default()));
        dl.run_cycle().await;
        assert_eq!(dl.account().open_count(), 1);
        assert_eq!(dl.account().trade_log.len(), 1);
    }

    #[tokio::test]
    async fn test_expensive_candidate_is_skipped() {
        let scanner = StubScanner::new(ScanBehaviour::Fixed(vec![candidate("PRICY", 20_000.0, 15.0)]));
        let mut dl = engine(DecisionConfig::default(), scanner, Arc::new(StubMarket::default()));
        let report = dl.run_cycle().await;
        assert_eq!(report.candidates, 1);
        assert_eq!(report.entries_opened, 0);
    }

    #[tokio::test]
    async fn test_breaker_is_monotonic_within_session() {
        let scanner = StubScanner::new(ScanBehaviour::Fixed(vec![candidate("AAA", 10.0, 9.0)]));
        let market = Arc::new(StubMarket::default());
        let mut dl = engine(DecisionConfig::default(), scanner.clone(), market.clone());

        market.set_price("AAA", 10.0);
        dl.run_cycle().await;
        assert!(!dl.is_halted());

        // -$3,000 on 1000 shares
        scanner.set(ScanBehaviour::Fixed(vec![]));
        market.set_price("AAA", 7.0);
        let report = dl.run_cycle().await;
        assert!(report.breaker_tripped);
        assert!(dl.is_halted());
        assert_eq!(dl.phase(), CyclePhase::Halted);
        assert_eq!(dl.snapshot().status, "HALTED");

        // recovery does not re-arm, and new scans open nothing
        market.set_price("AAA", 12.0);
        scanner.set(ScanBehaviour::Fixed(vec![candidate("BBB", 20.0, 8.0)]));
        for _ in 0..3 {
            let report = dl.run_cycle().await;
            assert!(report.skipped);
            assert_eq!(report.entries_opened, 0);
        }
        assert!(dl.account().daily_max_loss_hit);
        assert!(!dl.account().holds("BBB"));

        dl.start_new_session();
        let report = dl.run_cycle().await;
        assert!(!report.halted);
        assert!(dl.account().holds("BBB"));
    }

    #[tokio::test]
    async fn test_scan_failure_is_zero_candidates() {
        let scanner = StubScanner::new(ScanBehaviour::Fail);
        let mut dl = engine(DecisionConfig::default(), scanner.clone(), Arc::new(StubMarket::default()));
        let report = dl.run_cycle().await;
        assert_eq!(report.candidates, 0);
        assert!(!report.halted);
        assert!(dl.snapshot().last_scan_at.is_some());

        // recovers on the next cycle
        scanner.set(ScanBehaviour::Fixed(vec![candidate("AAA", 10.0, 9.0)]));
        assert_eq!(dl.run_cycle().await.entries_opened, 1);
    }

    #[tokio::test]
    async fn test_scan_timeout_is_zero_candidates() {
        let config = DecisionConfig {
            scan_timeout: Duration::from_millis(20),
            ..DecisionConfig::default()
        };
        let mut dl = engine(config, Arc::new(SlowScanner), Arc::new(StubMarket::default()));
        let report = dl.run_cycle().await;
        assert_eq!(report.candidates, 0);
        assert_eq!(dl.account().open_count(), 0);
    }

    #[tokio::test]
    async fn test_schema_mismatch_rejected() {
        let schema = Arc::new(FeatureSchema::new(1, &["vwapDistPct", "adx"]).unwrap());
        let other = OnlinePredictor::new(schema, PredictorConfig::default());
        let result = DecisionLoop::new(
            DecisionConfig::default(),
            AccountState::new(25_000.0),
            other,
            StubScanner::new(ScanBehaviour::Fail),
            Arc::new(StubMarket::default()),
        );
        assert!(matches!(result, Err(EngineError::SchemaMismatch { .. })));
    }

    #[tokio::test]
    async fn test_stop_loss_exit_realizes_pnl() {
        let scanner = StubScanner::new(ScanBehaviour::Fixed(vec![candidate("AAA", 10.0, 9.0)]));
        let market = Arc::new(StubMarket::default());
        let mut dl = engine(DecisionConfig::default(), scanner.clone(), market.clone())
            .with_exit_policy(ExitPolicy::bracket());

        market.set_price("AAA", 10.0);
        dl.run_cycle().await;

        scanner.set(ScanBehaviour::Fixed(vec![]));
        market.set_price("AAA", 9.5);
        let report = dl.run_cycle().await;

        assert_eq!(report.positions_closed, 1);
        let account = dl.account();
        assert!(!account.holds("AAA"));
        let exit = account.trade_log.last().unwrap();
        assert_eq!(exit.kind, TradeKind::Exit);
        assert_eq!(exit.reason, "STOP_LOSS");
        assert_eq!(exit.pnl, Some(-500.0));
        assert_eq!(account.realized_pnl, -500.0);
        assert_eq!(account.daily_pnl, -500.0);
        assert_eq!(account.equity, 24_500.0);
    }

    #[tokio::test]
    async fn test_partial_profit_then_trailing_exit() {
        let scanner = StubScanner::new(ScanBehaviour::Fixed(vec![candidate("AAA", 10.0, 9.0)]));
        let market = Arc::new(StubMarket::default());
        let mut dl = engine(DecisionConfig::default(), scanner.clone(), market.clone())
            .with_exit_policy(ExitPolicy::bracket());

        market.set_price("AAA", 10.0);
        dl.run_cycle().await;
        scanner.set(ScanBehaviour::Fixed(vec![]));

        // +6%: half of 1000 shares sold, once
        market.set_price("AAA", 10.6);
        let report = dl.run_cycle().await;
        assert_eq!(report.partial_exits, 1);
        assert_eq!(report.positions_closed, 0);
        let held = &dl.account().positions["AAA"];
        assert_eq!(held.quantity, 500);
        assert!(held.partial_done);
        let lot = dl.account().trade_log.last().unwrap();
        assert_eq!(lot.kind, TradeKind::Exit);
        assert_eq!(lot.reason, "PARTIAL_PROFIT");
        assert_eq!(lot.quantity, 500);
        assert!((lot.pnl.unwrap() - 300.0).abs() < 1e-6);

        let report = dl.run_cycle().await;
        assert_eq!(report.partial_exits, 0);
        assert_eq!(dl.account().positions["AAA"].quantity, 500);

        // 6% off the 10.6 high closes the remainder
        market.set_price("AAA", 9.96);
        let report = dl.run_cycle().await;
        assert_eq!(report.positions_closed, 1);
        assert!(!dl.account().holds("AAA"));
        let exit = dl.account().trade_log.last().unwrap();
        assert_eq!(exit.reason, "TRAILING_STOP");
        assert_eq!(exit.quantity, 500);
        // +300 on the first lot, -20 on the second
        assert!((dl.account().realized_pnl - 280.0).abs() < 1e-6);
        assert!((dl.account().equity - 25_280.0).abs() < 1e-6);
    }

    fn rising_session() -> Vec<Bar> {
        let closes: Vec<f64> = (0..30).map(|i| 9.0 + i as f64 * (1.0 / 29.0)).collect();
        session(&closes)
    }

    #[tokio::test]
    async fn test_risk_mode_scores_sizes_and_learns() {
        let bars = rising_session();
        let last_close = bars.last().unwrap().close;
        let scanner = StubScanner::new(ScanBehaviour::Fixed(vec![candidate("AAA", last_close, 25.0)]));
        let market = Arc::new(StubMarket::default());
        market.set_bars("AAA", bars.clone());
        let config = DecisionConfig {
            sizing: SizingMode::Risk,
            ..DecisionConfig::default()
        };
        let mut dl = engine(config, scanner, market);

        let report = dl.run_cycle().await;
        assert_eq!(report.entries_opened, 1);
        // no basket data → CHOP
        assert_eq!(dl.snapshot().regime, Some(RegimeLabel::Chop));

        let atr = FeatureExtractor::atr_or_fallback(&bars, bars.last().unwrap());
        let expected = RiskSizer::default().size(25_000.0, last_close, atr, 0.5, RegimeLabel::Chop);
        assert_eq!(dl.account().positions["AAA"].quantity, expected);
        assert!(dl.predictor().has_pending("AAA"));
        assert_eq!(dl.predictor().sample_count(), 1);

        let outcome = dl.close_position("AAA", last_close * 1.05, "MANUAL").unwrap();
        assert!(outcome.pnl > 0.0);
        assert!(dl.predictor().bias() > 0.0);
        assert!(!dl.predictor().has_pending("AAA"));
        assert!(!dl.on_trade_closed(&outcome));
    }

    #[tokio::test]
    async fn test_risk_mode_filters_below_vwap() {
        let closes: Vec<f64> = (0..30).map(|i| 11.0 - i as f64 * 0.03).collect();
        let bars = session(&closes);
        let last_close = bars.last().unwrap().close;
        let scanner = StubScanner::new(ScanBehaviour::Fixed(vec![candidate("FADE", last_close, 20.0)]));
        let market = Arc::new(StubMarket::default());
        market.set_bars("FADE", bars);
        let config = DecisionConfig {
            sizing: SizingMode::Risk,
            ..DecisionConfig::default()
        };
        let mut dl = engine(config, scanner, market);
        assert_eq!(dl.run_cycle().await.entries_opened, 0);
    }

    #[tokio::test]
    async fn test_risk_mode_respects_min_score() {
        let bars = rising_session();
        let last_close = bars.last().unwrap().close;
        let scanner = StubScanner::new(ScanBehaviour::Fixed(vec![candidate("AAA", last_close, 25.0)]));
        let market = Arc::new(StubMarket::default());
        market.set_bars("AAA", bars);
        let config = DecisionConfig {
            sizing: SizingMode::Risk,
            min_score: 0.73,
            ..DecisionConfig::default()
        };
        let mut dl = engine(config, scanner, market);
        assert_eq!(dl.run_cycle().await.entries_opened, 0);
    }

    #[tokio::test]
    async fn test_risk_mode_skips_missing_data() {
        let scanner = StubScanner::new(ScanBehaviour::Fixed(vec![candidate("GHOST", 5.0, 30.0)]));
        let config = DecisionConfig {
            sizing: SizingMode::Risk,
            ..DecisionConfig::default()
        };
        let mut dl = engine(config, scanner, Arc::new(StubMarket::default()));
        let report = dl.run_cycle().await;
        assert_eq!(report.candidates, 1);
        assert_eq!(report.entries_opened, 0);
    }

    #[test]
    fn test_session_bars_cut_at_date_change() {
        let mut bars = session(&[1.0, 2.0]);
        let mut today = session(&[3.0, 4.0, 5.0]);
        for b in today.iter_mut() {
            b.timestamp += chrono::Duration::days(1);
        }
        bars.extend(today);
        let s = session_bars(&bars);
        assert_eq!(s.len(), 3);
        assert_eq!(s[0].close, 3.0);
        assert!(session_bars(&[]).is_empty());
    }
}
