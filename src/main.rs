//! AlphaStream: adaptive intraday gapper scoring and decision engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the model from disk (or starts cold), and runs the
//! scan → evaluate → commit → mark loop inside the session window with
//! graceful shutdown.

use anyhow::Result;
use chrono::{NaiveDate, Timelike, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use alphastream::config::AppConfig;
use alphastream::dashboard::{self, ServiceState};
use alphastream::engine::accountant::CycleReport;
use alphastream::engine::decision::DecisionLoop;
use alphastream::engine::market_data::{HttpMarketData, MarketData};
use alphastream::engine::scanner::{CandidateScanner, HttpGainersScanner, StaticScanner};
use alphastream::engine::status::HttpTradingStatus;
use alphastream::features::FeatureSchema;
use alphastream::predictor::OnlinePredictor;
use alphastream::types::AccountState;

const BANNER: &str = r#"
    _    _       _           ____  _
   / \  | |_ __ | |__   __ _/ ___|| |_ _ __ ___  __ _ _ __ ___
  / _ \ | | '_ \| '_ \ / _` \___ \| __| '__/ _ \/ _` | '_ ` _ \
 / ___ \| | |_) | | | | (_| |___) | |_| | |  __/ (_| | | | | | |
/_/   \_\_| .__/|_| |_|\__,_|____/ \__|_|  \___|\__,_|_| |_| |_|
          |_|
  Adaptive intraday gapper engine v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("ALPHASTREAM_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = if std::path::Path::new(&config_path).exists() {
        AppConfig::load(&config_path)?
    } else {
        AppConfig::default()
    };

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        sizing = ?cfg.engine.sizing,
        scan_interval_secs = cfg.engine.scan_interval_secs,
        initial_equity = cfg.engine.initial_equity,
        "AlphaStream starting up"
    );

    // -- Collaborators ---------------------------------------------------

    let (scanner, market): (Arc<dyn CandidateScanner>, Arc<dyn MarketData>) = match cfg.data_api_key() {
        Some(key) => {
            let timeout = Duration::from_secs(cfg.data.request_timeout_secs);
            let market: Arc<dyn MarketData> = Arc::new(HttpMarketData::new(
                &cfg.data.base_url,
                SecretString::new(key.expose_secret().clone()),
                cfg.data.request_timeout_secs,
            )?);
            let mut scanner = HttpGainersScanner::new(
                &cfg.data.base_url,
                SecretString::new(key.expose_secret().clone()),
                cfg.scan_filter(),
                timeout,
            )?
            .with_reference(market.clone());
            if cfg.scanner.exclude_restricted {
                let status = HttpTradingStatus::new(&cfg.data.base_url, key, timeout)?;
                scanner = scanner.with_trading_status(Arc::new(status));
            }
            (Arc::new(scanner), market)
        }
        None => {
            warn!(
                env = %cfg.data.api_key_env,
                "No market-data API key configured, running with an empty static scanner"
            );
            let market = HttpMarketData::new(
                &cfg.data.base_url,
                SecretString::new(String::new()),
                cfg.data.request_timeout_secs,
            )?;
            (Arc::new(StaticScanner::new(Vec::new())), Arc::new(market))
        }
    };

    // -- Model and engine ------------------------------------------------

    let model_path = cfg.predictor.model_path.clone();
    let predictor = OnlinePredictor::load_or_default(FeatureSchema::gapper(), cfg.predictor_config(), &model_path);
    info!(
        path = %model_path,
        samples = predictor.sample_count(),
        "Model ready"
    );

    let engine = DecisionLoop::new(
        cfg.decision_config(),
        AccountState::new(cfg.engine.initial_equity),
        predictor,
        scanner,
        market,
    )?
    .with_exit_policy(cfg.exit_policy())
    .with_regime_config(cfg.regime_config());

    let state = Arc::new(ServiceState::new(engine, model_path));

    if cfg.server.enabled {
        dashboard::spawn_server(state.clone(), cfg.server.port)?;
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.engine.scan_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut session_day: NaiveDate = Utc::now().date_naive();

    info!(
        interval_secs = cfg.engine.scan_interval_secs,
        window = format!(
            "{:02}:00-{:02}:00 UTC",
            cfg.engine.session_start_hour_utc, cfg.engine.session_end_hour_utc
        ),
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                if now.date_naive() != session_day {
                    session_day = now.date_naive();
                    state.start_new_session().await;
                }
                if !cfg.in_session(now.hour()) {
                    continue;
                }
                let report = state.run_cycle().await;
                log_cycle_report(&report);
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    match state.save_model().await {
        Ok(samples) => info!(path = %state.model_path(), samples, "Model saved"),
        Err(e) => error!(path = %state.model_path(), error = %e, "Failed to save model on exit"),
    }

    let snapshot = state.snapshot().await;
    info!(
        equity = format!("${:.2}", snapshot.account.equity),
        cycles = snapshot.cycle_count,
        trades = snapshot.account.trade_log.len(),
        daily_pnl = %snapshot.daily_pnl_display,
        "AlphaStream shut down cleanly."
    );

    Ok(())
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    if report.breaker_tripped {
        warn!(
            cycle = report.cycle_number,
            daily_pnl = %report.daily_pnl_display,
            "Circuit breaker tripped, no new entries until the next session"
        );
    }
    info!(
        cycle = report.cycle_number,
        candidates = report.candidates,
        entries = report.entries_opened,
        exits = report.positions_closed,
        partials = report.partial_exits,
        open = report.open_positions,
        daily_pnl = %report.daily_pnl_display,
        skipped = report.skipped,
        "Cycle complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("alphastream=info"));

    let json_logging = std::env::var("ALPHASTREAM_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
