//! Full cycles through the decision loop and the HTTP surface.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use alphastream::dashboard::{build_router, AppState, ServiceState};
use alphastream::engine::decision::{DecisionConfig, DecisionLoop, SizingMode};
use alphastream::engine::market_data::MarketData;
use alphastream::engine::scanner::StaticScanner;
use alphastream::features::extractor::FeatureExtractor;
use alphastream::features::FeatureSchema;
use alphastream::predictor::{OnlinePredictor, PredictorConfig};
use alphastream::types::{AccountState, Candidate, RegimeLabel};

use crate::mock_market::*;

fn engine(config: DecisionConfig, candidates: Vec<Candidate>, market: impl MarketData + 'static) -> DecisionLoop {
    DecisionLoop::new(
        config,
        AccountState::new(25_000.0),
        OnlinePredictor::new(FeatureSchema::gapper(), PredictorConfig::default()),
        Arc::new(StaticScanner::new(candidates)),
        Arc::new(market),
    )
    .unwrap()
}

fn risk_config() -> DecisionConfig {
    DecisionConfig {
        sizing: SizingMode::Risk,
        ..DecisionConfig::default()
    }
}

fn temp_model_path(tag: &str) -> String {
    std::env::temp_dir()
        .join(format!("alphastream_{tag}_{}.json", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned()
}

async fn post(state: &AppState, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = build_router(state.clone())
        .oneshot(Request::builder().method(Method::POST).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn get_status(state: &AppState) -> serde_json::Value {
    let resp = build_router(state.clone())
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn notional_scan_through_service_opens_reference_positions() {
    let prices = Arc::new(Mutex::new(HashMap::from([
        ("AAA".to_string(), 10.0),
        ("BBB".to_string(), 20.0),
    ])));
    let dl = engine(
        DecisionConfig::default(),
        vec![candidate("AAA", 10.0, 9.0), candidate("BBB", 20.0, 8.0)],
        quoting(prices),
    );
    let state: AppState = Arc::new(ServiceState::new(dl, temp_model_path("notional")));

    let (status, scan) = post(&state, "/scan").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scan["triggered"], true);
    assert_eq!(scan["report"]["entries_opened"], 2);

    let json = get_status(&state).await;
    assert_eq!(json["status"], "LIVE");
    assert_eq!(json["account"]["positions"]["AAA"]["quantity"], 1000);
    assert_eq!(json["account"]["positions"]["BBB"]["quantity"], 500);
    let log = json["account"]["trade_log"].as_array().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0]["symbol"], "AAA");
    assert_eq!(log[0]["type"], "ENTRY");
    assert_eq!(log[1]["symbol"], "BBB");
    assert_eq!(json["daily_pnl_display"], "+$0.00");
    assert!(json["last_scan_at"].is_string());
}

#[tokio::test]
async fn breaker_halts_service_until_new_session() {
    let prices = Arc::new(Mutex::new(HashMap::from([("AAA".to_string(), 10.0)])));
    let dl = engine(DecisionConfig::default(), vec![candidate("AAA", 10.0, 9.0)], quoting(prices.clone()));
    let state: AppState = Arc::new(ServiceState::new(dl, temp_model_path("breaker")));

    state.run_cycle().await;
    prices.lock().unwrap().insert("AAA".into(), 7.5);
    let report = state.run_cycle().await;
    assert!(report.breaker_tripped);
    assert_eq!(report.daily_pnl_display, "-$2,500.00");

    // still answers 200 while halted
    let (status, scan) = post(&state, "/scan").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scan["report"]["skipped"], true);
    assert_eq!(get_status(&state).await["status"], "HALTED");

    state.start_new_session().await;
    let json = get_status(&state).await;
    assert_eq!(json["status"], "LIVE");
    assert_eq!(json["account"]["daily_max_loss_hit"], false);
}

#[tokio::test]
async fn risk_cycle_in_bull_trend_scores_sizes_and_records_entry() {
    let session = gapper_session();
    let last = *session.last().unwrap();
    let mut series = bull_basket();
    series.insert("GAPR".into(), session.clone());

    let mut dl = engine(
        risk_config(),
        vec![candidate("GAPR", last.close, 25.0)],
        market_with(series),
    );
    let report = dl.run_cycle().await;

    assert_eq!(report.entries_opened, 1);
    assert_eq!(dl.snapshot().regime, Some(RegimeLabel::BullTrend));

    // cold model scores 0.5 (kelly 0.9), bull tape (regime 1.3)
    let atr = FeatureExtractor::atr_or_fallback(&session, &last);
    let expected = (25_000.0 * 0.018 * 0.9 * 1.3 / (atr * 1.3)).floor() as u64;
    let quantity = dl.account().positions["GAPR"].quantity;
    assert_eq!(quantity, expected);
    // sized on risk, not on what $25k buys at $10
    assert!(quantity > 2_500);
    assert!(dl.predictor().has_pending("GAPR"));
    assert_eq!(dl.predictor().sample_count(), 1);
    assert_eq!(dl.snapshot().model.pending_entries, 1);
}

#[tokio::test]
async fn closed_trades_train_and_the_model_survives_a_restart() {
    let session = gapper_session();
    let last = *session.last().unwrap();
    let mut series = bull_basket();
    series.insert("GAPR".into(), session);

    let mut dl = engine(
        risk_config(),
        vec![candidate("GAPR", last.close, 25.0)],
        market_with(series),
    );
    dl.run_cycle().await;

    let outcome = dl.close_position("GAPR", last.close * 1.05, "MANUAL").unwrap();
    assert!(outcome.is_win());
    assert!(dl.predictor().bias() > 0.0);
    assert_eq!(dl.snapshot().model.resolved_outcomes, 1);
    // no pending snapshot left to learn from
    assert!(!dl.on_trade_closed(&outcome));

    let path = temp_model_path("restart");
    dl.predictor().save(&path).unwrap();
    let restored = OnlinePredictor::load_or_default(FeatureSchema::gapper(), PredictorConfig::default(), &path);

    assert_eq!(restored.sample_count(), dl.predictor().sample_count());
    assert_eq!(restored.bias(), dl.predictor().bias());
    let sample = [("vwapDistPct", 1.5), ("gapPct", 20.0), ("relativeVolume", 3.0)];
    assert_eq!(restored.score_named(sample), dl.predictor().score_named(sample));
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn data_outage_is_absorbed_by_the_cycle() {
    let dl = engine(risk_config(), vec![candidate("GAPR", 10.0, 25.0)], outage());
    let state: AppState = Arc::new(ServiceState::new(dl, temp_model_path("outage")));

    let (status, scan) = post(&state, "/scan").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scan["report"]["candidates"], 1);
    assert_eq!(scan["report"]["entries_opened"], 0);

    let json = get_status(&state).await;
    assert_eq!(json["regime"], "CHOP");
    assert_eq!(json["account"]["equity"].as_f64().unwrap(), 25_000.0);
}
