//! Service route handlers.
//!
//! All endpoints return JSON except `/healthz`. State is shared via
//! `Arc<ServiceState>`; the decision loop sits behind an async mutex so a
//! manual `/scan` queues behind an in-flight scheduled cycle.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

use crate::engine::accountant::CycleReport;
use crate::engine::decision::{DecisionLoop, EngineSnapshot};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers and the scheduler.
pub struct ServiceState {
    engine: Mutex<DecisionLoop>,
    /// Last published view; readers never wait on a running cycle.
    snapshot: RwLock<EngineSnapshot>,
    model_path: String,
}

impl ServiceState {
    pub fn new(engine: DecisionLoop, model_path: impl Into<String>) -> Self {
        let snapshot = engine.snapshot();
        Self {
            engine: Mutex::new(engine),
            snapshot: RwLock::new(snapshot),
            model_path: model_path.into(),
        }
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Run one cycle and publish the resulting snapshot.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut engine = self.engine.lock().await;
        let report = engine.run_cycle().await;
        *self.snapshot.write().await = engine.snapshot();
        report
    }

    /// Day-boundary hook: clear daily P&L and re-arm the breaker.
    pub async fn start_new_session(&self) {
        let mut engine = self.engine.lock().await;
        engine.start_new_session();
        *self.snapshot.write().await = engine.snapshot();
    }

    /// Persist the model to the configured path.
    pub async fn save_model(&self) -> anyhow::Result<u64> {
        let engine = self.engine.lock().await;
        let predictor = engine.predictor();
        predictor.save(&self.model_path)?;
        Ok(predictor.sample_count())
    }
}

pub type AppState = Arc<ServiceState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ScanResponse {
    pub triggered: bool,
    pub timestamp: DateTime<Utc>,
    pub report: CycleReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveResponse {
    pub saved: bool,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /
pub async fn get_status(State(state): State<AppState>) -> Json<EngineSnapshot> {
    Json(state.snapshot().await)
}

/// POST /scan
///
/// Transient scan and data failures are absorbed inside the cycle, so this
/// always answers 200 with the best-known state.
pub async fn trigger_scan(State(state): State<AppState>) -> Json<ScanResponse> {
    info!("Manual scan triggered");
    let report = state.run_cycle().await;
    Json(ScanResponse {
        triggered: true,
        timestamp: Utc::now(),
        report,
    })
}

/// POST /model/save
pub async fn save_model(State(state): State<AppState>) -> (StatusCode, Json<SaveResponse>) {
    let path = state.model_path().to_string();
    match state.save_model().await {
        Ok(samples) => {
            info!(path = %path, samples, "Model saved");
            (
                StatusCode::OK,
                Json(SaveResponse {
                    saved: true,
                    path,
                    sample_count: Some(samples),
                    error: None,
                }),
            )
        }
        Err(e) => {
            error!(path = %path, error = %e, "Model save failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SaveResponse {
                    saved: false,
                    path,
                    sample_count: None,
                    error: Some(format!("{e:#}")),
                }),
            )
        }
    }
}

/// GET /healthz
pub async fn health() -> &'static str {
    "OK"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
