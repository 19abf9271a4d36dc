//! Online logistic model.
//!
//! Scores schema-ordered feature vectors with
//! `sigmoid(bias + Σ wₖ·zₖ)`, where `zₖ` is the feature standardised by
//! running (Welford) statistics. Learning is driven by realised trades:
//! an entry snapshot is stored per symbol, and the matching outcome applies
//! one SGD step with label `pnl > 0`.
//!
//! `score` never touches the running statistics. Normalisation statistics
//! move only through [`OnlinePredictor::observe`], which
//! [`OnlinePredictor::record_entry`] calls once per snapshot while learning
//! is enabled.

pub mod calibration;
pub mod normalizer;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::features::{FeatureSchema, FeatureVector};
use crate::math::sigmoid;
use crate::storage;
use crate::types::TradeOutcome;
use calibration::{CalibrationDiagnosis, CalibrationPoint, Calibrator};
use normalizer::RunningStats;

const BIAS_KEY: &str = "bias";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PredictorConfig {
    pub learning_rate: f64,
    /// When false, outcomes never train and entries are not observed.
    pub learn: bool,
    /// Cap on unresolved entry snapshots; oldest evicted first.
    pub max_pending: Option<usize>,
    /// Unresolved snapshots older than this are dropped.
    pub max_pending_age: Option<Duration>,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            learn: true,
            max_pending: None,
            max_pending_age: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted record
// ---------------------------------------------------------------------------

/// On-disk model. Keys outside the schema are ignored on load and missing
/// keys default to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelRecord {
    /// Feature weights plus the `bias` intercept.
    pub weights: BTreeMap<String, f64>,
    pub running_mean: BTreeMap<String, f64>,
    /// Sum of squared deviations per feature.
    pub running_variance: BTreeMap<String, f64>,
    pub sample_count: u64,
}

/// Snapshot stored at entry time, consumed by the matching outcome.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub features: FeatureVector,
    pub score_at_entry: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictorDiagnostics {
    pub schema_version: u32,
    pub sample_count: u64,
    pub pending_entries: usize,
    pub resolved_outcomes: usize,
    pub log_loss: f64,
    pub brier: f64,
    pub calibration: CalibrationDiagnosis,
}

// ---------------------------------------------------------------------------
// Predictor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OnlinePredictor {
    schema: Arc<FeatureSchema>,
    config: PredictorConfig,
    weights: Vec<f64>,
    bias: f64,
    stats: RunningStats,
    pending: HashMap<String, PendingEntry>,
    calibrator: Calibrator,
}

impl OnlinePredictor {
    /// Cold-start model: zero weights, every input scores 0.5.
    pub fn new(schema: Arc<FeatureSchema>, config: PredictorConfig) -> Self {
        let n = schema.len();
        Self {
            schema,
            config,
            weights: vec![0.0; n],
            bias: 0.0,
            stats: RunningStats::new(n),
            pending: HashMap::new(),
            calibrator: Calibrator::new(),
        }
    }

    pub fn from_record(schema: Arc<FeatureSchema>, config: PredictorConfig, record: &ModelRecord) -> Self {
        let pick = |map: &BTreeMap<String, f64>| -> Vec<f64> {
            schema
                .keys()
                .iter()
                .map(|k| map.get(k).copied().filter(|v| v.is_finite()).unwrap_or(0.0))
                .collect()
        };
        let weights = pick(&record.weights);
        let stats = RunningStats::from_parts(
            schema.len(),
            pick(&record.running_mean),
            pick(&record.running_variance),
            record.sample_count,
        );
        let bias = record
            .weights
            .get(BIAS_KEY)
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);

        Self {
            weights,
            bias,
            stats,
            ..Self::new(schema, config)
        }
    }

    pub fn to_record(&self) -> ModelRecord {
        let keyed = |values: &[f64]| -> BTreeMap<String, f64> {
            self.schema
                .keys()
                .iter()
                .cloned()
                .zip(values.iter().copied())
                .collect()
        };
        let mut weights = keyed(&self.weights);
        weights.insert(BIAS_KEY.to_string(), self.bias);
        ModelRecord {
            weights,
            running_mean: keyed(self.stats.mean()),
            running_variance: keyed(self.stats.variance()),
            sample_count: self.stats.count(),
        }
    }

    /// Restore from `path`. A missing or malformed file is logged and
    /// yields a cold-start model.
    pub fn load_or_default(schema: Arc<FeatureSchema>, config: PredictorConfig, path: &str) -> Self {
        match storage::load_model(Some(path)) {
            Ok(Some(record)) => Self::from_record(schema, config, &record),
            Ok(None) => Self::new(schema, config),
            Err(e) => {
                warn!(path, error = %e, "Model state unreadable, starting cold");
                Self::new(schema, config)
            }
        }
    }

    pub fn save(&self, path: &str) -> Result<()> {
        storage::save_model(&self.to_record(), Some(path))
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn weight(&self, key: &str) -> Option<f64> {
        self.schema.index_of(key).map(|i| self.weights[i])
    }

    pub fn sample_count(&self) -> u64 {
        self.stats.count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self, symbol: &str) -> bool {
        self.pending.contains_key(symbol)
    }

    // -- Inference ----------------------------------------------------------

    fn logit(&self, z: &[f64]) -> f64 {
        self.bias + self.weights.iter().zip(z).map(|(w, z)| w * z).sum::<f64>()
    }

    /// Probability in [0, 1]. Pure.
    pub fn score(&self, features: &FeatureVector) -> f64 {
        let z = self.stats.standardize(features.values());
        let p = sigmoid(self.logit(&z));
        if p.is_finite() { p } else { 0.5 }
    }

    /// Score a key→value mapping against this model's schema.
    pub fn score_named<'a, I>(&self, named: I) -> f64
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        self.score(&FeatureVector::from_named(&self.schema, named))
    }

    // -- Learning -----------------------------------------------------------

    /// Fold a vector into the normalisation statistics.
    pub fn observe(&mut self, features: &FeatureVector) {
        self.stats.observe(features.values());
    }

    /// Store the snapshot for `symbol`, replacing any unresolved one.
    pub fn record_entry(&mut self, symbol: &str, features: FeatureVector) {
        self.record_entry_at(symbol, features, Utc::now());
    }

    pub fn record_entry_at(&mut self, symbol: &str, features: FeatureVector, at: DateTime<Utc>) {
        let score_at_entry = self.score(&features);
        if self.config.learn {
            self.observe(&features);
        }
        let entry = PendingEntry {
            features,
            score_at_entry,
            recorded_at: at,
        };
        let replaced = self.pending.insert(symbol.to_string(), entry).is_some();
        if replaced {
            debug!(symbol, "Replaced unresolved entry snapshot");
        }
        self.evict_pending(at);
    }

    /// Drop snapshots past the age limit, then the oldest past the count limit.
    pub fn evict_pending(&mut self, now: DateTime<Utc>) {
        if let Some(max_age) = self.config.max_pending_age {
            let before = self.pending.len();
            self.pending.retain(|_, e| now - e.recorded_at <= max_age);
            let dropped = before - self.pending.len();
            if dropped > 0 {
                debug!(dropped, "Expired unresolved entry snapshots");
            }
        }
        if let Some(max) = self.config.max_pending {
            while self.pending.len() > max {
                let oldest = self
                    .pending
                    .iter()
                    .min_by_key(|(_, e)| e.recorded_at)
                    .map(|(s, _)| s.clone());
                match oldest {
                    Some(symbol) => {
                        self.pending.remove(&symbol);
                        debug!(symbol = %symbol, "Evicted oldest unresolved entry snapshot");
                    }
                    None => break,
                }
            }
        }
    }

    /// One SGD step from a realised trade. Returns whether the model trained.
    /// No-op when learning is off or there is no snapshot for the symbol.
    pub fn record_outcome(&mut self, outcome: &TradeOutcome) -> bool {
        if !self.config.learn {
            return false;
        }
        let Some(entry) = self.pending.remove(&outcome.symbol) else {
            debug!(symbol = %outcome.symbol, "No entry snapshot for outcome");
            return false;
        };

        let won = outcome.pnl > 0.0;
        let label = if won { 1.0 } else { 0.0 };
        let z = self.stats.standardize(entry.features.values());
        let predicted = sigmoid(self.logit(&z));
        let step = self.config.learning_rate * (label - predicted);

        if step.is_finite() {
            self.bias += step;
            for (w, z) in self.weights.iter_mut().zip(&z) {
                let delta = step * z;
                if delta.is_finite() {
                    *w += delta;
                }
            }
        }

        self.calibrator.add_point(CalibrationPoint {
            symbol: outcome.symbol.clone(),
            predicted: entry.score_at_entry,
            won,
        });

        info!(
            symbol = %outcome.symbol,
            pnl = format!("${:.2}", outcome.pnl),
            label,
            predicted = format!("{:.4}", predicted),
            score_at_entry = format!("{:.4}", entry.score_at_entry),
            "Model updated from outcome"
        );
        true
    }

    pub fn diagnostics(&self) -> PredictorDiagnostics {
        let report = self.calibrator.report();
        PredictorDiagnostics {
            schema_version: self.schema.version(),
            sample_count: self.stats.count(),
            pending_entries: self.pending.len(),
            resolved_outcomes: report.total_predictions,
            log_loss: report.log_loss,
            brier: report.brier,
            calibration: report.diagnosis,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
