//! Calibration tracking for the online model.
//!
//! Every resolved trade pairs the probability assigned at entry with the
//! realised win/loss. The report carries log-loss, Brier score and a binned
//! calibration curve.

use serde::Serialize;
use std::collections::VecDeque;

/// Oldest points are dropped past this many.
const MAX_POINTS: usize = 10_000;
/// Probabilities are clamped away from 0 and 1 before taking logs.
const LOG_LOSS_EPS: f64 = 1e-15;

// ---------------------------------------------------------------------------
// Calibration data
// ---------------------------------------------------------------------------

/// One prediction–outcome pair.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationPoint {
    pub symbol: String,
    pub predicted: f64,
    pub won: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub total_predictions: usize,
    pub log_loss: f64,
    pub brier: f64,
    pub win_rate: f64,
    pub calibration_curve: Vec<CalibrationBucket>,
    pub diagnosis: CalibrationDiagnosis,
}

/// A bin of the calibration curve, e.g. all predictions in [0.6, 0.7).
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationBucket {
    pub bin_start: f64,
    pub bin_end: f64,
    pub mean_predicted: f64,
    pub actual_rate: f64,
    pub count: usize,
    /// |mean_predicted - actual_rate|
    pub deviation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalibrationDiagnosis {
    WellCalibrated,
    OverConfident,
    UnderConfident,
    InsufficientData,
}

/// Log-loss of `predicted` against a binary label.
pub fn log_loss(predicted: f64, won: bool) -> f64 {
    let p = predicted.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS);
    if won { -p.ln() } else { -(1.0 - p).ln() }
}

// ---------------------------------------------------------------------------
// Calibrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Calibrator {
    points: VecDeque<CalibrationPoint>,
    num_bins: usize,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Calibrator {
    pub fn new() -> Self {
        Self {
            points: VecDeque::new(),
            num_bins: 10,
        }
    }

    pub fn add_point(&mut self, point: CalibrationPoint) {
        if self.points.len() == MAX_POINTS {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn count(&self) -> usize {
        self.points.len()
    }

    pub fn mean_log_loss(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|p| log_loss(p.predicted, p.won)).sum::<f64>()
            / self.points.len() as f64
    }

    /// Brier = mean of (predicted - outcome)². 0.25 is a coin flip.
    pub fn brier(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points
            .iter()
            .map(|p| (p.predicted - if p.won { 1.0 } else { 0.0 }).powi(2))
            .sum::<f64>()
            / self.points.len() as f64
    }

    pub fn report(&self) -> CalibrationReport {
        if self.points.is_empty() {
            return CalibrationReport {
                total_predictions: 0,
                log_loss: 0.0,
                brier: 0.0,
                win_rate: 0.0,
                calibration_curve: Vec::new(),
                diagnosis: CalibrationDiagnosis::InsufficientData,
            };
        }

        let wins = self.points.iter().filter(|p| p.won).count();
        let curve = self.calibration_curve();
        let diagnosis = self.diagnose(&curve);
        CalibrationReport {
            total_predictions: self.points.len(),
            log_loss: self.mean_log_loss(),
            brier: self.brier(),
            win_rate: wins as f64 / self.points.len() as f64,
            calibration_curve: curve,
            diagnosis,
        }
    }

    fn calibration_curve(&self) -> Vec<CalibrationBucket> {
        let bin_width = 1.0 / self.num_bins as f64;
        (0..self.num_bins)
            .map(|i| {
                let bin_start = i as f64 * bin_width;
                let bin_end = bin_start + bin_width;
                let last = i == self.num_bins - 1;
                let in_bin: Vec<&CalibrationPoint> = self
                    .points
                    .iter()
                    .filter(|p| p.predicted >= bin_start && (p.predicted < bin_end || (last && p.predicted <= bin_end)))
                    .collect();

                if in_bin.is_empty() {
                    return CalibrationBucket {
                        bin_start,
                        bin_end,
                        mean_predicted: (bin_start + bin_end) / 2.0,
                        actual_rate: 0.0,
                        count: 0,
                        deviation: 0.0,
                    };
                }
                let count = in_bin.len();
                let mean_predicted = in_bin.iter().map(|p| p.predicted).sum::<f64>() / count as f64;
                let actual_rate = in_bin.iter().filter(|p| p.won).count() as f64 / count as f64;
                CalibrationBucket {
                    bin_start,
                    bin_end,
                    mean_predicted,
                    actual_rate,
                    count,
                    deviation: (mean_predicted - actual_rate).abs(),
                }
            })
            .collect()
    }

    fn diagnose(&self, curve: &[CalibrationBucket]) -> CalibrationDiagnosis {
        let populated: Vec<&CalibrationBucket> = curve.iter().filter(|b| b.count >= 3).collect();
        if populated.len() < 3 || self.points.len() < 20 {
            return CalibrationDiagnosis::InsufficientData;
        }

        let mut over = 0;
        let mut under = 0;
        for bucket in &populated {
            if bucket.deviation < 0.05 {
                continue;
            }
            let mid = (bucket.bin_start + bucket.bin_end) / 2.0;
            if mid < 0.3 {
                if bucket.actual_rate > bucket.mean_predicted {
                    over += 1;
                } else {
                    under += 1;
                }
            } else if mid > 0.7 {
                if bucket.actual_rate < bucket.mean_predicted {
                    over += 1;
                } else {
                    under += 1;
                }
            }
        }

        if over > under + 1 {
            CalibrationDiagnosis::OverConfident
        } else if under > over + 1 {
            CalibrationDiagnosis::UnderConfident
        } else {
            CalibrationDiagnosis::WellCalibrated
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
