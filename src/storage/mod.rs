//! Persistence layer.
//!
//! Saves and loads the model record to/from a JSON file. Account state is
//! intraday and is not persisted.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::predictor::ModelRecord;

/// Default model file path.
pub const DEFAULT_MODEL_FILE: &str = "alphastream_model.json";

/// Save the model record to a JSON file.
///
/// Written to a sibling temp file first and renamed into place, so a crash
/// mid-write never leaves a truncated model behind.
pub fn save_model(record: &ModelRecord, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_MODEL_FILE);
    let json = serde_json::to_string_pretty(record).context("Failed to serialise model record")?;

    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create model directory for {path}"))?;
    }

    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &json).context(format!("Failed to write model to {tmp}"))?;
    std::fs::rename(&tmp, path).context(format!("Failed to move model into {path}"))?;

    debug!(path, samples = record.sample_count, "Model saved");
    Ok(())
}

/// Load the model record from a JSON file.
/// Returns None if the file doesn't exist (cold start).
pub fn load_model(path: Option<&str>) -> Result<Option<ModelRecord>> {
    let path = path.unwrap_or(DEFAULT_MODEL_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved model found, starting cold");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).context(format!("Failed to read model from {path}"))?;

    let record: ModelRecord =
        serde_json::from_str(&json).context(format!("Failed to parse model from {path}"))?;

    info!(
        path,
        samples = record.sample_count,
        weights = record.weights.len(),
        "Model loaded from disk"
    );

    Ok(Some(record))
}

/// Delete the model file (for testing or reset).
pub fn delete_model(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_MODEL_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete model file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
