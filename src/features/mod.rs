//! Feature engineering.
//!
//! A [`FeatureSchema`] is the fixed, versioned, ordered list of feature keys
//! shared by the extractor and the predictor. A [`FeatureVector`] holds the
//! values in schema order.

pub mod extractor;
pub mod indicators;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::types::EngineError;

/// Keys of the gapper feature set, in extractor output order.
pub const GAPPER_KEYS: [&str; 28] = [
    "gapPct",
    "relativeVolume",
    "priceToVwap",
    "priceToOpen",
    "benchmarkReturn",
    "floatRatio",
    "shortInterestRatio",
    "volumeAcceleration",
    "gapAtr",
    "volumeVsPriorBar",
    "marketCapBillions",
    "sectorTechnology",
    "sectorHealthcare",
    "sectorConsumerCyclical",
    "parabolic",
    "gapIntensity",
    "benchmarkGreen",
    "volumeSurge",
    "gapMultiplier",
    "atrPct",
    "recentVolumeMillions",
    "subTenMillionFloat",
    "highShortInterest",
    "newHighOfDay",
    "sufficientHistory",
    "earlySession",
    "largeGap",
    "extremeRelativeVolume",
];

pub const GAPPER_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Ordered, validated list of feature keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    version: u32,
    keys: Vec<String>,
}

impl FeatureSchema {
    /// Build a schema. Keys must be non-empty and unique, and `bias`
    /// is reserved for the model intercept.
    pub fn new<S: AsRef<str>>(version: u32, keys: &[S]) -> Result<Self, EngineError> {
        if keys.is_empty() {
            return Err(EngineError::InvalidSchema("no feature keys".into()));
        }
        let mut seen = HashSet::new();
        for key in keys {
            let key = key.as_ref();
            if key.trim().is_empty() {
                return Err(EngineError::InvalidSchema("empty feature key".into()));
            }
            if key == "bias" {
                return Err(EngineError::InvalidSchema("`bias` is reserved".into()));
            }
            if !seen.insert(key) {
                return Err(EngineError::InvalidSchema(format!("duplicate key `{key}`")));
            }
        }
        Ok(Self {
            version,
            keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
        })
    }

    /// The 28-key gapper schema produced by [`extractor::FeatureExtractor`].
    pub fn gapper() -> Arc<Self> {
        Arc::new(Self {
            version: GAPPER_SCHEMA_VERSION,
            keys: GAPPER_KEYS.iter().map(|k| k.to_string()).collect(),
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }
}

// ---------------------------------------------------------------------------
// Vector
// ---------------------------------------------------------------------------

/// Feature values in schema order. Values are always finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    /// Positional constructor; non-finite values are coerced to 0.
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|v| if v.is_finite() { v } else { 0.0 })
                .collect(),
        }
    }

    /// Build from named values. Names outside the schema are ignored and
    /// keys without a value are 0.
    pub fn from_named<'a, I>(schema: &FeatureSchema, named: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut values = vec![0.0; schema.len()];
        for (key, value) in named {
            if let Some(i) = schema.index_of(key) {
                values[i] = value;
            }
        }
        Self::new(values)
    }

    /// Value at `index`; positions past the end read as 0.
    pub fn get(&self, index: usize) -> f64 {
        self.values.get(index).copied().unwrap_or(0.0)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Named view of the vector for logging.
    pub fn named<'a>(&'a self, schema: &'a FeatureSchema) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        schema
            .keys()
            .iter()
            .enumerate()
            .map(move |(i, k)| (k.as_str(), self.get(i)))
    }
}
