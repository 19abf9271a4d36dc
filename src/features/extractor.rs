//! Gapper feature extraction.
//!
//! Turns a ticker's session bars plus a few caller-supplied context values
//! into the 28-element vector described by [`FeatureSchema::gapper`].
//! The extractor is pure: same inputs, same vector. Every element is rounded
//! to 6 decimals and non-finite results become 0.

use chrono::Timelike;
use std::sync::Arc;

use super::indicators;
use super::{FeatureSchema, FeatureVector};
use crate::math::{round6, safe_div};
use crate::types::{Bar, Sector, TickerMeta};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ATR_PERIOD: usize = 14;
/// ATR fallback when there are fewer than `ATR_PERIOD` bars.
const ATR_FALLBACK_PCT: f64 = 0.04;
const RECENT_VOLUME_BARS: usize = 10;
const EARLIER_VOLUME_BARS: usize = 30;
/// Rough average-daily-volume proxy: shares per dollar of previous close.
const ADV_PROXY_PER_DOLLAR: f64 = 80_000.0;
const FLOAT_SCALE: f64 = 20_000_000.0;
const HIGH_OF_DAY_BARS: usize = 30;
const SUFFICIENT_HISTORY_BARS: usize = 200;
/// Bars stamped before this UTC hour count as early session.
const EARLY_SESSION_HOUR_UTC: u32 = 14;

/// Caller-supplied inputs for one extraction.
#[derive(Debug, Clone)]
pub struct ExtractInput<'a> {
    pub ticker: &'a TickerMeta,
    /// Session bars, oldest first, at least one.
    pub bars: &'a [Bar],
    pub last_bar: &'a Bar,
    pub vwap: f64,
    /// Broad-index return over the same session.
    pub benchmark_return: f64,
    pub previous_close: f64,
}

/// Stateless extractor bound to the gapper schema.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    schema: Arc<FeatureSchema>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            schema: FeatureSchema::gapper(),
        }
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    /// 14-period ATR, or 4% of the last close with too little history.
    pub fn atr_or_fallback(bars: &[Bar], last: &Bar) -> f64 {
        indicators::atr(bars, ATR_PERIOD).unwrap_or(last.close * ATR_FALLBACK_PCT)
    }

    pub fn extract(&self, input: &ExtractInput<'_>) -> FeatureVector {
        let ExtractInput {
            ticker,
            bars,
            last_bar: last,
            vwap,
            benchmark_return,
            previous_close,
        } = *input;

        let open_bar = bars.first().unwrap_or(last);
        let prior_bar = bars.len().checked_sub(2).map(|i| &bars[i]);
        let atr = Self::atr_or_fallback(bars, last);

        let recent_volume = window_volume(bars, 0, RECENT_VOLUME_BARS) / RECENT_VOLUME_BARS as f64;
        let earlier_volume = (window_volume(bars, RECENT_VOLUME_BARS, EARLIER_VOLUME_BARS)
            / EARLIER_VOLUME_BARS as f64)
            .max(1.0);
        let volume_acceleration = recent_volume / earlier_volume;

        let gap = safe_div(last.close - previous_close, previous_close, 0.0);
        let relative_volume = safe_div(recent_volume, previous_close * ADV_PROXY_PER_DOLLAR, 0.0);
        let float_denominator = if ticker.float_shares > 0.0 { ticker.float_shares } else { 1.0 };

        let high_of_window = bars
            .iter()
            .rev()
            .take(HIGH_OF_DAY_BARS)
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);

        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        let raw = [
            gap,
            relative_volume,
            last.close / vwap,
            last.close / open_bar.open,
            benchmark_return,
            ticker.float_shares / FLOAT_SCALE,
            ticker.short_interest / float_denominator,
            volume_acceleration,
            (last.close - previous_close) / atr,
            last.volume / prior_bar.map(|b| b.volume).filter(|v| *v != 0.0).unwrap_or(1.0),
            ticker.market_cap / 1e9,
            flag(ticker.sector == Sector::Technology),
            flag(ticker.sector == Sector::Healthcare),
            flag(ticker.sector == Sector::ConsumerCyclical),
            flag(last.close > ticker.reference_price * 1.15),
            (gap / 0.4).min(2.0),
            flag(benchmark_return > 0.005),
            flag(volume_acceleration > 2.5),
            last.close / previous_close,
            atr / last.close,
            recent_volume / 1e6,
            flag(ticker.float_shares < 10_000_000.0),
            flag(ticker.short_interest > ticker.float_shares * 0.25),
            flag(last.high >= high_of_window),
            flag(bars.len() > SUFFICIENT_HISTORY_BARS),
            flag(last.timestamp.hour() < EARLY_SESSION_HOUR_UTC),
            flag(gap > 0.3),
            flag(relative_volume > 10.0),
        ];
        debug_assert_eq!(raw.len(), self.schema.len());

        FeatureVector::new(raw.iter().map(|&x| round6(x)).collect())
    }
}

/// Summed volume of `len` bars ending `skip` bars before the last one.
fn window_volume(bars: &[Bar], skip: usize, len: usize) -> f64 {
    let end = bars.len().saturating_sub(skip);
    let start = end.saturating_sub(len);
    bars[start..end].iter().map(|b| b.volume).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::indicators::tests::bars_from_closes;
    use proptest::prelude::*;

    fn ticker() -> TickerMeta {
        TickerMeta {
            symbol: "GAPR".into(),
            float_shares: 8_000_000.0,
            short_interest: 2_400_000.0,
            market_cap: 250_000_000.0,
            sector: Sector::Technology,
            reference_price: 4.0,
        }
    }

    fn extract(bars: &[Bar], vwap: f64, benchmark: f64, prev_close: f64) -> FeatureVector {
        let t = ticker();
        let last = bars.last().unwrap();
        FeatureExtractor::new().extract(&ExtractInput {
            ticker: &t,
            bars,
            last_bar: last,
            vwap,
            benchmark_return: benchmark,
            previous_close: prev_close,
        })
    }

    fn value(v: &FeatureVector, key: &str) -> f64 {
        v.get(FeatureSchema::gapper().index_of(key).unwrap())
    }

    #[test]
    fn test_vector_matches_schema_length() {
        let bars = bars_from_closes(&[5.0; 50]);
        let v = extract(&bars, 5.0, 0.0, 4.0);
        assert_eq!(v.len(), 28);
    }

    #[test]
    fn test_gap_and_flags() {
        let closes: Vec<f64> = (0..20).map(|i| 5.0 + i as f64 * 0.01).collect();
        let bars = bars_from_closes(&closes);
        let last_close = *closes.last().unwrap();
        let v = extract(&bars, 5.0, 0.01, 3.5);

        assert_eq!(value(&v, "gapPct"), round6((last_close - 3.5) / 3.5));
        assert_eq!(value(&v, "gapMultiplier"), round6(last_close / 3.5));
        assert_eq!(value(&v, "sectorTechnology"), 1.0);
        assert_eq!(value(&v, "sectorHealthcare"), 0.0);
        assert_eq!(value(&v, "benchmarkGreen"), 1.0);
        assert_eq!(value(&v, "subTenMillionFloat"), 1.0);
        // 2.4M short of 8M float = 30%
        assert_eq!(value(&v, "highShortInterest"), 1.0);
        assert_eq!(value(&v, "shortInterestRatio"), 0.3);
        assert_eq!(value(&v, "floatRatio"), 0.4);
        assert_eq!(value(&v, "marketCapBillions"), 0.25);
        // rising closes: last bar is the high of day
        assert_eq!(value(&v, "newHighOfDay"), 1.0);
        assert_eq!(value(&v, "sufficientHistory"), 0.0);
        // last bar stamped 13:49 UTC
        assert_eq!(value(&v, "earlySession"), 1.0);
        // 5.19 > 4.0 * 1.15
        assert_eq!(value(&v, "parabolic"), 1.0);
        assert_eq!(value(&v, "largeGap"), 1.0);
    }

    #[test]
    fn test_gap_intensity_is_capped() {
        let bars = bars_from_closes(&[10.0; 20]);
        let v = extract(&bars, 10.0, 0.0, 2.0);
        assert_eq!(value(&v, "gapIntensity"), 2.0);
    }

    #[test]
    fn test_atr_fallback_with_short_history() {
        let bars = bars_from_closes(&[10.0; 5]);
        let last = bars.last().unwrap();
        assert!((FeatureExtractor::atr_or_fallback(&bars, last) - 0.4).abs() < 1e-12);
        let v = extract(&bars, 10.0, 0.0, 9.0);
        // (10 - 9) / 0.4
        assert_eq!(value(&v, "gapAtr"), 2.5);
    }

    #[test]
    fn test_volume_acceleration_uses_trailing_windows() {
        let mut bars = bars_from_closes(&[10.0; 40]);
        for b in bars.iter_mut().take(30) {
            b.volume = 1_000.0;
        }
        for b in bars.iter_mut().skip(30) {
            b.volume = 3_000.0;
        }
        let v = extract(&bars, 10.0, 0.0, 9.0);
        assert_eq!(value(&v, "volumeAcceleration"), 3.0);
        assert_eq!(value(&v, "volumeSurge"), 1.0);
        assert_eq!(value(&v, "recentVolumeMillions"), 0.003);
    }

    #[test]
    fn test_degenerate_inputs_yield_zero_not_nan() {
        let mut bars = bars_from_closes(&[10.0]);
        bars[0].open = 0.0;
        let v = extract(&bars, 0.0, f64::NAN, 0.0);
        assert!(v.values().iter().all(|x| x.is_finite()));
        assert_eq!(value(&v, "priceToVwap"), 0.0);
        assert_eq!(value(&v, "priceToOpen"), 0.0);
        assert_eq!(value(&v, "benchmarkReturn"), 0.0);
    }

    proptest! {
        #[test]
        fn prop_features_are_finite_and_rounded(
            closes in prop::collection::vec(0.01f64..500.0, 1..260),
            vwap in 0.5f64..500.0,
            benchmark in -0.1f64..0.1,
            prev_close in 0.5f64..500.0,
            float_shares in 0.0f64..1e9,
        ) {
            let bars = bars_from_closes(&closes);
            let mut t = ticker();
            t.float_shares = float_shares;
            let v = FeatureExtractor::new().extract(&ExtractInput {
                ticker: &t,
                bars: &bars,
                last_bar: bars.last().unwrap(),
                vwap,
                benchmark_return: benchmark,
                previous_close: prev_close,
            });
            prop_assert_eq!(v.len(), 28);
            for x in v.values() {
                prop_assert!(x.is_finite());
                prop_assert_eq!(round6(*x), *x);
            }
        }
    }
}
