//! Bar-series indicators: true range, ATR, ADX and session VWAP.
//!
//! ATR and ADX use Wilder smoothing. All functions return `None` when the
//! series is too short rather than a partially warmed-up value.

use crate::types::Bar;

/// True range per bar. The first bar has no previous close, so its range
/// is high - low.
pub fn true_ranges(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, b)| {
            let hl = b.high - b.low;
            match i.checked_sub(1).map(|p| bars[p].close) {
                Some(prev_close) => hl
                    .max((b.high - prev_close).abs())
                    .max((b.low - prev_close).abs()),
                None => hl,
            }
        })
        .collect()
}

/// Most recent Average True Range over `period` bars (Wilder).
///
/// Needs at least `period` bars.
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let tr = true_ranges(bars);
    let n = period as f64;
    let mut value = tr[..period].iter().sum::<f64>() / n;
    for &x in &tr[period..] {
        value = (value * (n - 1.0) + x) / n;
    }
    Some(value)
}

/// Most recent Average Directional Index over `period` bars (Wilder).
///
/// Needs `2 * period` bars: `period` directional moves seed the smoothed
/// sums, which then yield the `period` DX values that seed the ADX average.
pub fn adx(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < 2 * period {
        return None;
    }
    let n = period as f64;

    let mut tr = Vec::with_capacity(bars.len() - 1);
    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);
    for w in bars.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        tr.push(
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs()),
        );
    }

    let mut s_tr: f64 = tr[..period].iter().sum();
    let mut s_plus: f64 = plus_dm[..period].iter().sum();
    let mut s_minus: f64 = minus_dm[..period].iter().sum();

    let dx = |s_tr: f64, s_plus: f64, s_minus: f64| -> f64 {
        if s_tr <= 0.0 {
            return 0.0;
        }
        let pdi = 100.0 * s_plus / s_tr;
        let mdi = 100.0 * s_minus / s_tr;
        let sum = pdi + mdi;
        if sum <= 0.0 {
            0.0
        } else {
            100.0 * (pdi - mdi).abs() / sum
        }
    };

    let mut dxs = vec![dx(s_tr, s_plus, s_minus)];
    for i in period..tr.len() {
        s_tr = s_tr - s_tr / n + tr[i];
        s_plus = s_plus - s_plus / n + plus_dm[i];
        s_minus = s_minus - s_minus / n + minus_dm[i];
        dxs.push(dx(s_tr, s_plus, s_minus));
    }

    if dxs.len() < period {
        return None;
    }
    let mut value = dxs[..period].iter().sum::<f64>() / n;
    for &x in &dxs[period..] {
        value = (value * (n - 1.0) + x) / n;
    }
    Some(value)
}

/// Volume-weighted average of the typical price. `None` with no volume.
pub fn vwap(bars: &[Bar]) -> Option<f64> {
    let (pv, v) = bars.iter().fold((0.0, 0.0), |(pv, v), b| {
        let vol = if b.volume.is_finite() { b.volume.max(0.0) } else { 0.0 };
        (pv + b.typical_price() * vol, v + vol)
    });
    if v > 0.0 {
        Some(pv / v)
    } else {
        None
    }
}

/// Simple returns close-to-close.
pub fn returns(bars: &[Bar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| crate::math::safe_div(w[1].close - w[0].close, w[0].close, 0.0))
        .collect()
}
