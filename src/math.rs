//! Shared numeric helpers.

/// Population standard deviation. Empty input yields 0.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// `a / b`, or `fallback` when `b` is zero or not finite.
pub fn safe_div(a: f64, b: f64, fallback: f64) -> f64 {
    if b == 0.0 || !b.is_finite() {
        fallback
    } else {
        a / b
    }
}

/// Round to 6 decimal places; non-finite values become 0.
pub fn round6(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    let r = (x * 1e6).round() / 1e6;
    if r.is_finite() { r } else { 0.0 }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Signed dollar amount, e.g. `+$1,250.00` or `-$2,000.50`.
pub fn format_signed_currency(amount: f64) -> String {
    let sign = if amount < 0.0 { "-" } else { "+" };
    let cents = (amount.abs() * 100.0).round() as u64;
    let dollars = cents / 100;
    let digits = dollars.to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{sign}${grouped}.{:02}", cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_dev_population() {
        // mean 5, squared deviations sum 32, n = 8
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&v) - 2.0).abs() < 1e-12);
        assert_eq!(std_dev(&[]), 0.0);
        assert_eq!(std_dev(&[3.0]), 0.0);
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(1.0, 0.0, 7.0), 7.0);
        assert_eq!(safe_div(1.0, f64::NAN, 0.0), 0.0);
        assert_eq!(safe_div(1.0, f64::INFINITY, 0.0), 0.0);
        assert_eq!(safe_div(6.0, 3.0, 0.0), 2.0);
    }

    #[test]
    fn test_round6() {
        assert_eq!(round6(1.23456789), 1.234568);
        assert_eq!(round6(f64::NAN), 0.0);
        assert_eq!(round6(f64::NEG_INFINITY), 0.0);
        assert_eq!(round6(-0.0000004), 0.0);
    }

    #[test]
    fn test_sigmoid_midpoint() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn test_format_signed_currency() {
        assert_eq!(format_signed_currency(0.0), "+$0.00");
        assert_eq!(format_signed_currency(1250.0), "+$1,250.00");
        assert_eq!(format_signed_currency(-2000.5), "-$2,000.50");
        assert_eq!(format_signed_currency(-12.346), "-$12.35");
        assert_eq!(format_signed_currency(1_234_567.0), "+$1,234,567.00");
    }
}
