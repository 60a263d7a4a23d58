use super::ema::ewm;

/// True range per bar: max(high-low, |high-prev_close|, |low-prev_close|).
/// The first bar has no previous close and uses high-low alone.
pub fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let len = highs.len();
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let hl = (highs[i] - lows[i]).abs();
        let tr = if i == 0 {
            hl
        } else {
            let prev_close = closes[i - 1];
            hl.max((highs[i] - prev_close).abs())
                .max((lows[i] - prev_close).abs())
        };
        out.push(tr);
    }
    out
}

/// Wilder's smoothing (RMA), an EMA with alpha = 1/period.
pub fn rma(values: &[f64], period: usize) -> Vec<f64> {
    assert!(period > 0, "period must be > 0");
    ewm(values, 1.0 / period as f64, period)
}

/// Average True Range (Wilder) in price units.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    if highs.is_empty() {
        return Vec::new();
    }
    let tr = true_range(highs, lows, closes);
    rma(&tr, period)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ohlc_from_close(close: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let highs: Vec<f64> = close.iter().map(|c| c * 1.001).collect();
        let lows: Vec<f64> = close.iter().map(|c| c * 0.999).collect();
        (highs, lows)
    }

    #[test]
    fn atr_positive_after_warmup() {
        let close: Vec<f64> = (0..200).map(|i| 100.0 + i as f64 * 0.05).collect();
        let (highs, lows) = ohlc_from_close(&close);
        let v = atr(&highs, &lows, &close, 14);
        assert_eq!(v.len(), close.len());
        assert!(v[..13].iter().all(|x| x.is_nan()));
        assert!(v.last().unwrap().is_finite());
        assert!(*v.last().unwrap() > 0.0);
    }

    #[test]
    fn true_range_uses_gap_to_previous_close() {
        let highs = [10.0, 15.0];
        let lows = [9.0, 14.0];
        let closes = [9.5, 14.5];
        let tr = true_range(&highs, &lows, &closes);
        assert!((tr[0] - 1.0).abs() < 1e-12);
        // high(15) - prev_close(9.5) dominates high-low(1)
        assert!((tr[1] - 5.5).abs() < 1e-12);
    }
}
