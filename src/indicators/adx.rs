use super::atr::{rma, true_range};

#[derive(Debug, Clone)]
pub struct AdxOutput {
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
    pub adx: Vec<f64>,
}

/// ADX with +DI/-DI (Wilder).
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> AdxOutput {
    assert!(period > 0, "period must be > 0");
    let len = highs.len();
    if len == 0 {
        return AdxOutput {
            plus_di: Vec::new(),
            minus_di: Vec::new(),
            adx: Vec::new(),
        };
    }

    let mut plus_dm = vec![0.0; len];
    let mut minus_dm = vec![0.0; len];
    for i in 1..len {
        let up_move = highs[i] - highs[i - 1];
        let down_move = lows[i - 1] - lows[i];
        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
    }

    let tr = true_range(highs, lows, closes);
    let atr_val = rma(&tr, period);
    let plus_sm = rma(&plus_dm, period);
    let minus_sm = rma(&minus_dm, period);

    let mut plus_di = vec![f64::NAN; len];
    let mut minus_di = vec![f64::NAN; len];
    let mut dx = vec![f64::NAN; len];
    for i in 0..len {
        let a = atr_val[i];
        if !a.is_finite() || a == 0.0 {
            continue;
        }
        let p = 100.0 * plus_sm[i] / a;
        let m = 100.0 * minus_sm[i] / a;
        plus_di[i] = p;
        minus_di[i] = m;
        let denom = p + m;
        if denom.is_finite() && denom != 0.0 {
            dx[i] = 100.0 * (p - m).abs() / denom;
        }
    }

    AdxOutput {
        plus_di,
        minus_di,
        adx: rma(&dx, period),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adx_non_negative() {
        let close: Vec<f64> = (0..300).map(|i| 100.0 + i as f64 * 0.1).collect();
        let highs: Vec<f64> = close.iter().map(|c| c * 1.001).collect();
        let lows: Vec<f64> = close.iter().map(|c| c * 0.999).collect();
        let out = adx(&highs, &lows, &close, 14);
        assert_eq!(out.adx.len(), close.len());
        for v in out.adx.iter().filter(|v| v.is_finite()) {
            assert!(*v >= 0.0);
        }
    }

    #[test]
    fn trending_series_has_high_plus_di() {
        let close: Vec<f64> = (0..300).map(|i| 100.0 + i as f64).collect();
        let highs: Vec<f64> = close.iter().map(|c| c + 0.5).collect();
        let lows: Vec<f64> = close.iter().map(|c| c - 0.5).collect();
        let out = adx(&highs, &lows, &close, 14);
        let last = out.plus_di.last().unwrap();
        let last_minus = out.minus_di.last().unwrap();
        assert!(last > last_minus);
    }
}
