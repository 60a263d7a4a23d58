use super::atr::rma;

/// RSI (Wilder), 0..100.
///
/// Degenerate windows resolve to the conventional fixed points: all-gain 100,
/// all-loss 0, no movement at all 50.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    assert!(period > 0, "period must be > 0");
    let len = closes.len();
    let mut gains = vec![f64::NAN; len];
    let mut losses = vec![f64::NAN; len];
    for i in 1..len {
        let delta = closes[i] - closes[i - 1];
        gains[i] = delta.max(0.0);
        losses[i] = (-delta).max(0.0);
    }

    let avg_gain = rma(&gains, period);
    let avg_loss = rma(&losses, period);

    const EPS: f64 = 1e-12;
    let mut out = vec![f64::NAN; len];
    for i in 0..len {
        let (g, l) = (avg_gain[i], avg_loss[i]);
        if !g.is_finite() || !l.is_finite() {
            continue;
        }
        out[i] = if g.abs() <= EPS && l.abs() <= EPS {
            50.0
        } else if l.abs() <= EPS {
            100.0
        } else if g.abs() <= EPS {
            0.0
        } else {
            100.0 - 100.0 / (1.0 + g / l)
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_bounds() {
        let close: Vec<f64> = (0..200)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0)
            .collect();
        let v = rsi(&close, 14);
        for x in v.iter().filter(|x| x.is_finite()) {
            assert!(*x >= 0.0 && *x <= 100.0);
        }
    }

    #[test]
    fn rsi_saturates_on_monotonic_series() {
        let rising: Vec<f64> = (0..100).map(|i| 100.0 + i as f64).collect();
        let v = rsi(&rising, 14);
        assert!((v.last().unwrap() - 100.0).abs() < 1e-9);

        let flat = vec![100.0; 100];
        let v = rsi(&flat, 14);
        assert!((v.last().unwrap() - 50.0).abs() < 1e-9);
    }
}
