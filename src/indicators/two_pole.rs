use std::f64::consts::PI;

use super::ema::ema;

/// Ehlers 2-pole Super Smoother filter.
///
/// Recursive form:
///   a1 = exp(-1.414*pi / period)
///   b1 = 2*a1*cos(1.414*pi / period)
///   c2 = b1; c3 = -a1^2; c1 = 1 - c2 - c3
///   y[t] = c1*(x[t] + x[t-1])/2 + c2*y[t-1] + c3*y[t-2]
/// seeded with y[0] = x[0], y[1] = x[1].
pub fn super_smoother_2pole(values: &[f64], period: usize) -> Vec<f64> {
    assert!(period > 2, "period must be > 2 for 2-pole filter");
    let len = values.len();
    if len == 0 {
        return Vec::new();
    }

    let a1 = (-1.414 * PI / period as f64).exp();
    let b1 = 2.0 * a1 * (1.414 * PI / period as f64).cos();
    let c2 = b1;
    let c3 = -(a1 * a1);
    let c1 = 1.0 - c2 - c3;

    let mut y = vec![f64::NAN; len];
    y[0] = values[0];
    if len >= 2 {
        y[1] = values[1];
    }
    for i in 2..len {
        y[i] = c1 * (values[i] + values[i - 1]) / 2.0 + c2 * y[i - 1] + c3 * y[i - 2];
    }
    y
}

#[derive(Debug, Clone)]
pub struct TwoPoleOutput {
    pub smooth: Vec<f64>,
    pub osc: Vec<f64>,
    pub signal: Vec<f64>,
    pub hist: Vec<f64>,
    /// +1 on hist crossing up through zero, -1 on crossing down, else 0.
    pub cross: Vec<i32>,
}

/// Two-pole momentum oscillator: `osc = close - SS2(close)`,
/// `signal = EMA(osc, signal_period)`, `hist = osc - signal`.
pub fn two_pole_oscillator(closes: &[f64], period: usize, signal_period: usize) -> TwoPoleOutput {
    let smooth = super_smoother_2pole(closes, period);
    let osc: Vec<f64> = closes
        .iter()
        .zip(smooth.iter())
        .map(|(c, s)| c - s)
        .collect();
    let signal = ema(&osc, signal_period);
    let hist: Vec<f64> = osc
        .iter()
        .zip(signal.iter())
        .map(|(o, s)| o - s)
        .collect();

    let mut cross = vec![0i32; closes.len()];
    for i in 1..closes.len() {
        let prev = hist[i - 1];
        let cur = hist[i];
        if !prev.is_finite() || !cur.is_finite() {
            continue;
        }
        if prev <= 0.0 && cur > 0.0 {
            cross[i] = 1;
        } else if prev >= 0.0 && cur < 0.0 {
            cross[i] = -1;
        }
    }

    TwoPoleOutput {
        smooth,
        osc,
        signal,
        hist,
        cross,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_series(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (i as f64 * 30.0 / n as f64).sin() * 5.0 + 100.0)
            .collect()
    }

    #[test]
    fn super_smoother_deterministic() {
        let close = sine_series(300);
        let s1 = super_smoother_2pole(&close, 20);
        let s2 = super_smoother_2pole(&close, 20);
        for (a, b) in s1.iter().zip(s2.iter()) {
            assert!((a.is_nan() && b.is_nan()) || a == b);
        }
    }

    #[test]
    fn super_smoother_tracks_level() {
        let close = vec![100.0; 300];
        let s = super_smoother_2pole(&close, 20);
        assert!((s.last().unwrap() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn oscillator_crosses_on_cyclic_input() {
        let close = sine_series(600);
        let out = two_pole_oscillator(&close, 20, 9);
        let crossings: i32 = out.cross.iter().map(|c| c.abs()).sum();
        assert!(crossings > 0);
    }
}
