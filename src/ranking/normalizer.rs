const EPS: f64 = 1e-12;

/// Robustly scale values into 0..1.
///
/// Clips to median +- 3*IQR before min-max scaling so a single outlier does
/// not flatten the rest of the candidate set. Falls back to plain min-max
/// when the IQR collapses, and to 0.5 everywhere when the range collapses
/// too. Non-finite inputs stay NaN.
pub fn robust_minmax(values: &[f64]) -> Vec<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return vec![f64::NAN; values.len()];
    }

    let med = quantile(&finite, 0.5);
    let q1 = quantile(&finite, 0.25);
    let q3 = quantile(&finite, 0.75);
    let iqr = q3 - q1;

    if iqr <= EPS {
        let mn = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let mx = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if (mx - mn).abs() <= EPS {
            return values
                .iter()
                .map(|v| if v.is_finite() { 0.5 } else { f64::NAN })
                .collect();
        }
        return values.iter().map(|v| (v - mn) / (mx - mn)).collect();
    }

    let lo = med - 3.0 * iqr;
    let hi = med + 3.0 * iqr;
    let clipped: Vec<f64> = values.iter().map(|v| v.clamp(lo, hi)).collect();
    let mn = clipped
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::INFINITY, f64::min);
    let mx = clipped
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if (mx - mn).abs() <= EPS {
        return values
            .iter()
            .map(|v| if v.is_finite() { 0.5 } else { f64::NAN })
            .collect();
    }
    clipped.iter().map(|v| (v - mn) / (mx - mn)).collect()
}

/// Linear-interpolated quantile over the finite values.
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let idx = pos.floor() as usize;
    let frac = pos - idx as f64;
    if idx + 1 < sorted.len() {
        sorted[idx] * (1.0 - frac) + sorted[idx + 1] * frac
    } else {
        sorted[idx]
    }
}
