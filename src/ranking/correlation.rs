use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CorrelationDecision {
    pub selected: Vec<String>,
    /// symbol -> human-readable exclusion reason
    pub excluded: HashMap<String, String>,
}

/// Pearson correlation of two return series, aligned from the most recent
/// observation backwards. Returns 0.0 for degenerate inputs (the pruning
/// treats "unknown" as "uncorrelated", same as a failed correlation lookup).
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];

    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.len() < 2 {
        return 0.0;
    }

    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in &pairs {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Greedy diversification: walk symbols in score order and admit each only if
/// its absolute correlation against every already-admitted symbol stays at or
/// below the threshold. Pads with the next best rejects when fewer than
/// `top_n` survive.
pub fn greedy_correlation_filter(
    ranked_symbols: &[String],
    returns: &HashMap<String, Vec<f64>>,
    max_abs_corr: f64,
    top_n: usize,
) -> CorrelationDecision {
    if ranked_symbols.len() <= 1 || returns.is_empty() {
        return CorrelationDecision {
            selected: ranked_symbols.iter().take(top_n).cloned().collect(),
            excluded: HashMap::new(),
        };
    }

    let mut selected: Vec<String> = Vec::new();
    let mut excluded: HashMap<String, String> = HashMap::new();

    for sym in ranked_symbols {
        if selected.len() >= top_n {
            break;
        }
        let empty: Vec<f64> = Vec::new();
        let own = returns.get(sym).unwrap_or(&empty);
        let mut ok = true;
        for other in &selected {
            let c = pearson(own, returns.get(other).unwrap_or(&empty));
            if c.abs() > max_abs_corr {
                excluded.insert(
                    sym.clone(),
                    format!("|corr({},{})|={:.2} > {:.2}", sym, other, c.abs(), max_abs_corr),
                );
                ok = false;
                break;
            }
        }
        if ok {
            selected.push(sym.clone());
        }
    }

    // Prefer having top_n symbols over strict diversification. A re-admitted
    // symbol is no longer excluded.
    if selected.len() < top_n {
        for sym in ranked_symbols {
            if selected.len() >= top_n {
                break;
            }
            if !selected.contains(sym) {
                excluded.remove(sym);
                selected.push(sym.clone());
            }
        }
    }

    CorrelationDecision { selected, excluded }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(n: usize, slope: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 * slope).collect()
    }

    #[test]
    fn pearson_detects_perfect_correlation() {
        let a = linear(100, 1.0);
        let b = linear(100, 2.0);
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-9);
        let c: Vec<f64> = a.iter().map(|x| -x).collect();
        assert!((pearson(&a, &c) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn filter_drops_duplicate_series_with_reason() {
        let t = linear(300, 0.01);
        let neg: Vec<f64> = t.iter().map(|x| -x).collect();
        let mut returns = HashMap::new();
        returns.insert("A".to_string(), t.clone());
        returns.insert("B".to_string(), t.clone());
        returns.insert("C".to_string(), neg);

        let ranked = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let decision = greedy_correlation_filter(&ranked, &returns, 0.85, 2);

        assert_eq!(decision.selected.len(), 2);
        assert!(decision.selected.contains(&"A".to_string()));
        // B duplicates A, C mirrors A; exactly one of them is dropped and the
        // reason names the conflicting symbol.
        assert_eq!(decision.excluded.len(), 1);
        let reason = decision.excluded.values().next().unwrap();
        assert!(reason.contains("A"));
        // a symbol is never both selected and excluded
        for sym in &decision.selected {
            assert!(!decision.excluded.contains_key(sym));
        }
    }

    #[test]
    fn filter_pads_back_to_top_n() {
        let t = linear(100, 1.0);
        let mut returns = HashMap::new();
        for sym in ["A", "B", "C"] {
            returns.insert(sym.to_string(), t.clone());
        }
        let ranked = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let decision = greedy_correlation_filter(&ranked, &returns, 0.5, 2);
        // everything correlates, but we still fill to top_n in score order,
        // and the padded-back symbol loses its exclusion
        assert_eq!(decision.selected, vec!["A".to_string(), "B".to_string()]);
        assert!(!decision.excluded.contains_key("B"));
        assert!(decision.excluded.contains_key("C"));
    }
}
