use crate::types::SymbolMeta;

#[derive(Debug, Clone)]
pub struct VolumeResult {
    pub volume: Option<f64>,
    pub reason: String,
}

impl VolumeResult {
    fn ok(volume: f64, reason: &str) -> Self {
        Self {
            volume: Some(volume),
            reason: reason.to_string(),
        }
    }

    fn blocked(reason: &str) -> Self {
        Self {
            volume: None,
            reason: reason.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.volume.is_some()
    }
}

fn round_down_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).floor() * step
}

/// Risk-based position sizing from tick metadata:
///   money_per_point_per_lot = tick_value * point / tick_size
///   volume = equity * risk_per_trade / (stop_points * money_per_point_per_lot)
/// clamped to the symbol's volume bounds and rounded down to its step.
pub fn compute_volume(
    equity: f64,
    risk_per_trade: f64,
    stop_points: f64,
    symbol: &SymbolMeta,
) -> VolumeResult {
    if equity <= 0.0 {
        return VolumeResult::blocked("equity unavailable");
    }
    if stop_points <= 0.0 {
        return VolumeResult::blocked("invalid stop distance");
    }
    let point = symbol.point.unwrap_or(0.0);
    let tick_value = symbol.trade_tick_value.unwrap_or(0.0);
    let tick_size = symbol.trade_tick_size.unwrap_or(0.0);
    if point <= 0.0 || tick_value <= 0.0 || tick_size <= 0.0 {
        return VolumeResult::blocked("missing symbol tick metadata for sizing");
    }

    let money_per_point = tick_value * point / tick_size;
    if money_per_point <= 0.0 {
        return VolumeResult::blocked("invalid tick metadata");
    }

    let risk_money = equity * risk_per_trade;
    let mut volume = risk_money / (stop_points * money_per_point);

    let vol_min = symbol.volume_min.unwrap_or(0.0);
    let vol_max = symbol.volume_max.unwrap_or(0.0);
    let vol_step = symbol.volume_step.unwrap_or(0.0);

    if vol_min > 0.0 {
        volume = volume.max(vol_min);
    }
    if vol_max > 0.0 {
        volume = volume.min(vol_max);
    }
    if vol_step > 0.0 {
        volume = round_down_to_step(volume, vol_step);
        if vol_min > 0.0 && volume < vol_min {
            volume = vol_min;
        }
    }

    if volume <= 0.0 {
        return VolumeResult::blocked("computed volume <= 0");
    }
    VolumeResult::ok(volume, "risk sized")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::forex_meta;

    #[test]
    fn sizes_per_risk_budget() {
        // equity 1000, risk 0.5%, stop 100 points, $1 per point per lot
        // -> risk money $5, raw volume 0.05, step 0.01 keeps it at 0.05
        let meta = forex_meta("EURUSD");
        let result = compute_volume(1000.0, 0.005, 100.0, &meta);
        let volume = result.volume.unwrap();
        assert!((volume - 0.05).abs() < 1e-9);
    }

    #[test]
    fn volume_is_step_multiple_within_bounds() {
        let meta = forex_meta("EURUSD");
        for equity in [137.0, 1000.0, 25_000.0, 1_000_000.0] {
            let result = compute_volume(equity, 0.007, 85.0, &meta);
            let v = result.volume.unwrap();
            assert!(v >= meta.volume_min.unwrap() - 1e-9);
            assert!(v <= meta.volume_max.unwrap() + 1e-9);
            let steps = v / meta.volume_step.unwrap();
            assert!((steps - steps.round()).abs() < 1e-6, "volume {} not on step", v);
        }
    }

    #[test]
    fn blocked_without_tick_metadata() {
        let mut meta = forex_meta("EURUSD");
        meta.trade_tick_value = None;
        let result = compute_volume(1000.0, 0.005, 100.0, &meta);
        assert!(!result.is_ok());
        assert!(result.reason.contains("tick metadata"));
    }

    #[test]
    fn blocked_on_zero_equity_or_stop() {
        let meta = forex_meta("EURUSD");
        assert!(!compute_volume(0.0, 0.005, 100.0, &meta).is_ok());
        assert!(!compute_volume(1000.0, 0.005, 0.0, &meta).is_ok());
    }

    #[test]
    fn tiny_budget_floors_to_volume_min() {
        let meta = forex_meta("EURUSD");
        let result = compute_volume(10.0, 0.001, 500.0, &meta);
        assert!((result.volume.unwrap() - meta.volume_min.unwrap()).abs() < 1e-12);
    }
}
