use crate::types::Side;

#[derive(Debug, Clone, Copy, Default)]
pub struct Sltp {
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub stop_points: Option<f64>,
    pub take_points: Option<f64>,
}

/// Fixed-distance stops: SL at `stop_points * point` against the entry, TP at
/// `take_points * point` in its favour.
pub fn sltp_rr(side: Side, entry: f64, point: f64, stop_points: i64, take_points: i64) -> Sltp {
    if point <= 0.0 {
        return Sltp::default();
    }
    let stop_dist = stop_points as f64 * point;
    let take_dist = take_points as f64 * point;
    let (sl, tp) = match side {
        Side::Long => (entry - stop_dist, entry + take_dist),
        Side::Short => (entry + stop_dist, entry - take_dist),
        Side::Flat => return Sltp::default(),
    };
    Sltp {
        sl: Some(sl),
        tp: Some(tp),
        stop_points: Some(stop_points as f64),
        take_points: Some(take_points as f64),
    }
}

/// Volatility-scaled stops from the current ATR.
pub fn sltp_atr(side: Side, entry: f64, atr: f64, sl_mult: f64, tp_mult: f64) -> Sltp {
    if atr <= 0.0 {
        return Sltp::default();
    }
    let sl_dist = atr * sl_mult;
    let tp_dist = atr * tp_mult;
    let (sl, tp) = match side {
        Side::Long => (entry - sl_dist, entry + tp_dist),
        Side::Short => (entry + sl_dist, entry - tp_dist),
        Side::Flat => return Sltp::default(),
    };
    Sltp {
        sl: Some(sl),
        tp: Some(tp),
        stop_points: None,
        take_points: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rr_levels_are_symmetric_around_entry() {
        let point = 0.00001;
        let long = sltp_rr(Side::Long, 1.10000, point, 100, 200);
        assert!((1.10000 - long.sl.unwrap() - 100.0 * point).abs() < 1e-12);
        assert!((long.tp.unwrap() - 1.10000 - 200.0 * point).abs() < 1e-12);

        let short = sltp_rr(Side::Short, 1.10000, point, 100, 200);
        assert!((short.sl.unwrap() - 1.10000 - 100.0 * point).abs() < 1e-12);
        assert!((1.10000 - short.tp.unwrap() - 200.0 * point).abs() < 1e-12);
    }

    #[test]
    fn atr_mode_scales_with_volatility() {
        let out = sltp_atr(Side::Long, 100.0, 2.0, 1.5, 3.0);
        assert!((out.sl.unwrap() - 97.0).abs() < 1e-12);
        assert!((out.tp.unwrap() - 106.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_inputs_yield_no_levels() {
        assert!(sltp_rr(Side::Long, 1.0, 0.0, 100, 200).sl.is_none());
        assert!(sltp_atr(Side::Short, 1.0, 0.0, 1.5, 3.0).sl.is_none());
        assert!(sltp_rr(Side::Flat, 1.0, 0.1, 100, 200).sl.is_none());
    }
}
