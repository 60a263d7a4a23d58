use serde::Serialize;

use crate::indicators::{adx, atr, ema, rsi, two_pole_oscillator};
use crate::types::CandleSeries;

/// Per-symbol feature bundle computed from a candle series. Optional fields
/// are None while the underlying indicator is still warming up.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureBundle {
    pub close: f64,
    pub atr14: Option<f64>,
    pub atr14_pct: Option<f64>,
    pub adx14: Option<f64>,
    pub plus_di14: Option<f64>,
    pub minus_di14: Option<f64>,
    pub rsi14: Option<f64>,
    pub ema50: Option<f64>,
    pub ema50_slope: Option<f64>,
    pub tp_osc: Option<f64>,
    pub tp_signal: Option<f64>,
    pub tp_hist: Option<f64>,
    pub tp_cross: i32,
    pub ret20: Option<f64>,
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Compute the consistent feature set used by ranking and the strategies.
/// Returns None when the series is empty.
pub fn compute_features(series: &CandleSeries) -> Option<FeatureBundle> {
    if series.is_empty() {
        return None;
    }
    let closes = series.closes();
    let highs = series.highs();
    let lows = series.lows();
    let last = closes.len() - 1;
    let close = closes[last];

    let atr14 = atr(&highs, &lows, &closes, 14);
    let adx14 = adx(&highs, &lows, &closes, 14);
    let rsi14 = rsi(&closes, 14);
    let ema50 = ema(&closes, 50);
    let osc = two_pole_oscillator(&closes, 20, 9);

    let atr_last = finite(atr14[last]);
    let atr_pct = match (atr_last, close != 0.0) {
        (Some(a), true) => Some(a / close),
        _ => None,
    };
    let ema_last = finite(ema50[last]);
    let ema_slope = if last >= 1 {
        match (finite(ema50[last]), finite(ema50[last - 1])) {
            (Some(cur), Some(prev)) => Some(cur - prev),
            _ => None,
        }
    } else {
        None
    };
    let ret20 = if last >= 20 && closes[last - 20] != 0.0 {
        finite((close - closes[last - 20]) / closes[last - 20])
    } else {
        None
    };

    Some(FeatureBundle {
        close,
        atr14: atr_last,
        atr14_pct: atr_pct,
        adx14: finite(adx14.adx[last]),
        plus_di14: finite(adx14.plus_di[last]),
        minus_di14: finite(adx14.minus_di[last]),
        rsi14: finite(rsi14[last]),
        ema50: ema_last,
        ema50_slope: ema_slope,
        tp_osc: finite(osc.osc[last]),
        tp_signal: finite(osc.signal[last]),
        tp_hist: finite(osc.hist[last]),
        tp_cross: osc.cross[last],
        ret20,
    })
}
