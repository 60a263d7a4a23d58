use super::{Signal, Strategy, StrategyContext};
use crate::data::FeatureBundle;
use crate::types::{CandleSeries, Side};

/// Trend-following entries on two-pole oscillator crossovers, confirmed by
/// the EMA50 slope. Exits when the crossover flips against the held side.
pub struct TwoPoleMomentumStrategy;

impl Strategy for TwoPoleMomentumStrategy {
    fn name(&self) -> &'static str {
        "two_pole_momentum"
    }

    fn generate_signal(
        &self,
        _candles: &CandleSeries,
        features: &FeatureBundle,
        ctx: &StrategyContext<'_>,
    ) -> Signal {
        let cross = features.tp_cross;
        let hist = features.tp_hist.unwrap_or(0.0);
        let atr14 = features.atr14.unwrap_or(0.0);
        let adx14 = features.adx14.unwrap_or(0.0);
        let slope = features.ema50_slope.unwrap_or(0.0);

        let strength = if atr14 > 0.0 { (hist / atr14).abs() } else { 0.0 };
        let confidence = (0.25 + 0.45 * strength.clamp(0.0, 1.0)
            + 0.30 * (adx14 / 50.0).clamp(0.0, 1.0))
        .clamp(0.0, 1.0);

        if let Some(pos) = ctx.current_position {
            if pos.side == Side::Long && cross < 0 {
                return Signal::exit(confidence, "Two-pole crossover down: exit long");
            }
            if pos.side == Side::Short && cross > 0 {
                return Signal::exit(confidence, "Two-pole crossover up: exit short");
            }
            return Signal::flat("In position: no exit signal");
        }

        if cross > 0 && slope > 0.0 {
            return Signal::entry(Side::Long, confidence, "Crossover up with MA slope up");
        }
        if cross < 0 && slope < 0.0 {
            return Signal::entry(Side::Short, confidence, "Crossover down with MA slope down");
        }
        Signal::flat("No entry signal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;
    use crate::types::Timeframe;
    use chrono::Utc;

    fn features(cross: i32, slope: f64) -> FeatureBundle {
        FeatureBundle {
            close: 100.0,
            atr14: Some(1.0),
            adx14: Some(30.0),
            ema50_slope: Some(slope),
            tp_hist: Some(0.5),
            tp_cross: cross,
            ..FeatureBundle::default()
        }
    }

    fn ctx<'a>(position: Option<&'a Position>) -> StrategyContext<'a> {
        StrategyContext {
            symbol: "EURUSD",
            timeframe: Timeframe::H1,
            candle_close_time_utc: "2026-01-01T00:00:00+00:00",
            quote: None,
            symbol_meta: None,
            current_position: position,
        }
    }

    fn short_position() -> Position {
        Position {
            position_id: 7,
            symbol: "EURUSD".into(),
            side: Side::Short,
            volume: 0.01,
            price_open: 1.1,
            sl: None,
            tp: None,
            time_utc: Utc::now(),
            profit: None,
            swap: None,
            commission: None,
            magic: None,
            comment: None,
        }
    }

    #[test]
    fn long_entry_needs_cross_up_and_slope_up() {
        let strategy = TwoPoleMomentumStrategy;
        let candles = CandleSeries::default();

        let signal = strategy.generate_signal(&candles, &features(1, 0.5), &ctx(None));
        assert_eq!(signal.side, Side::Long);
        assert!(signal.confidence > 0.25);

        let signal = strategy.generate_signal(&candles, &features(1, -0.5), &ctx(None));
        assert_eq!(signal.side, Side::Flat);
    }

    #[test]
    fn opposite_cross_exits_held_position() {
        let strategy = TwoPoleMomentumStrategy;
        let candles = CandleSeries::default();
        let pos = short_position();

        let signal = strategy.generate_signal(&candles, &features(1, 0.5), &ctx(Some(&pos)));
        assert!(signal.is_exit());

        // same-direction cross keeps the position
        let signal = strategy.generate_signal(&candles, &features(-1, -0.5), &ctx(Some(&pos)));
        assert!(!signal.is_exit());
        assert_eq!(signal.side, Side::Flat);
    }

    #[test]
    fn confidence_saturates_at_one() {
        let strategy = TwoPoleMomentumStrategy;
        let candles = CandleSeries::default();
        let mut f = features(1, 1.0);
        f.tp_hist = Some(100.0);
        f.adx14 = Some(100.0);
        let signal = strategy.generate_signal(&candles, &f, &ctx(None));
        assert!(signal.confidence <= 1.0);
    }
}
