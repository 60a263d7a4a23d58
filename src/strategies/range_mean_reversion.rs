use super::{Signal, Strategy, StrategyContext};
use crate::data::FeatureBundle;
use crate::types::{CandleSeries, Side};

/// Counter-trend entries at RSI extremes, exiting when RSI crosses back over
/// the 50 midline in the direction that neutralises the position.
pub struct RangeMeanReversionStrategy;

impl Strategy for RangeMeanReversionStrategy {
    fn name(&self) -> &'static str {
        "range_mean_reversion"
    }

    fn generate_signal(
        &self,
        _candles: &CandleSeries,
        features: &FeatureBundle,
        ctx: &StrategyContext<'_>,
    ) -> Signal {
        let Some(rsi14) = features.rsi14 else {
            return Signal::flat("RSI not available");
        };

        if let Some(pos) = ctx.current_position {
            if pos.side == Side::Long && rsi14 >= 50.0 {
                let confidence = ((rsi14 - 50.0) / 20.0).clamp(0.0, 1.0);
                return Signal::exit(confidence, "RSI mean reversion: exit long");
            }
            if pos.side == Side::Short && rsi14 <= 50.0 {
                let confidence = ((50.0 - rsi14) / 20.0).clamp(0.0, 1.0);
                return Signal::exit(confidence, "RSI mean reversion: exit short");
            }
            return Signal::flat("In position: no exit signal");
        }

        if rsi14 <= 30.0 {
            let confidence = ((30.0 - rsi14) / 20.0).clamp(0.0, 1.0);
            return Signal::entry(Side::Long, confidence, &format!("RSI oversold ({:.1})", rsi14));
        }
        if rsi14 >= 70.0 {
            let confidence = ((rsi14 - 70.0) / 20.0).clamp(0.0, 1.0);
            return Signal::entry(
                Side::Short,
                confidence,
                &format!("RSI overbought ({:.1})", rsi14),
            );
        }
        Signal::flat(&format!("RSI neutral ({:.1})", rsi14))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Position, Timeframe};
    use chrono::Utc;

    fn features(rsi: Option<f64>) -> FeatureBundle {
        FeatureBundle {
            close: 100.0,
            rsi14: rsi,
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

    fn long_position() -> Position {
        Position {
            position_id: 1,
            symbol: "EURUSD".into(),
            side: Side::Long,
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
    fn oversold_goes_long_with_scaled_confidence() {
        let strategy = RangeMeanReversionStrategy;
        let candles = CandleSeries::default();

        let signal = strategy.generate_signal(&candles, &features(Some(20.0)), &ctx(None));
        assert_eq!(signal.side, Side::Long);
        assert!((signal.confidence - 0.5).abs() < 1e-9);

        let signal = strategy.generate_signal(&candles, &features(Some(75.0)), &ctx(None));
        assert_eq!(signal.side, Side::Short);

        let signal = strategy.generate_signal(&candles, &features(Some(50.0)), &ctx(None));
        assert_eq!(signal.side, Side::Flat);
        assert!(!signal.is_exit());
    }

    #[test]
    fn midline_cross_exits_long() {
        let strategy = RangeMeanReversionStrategy;
        let candles = CandleSeries::default();
        let pos = long_position();

        let signal = strategy.generate_signal(&candles, &features(Some(55.0)), &ctx(Some(&pos)));
        assert!(signal.is_exit());

        let signal = strategy.generate_signal(&candles, &features(Some(45.0)), &ctx(Some(&pos)));
        assert!(!signal.is_exit());
    }

    #[test]
    fn missing_rsi_is_flat() {
        let strategy = RangeMeanReversionStrategy;
        let candles = CandleSeries::default();
        let signal = strategy.generate_signal(&candles, &features(None), &ctx(None));
        assert_eq!(signal.side, Side::Flat);
    }
}
