use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::broker::BrokerConnector;
use crate::types::Timeframe;

/// Detects new closed candles on the anchor symbol, using the broker's own
/// clock so server gaps and weekends are handled implicitly.
///
/// Emitted close times are strictly increasing for the lifetime of the
/// scheduler.
pub struct CandleCloseScheduler {
    timeframe: Timeframe,
    last_close_utc: Option<DateTime<Utc>>,
}

impl CandleCloseScheduler {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            last_close_utc: None,
        }
    }

    /// Fetch the last three bars of the anchor; the second-to-last is the
    /// most recent closed bar, its close time is open time + timeframe.
    /// Returns the close time only when it advances past the previous one.
    pub async fn poll(
        &mut self,
        connector: &Arc<dyn BrokerConnector>,
        anchor_symbol: &str,
    ) -> Option<DateTime<Utc>> {
        let series = match connector.get_candles(anchor_symbol, self.timeframe, 3).await {
            Ok(series) => series,
            Err(e) => {
                debug!(anchor = anchor_symbol, error = %e, "scheduler candle fetch failed");
                return None;
            }
        };
        if series.len() < 3 {
            return None;
        }
        let last_closed = series.last_closed()?;
        let close_time = last_closed.time_utc + Duration::seconds(self.timeframe.seconds());

        match self.last_close_utc {
            Some(last) if close_time <= last => None,
            _ => {
                self.last_close_utc = Some(close_time);
                Some(close_time)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockConnector;
    use crate::types::{Candle, CandleSeries};
    use chrono::TimeZone;

    fn series_with_bars(n: usize, start_hour: i64) -> CandleSeries {
        let candles = (0..n)
            .map(|i| {
                let t = Utc
                    .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
                    .unwrap()
                    + Duration::hours(start_hour + i as i64);
                Candle {
                    time_utc: t,
                    open: 1.0,
                    high: 1.01,
                    low: 0.99,
                    close: 1.0,
                }
            })
            .collect();
        CandleSeries::new(candles)
    }

    fn connector_with(series: CandleSeries) -> Arc<dyn BrokerConnector> {
        Arc::new(MockConnector::new().with_candles("EURUSD", series))
    }

    #[tokio::test]
    async fn emits_close_of_second_to_last_bar() {
        let connector = connector_with(series_with_bars(3, 0));
        let mut scheduler = CandleCloseScheduler::new(Timeframe::H1);
        let close = scheduler.poll(&connector, "EURUSD").await.unwrap();
        // bars open at 00:00, 01:00, 02:00 -> last closed opened 01:00, closes 02:00
        assert_eq!(close, Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn repeat_polls_are_silent_until_new_bar() {
        let mut scheduler = CandleCloseScheduler::new(Timeframe::H1);

        let connector = connector_with(series_with_bars(3, 0));
        let first = scheduler.poll(&connector, "EURUSD").await;
        assert!(first.is_some());
        assert!(scheduler.poll(&connector, "EURUSD").await.is_none());

        // one bar later the close time advances strictly
        let connector = connector_with(series_with_bars(3, 1));
        let second = scheduler.poll(&connector, "EURUSD").await.unwrap();
        assert!(second > first.unwrap());
    }

    #[tokio::test]
    async fn too_few_bars_returns_none() {
        let connector = connector_with(series_with_bars(2, 0));
        let mut scheduler = CandleCloseScheduler::new(Timeframe::H1);
        assert!(scheduler.poll(&connector, "EURUSD").await.is_none());
    }

    #[tokio::test]
    async fn never_goes_backwards() {
        let mut scheduler = CandleCloseScheduler::new(Timeframe::H1);
        let connector = connector_with(series_with_bars(3, 5));
        assert!(scheduler.poll(&connector, "EURUSD").await.is_some());

        // broker clock regression (e.g. failover) must not re-emit
        let connector = connector_with(series_with_bars(3, 2));
        assert!(scheduler.poll(&connector, "EURUSD").await.is_none());
    }
}
