use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::broker::{BrokerConnector, BrokerResult};
use crate::database::Database;
use crate::types::Deal;

/// Overlap window re-queried on every sync so clock skew between the bot and
/// the trade server cannot drop deals. Duplicates are absorbed by the
/// deal_ticket unique constraint.
const OVERLAP_MINUTES: i64 = 5;

/// Polls closed deals from the broker and persists them, returning only the
/// deals that were newly inserted this round.
pub struct DealReconciler {
    sync_from_utc: DateTime<Utc>,
}

impl DealReconciler {
    pub fn new(start_from: DateTime<Utc>) -> Self {
        Self {
            sync_from_utc: start_from,
        }
    }

    /// Reset the window (used on reconnect).
    pub fn reset(&mut self, start_from: DateTime<Utc>) {
        self.sync_from_utc = start_from;
    }

    pub async fn sync(
        &mut self,
        connector: &Arc<dyn BrokerConnector>,
        db: &Database,
    ) -> BrokerResult<Vec<Deal>> {
        let now = Utc::now();
        let deals = connector.list_deals(self.sync_from_utc, now).await?;
        self.sync_from_utc = now - Duration::minutes(OVERLAP_MINUTES);

        if deals.is_empty() {
            return Ok(Vec::new());
        }

        let inserted_tickets = match db.insert_deals(&deals).await {
            Ok(tickets) => tickets,
            Err(e) => {
                tracing::warn!(error = %e, "deal persistence failed");
                return Ok(Vec::new());
            }
        };
        debug!(
            fetched = deals.len(),
            inserted = inserted_tickets.len(),
            "deal sync"
        );

        Ok(deals
            .into_iter()
            .filter(|d| inserted_tickets.contains(&d.deal_ticket))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockConnector;
    use crate::types::{DealEntry, Side};
    use chrono::TimeZone;

    fn deal(ticket: i64) -> Deal {
        Deal {
            deal_ticket: ticket,
            position_id: Some(1),
            order_ticket: None,
            time_utc: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
            symbol: "EURUSD".into(),
            side: Side::Short,
            entry: DealEntry::Out,
            volume: 0.01,
            price: 1.1,
            profit: Some(2.0),
            commission: None,
            swap: None,
            magic: Some(26012026),
            comment: None,
            raw: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn only_new_deals_are_returned() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let mut connector = MockConnector::new();
        connector.deals = vec![deal(1), deal(2)];
        let connector: Arc<dyn BrokerConnector> = Arc::new(connector);

        let mut reconciler = DealReconciler::new(Utc::now() - Duration::hours(6));
        let first = reconciler.sync(&connector, &db).await.unwrap();
        assert_eq!(first.len(), 2);

        // the same window overlap re-fetches them; unique tickets dedupe
        let second = reconciler.sync(&connector, &db).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn window_advances_with_overlap() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let connector: Arc<dyn BrokerConnector> = Arc::new(MockConnector::new());
        let start = Utc::now() - Duration::hours(6);
        let mut reconciler = DealReconciler::new(start);
        reconciler.sync(&connector, &db).await.unwrap();
        let lag = Utc::now() - reconciler.sync_from_utc;
        assert!(lag >= Duration::minutes(OVERLAP_MINUTES) - Duration::seconds(1));
        assert!(lag <= Duration::minutes(OVERLAP_MINUTES) + Duration::seconds(5));
    }
}
